//! Charged point particles in an external potential.

use std::sync::Arc;

use nalgebra::DVector;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::{DmcError, Result};
use crate::sampling::{sign, SignedAmplitude, Walker};

/// External potential acting on every particle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExternalPotential {
    /// ½ω²|r|² per particle
    Harmonic { omega: f64 },
    /// Fixed point charges
    Coulomb { nuclei: Vec<Nucleus> },
    Free,
}

impl Default for ExternalPotential {
    fn default() -> Self {
        ExternalPotential::Harmonic { omega: 1.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Nucleus {
    pub charge: f64,
    pub position: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleParams {
    #[serde(default = "default_charge")]
    pub charge: f64,
    /// Particles sharing a species are identical fermions
    #[serde(default)]
    pub species: u32,
    /// Starting position; particles without one are spread along the first axis
    #[serde(default)]
    pub position: Option<Vec<f64>>,
}

fn default_charge() -> f64 {
    -1.0
}

/// The `system` block of the configuration file.
///
/// ```yaml
/// system:
///   particles:
///     - { charge: -1.0, species: 0 }
///     - { charge: -1.0, species: 0 }
///   external: { kind: harmonic, omega: 1.0 }
///   interaction_strength: 0.0
///   exchange_probability: 0.1
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemParams {
    #[serde(default = "default_particles")]
    pub particles: Vec<ParticleParams>,
    #[serde(default)]
    pub external: ExternalPotential,
    /// Prefactor of the inter-particle Coulomb term
    #[serde(default = "default_interaction_strength")]
    pub interaction_strength: f64,
    /// Soft-core length a in 1/sqrt(r² + a²)
    #[serde(default = "default_softening")]
    pub softening: f64,
    #[serde(default)]
    pub exchange_probability: f64,
}

fn default_particles() -> Vec<ParticleParams> {
    vec![ParticleParams {
        charge: default_charge(),
        species: 0,
        position: None,
    }]
}

fn default_interaction_strength() -> f64 {
    1.0
}

fn default_softening() -> f64 {
    0.01
}

impl Default for SystemParams {
    fn default() -> Self {
        Self {
            particles: default_particles(),
            external: ExternalPotential::default(),
            interaction_strength: default_interaction_strength(),
            softening: default_softening(),
            exchange_probability: 0.0,
        }
    }
}

/// Immutable description shared by every walker of a run.
#[derive(Clone, Debug)]
pub struct ParticleSystem {
    pub dimensions: usize,
    pub charges: Vec<f64>,
    pub species: Vec<u32>,
    pub external: ExternalPotential,
    pub interaction_strength: f64,
    pub softening: f64,
    pub exchange_probability: f64,
    initial: DVector<f64>,
    /// Index pairs (i < j) of identical particles
    identical_pairs: Vec<(usize, usize)>,
}

impl ParticleSystem {
    pub fn from_params(params: &SystemParams, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(DmcError::config("dimensions must be at least 1"));
        }
        if params.particles.is_empty() {
            return Err(DmcError::config("system must contain at least one particle"));
        }
        if !(0.0..=1.0).contains(&params.exchange_probability) {
            return Err(DmcError::config(format!(
                "exchange_probability must lie in [0, 1], got {}",
                params.exchange_probability
            )));
        }
        if params.softening < 0.0 {
            return Err(DmcError::config("softening must be non-negative"));
        }
        if let ExternalPotential::Coulomb { nuclei } = &params.external {
            if let Some(n) = nuclei.iter().find(|n| n.position.len() != dimensions) {
                return Err(DmcError::config(format!(
                    "nucleus position {:?} does not have {} components",
                    n.position, dimensions
                )));
            }
        }

        let n = params.particles.len();
        let mut initial = DVector::zeros(n * dimensions);
        for (i, p) in params.particles.iter().enumerate() {
            match &p.position {
                Some(pos) if pos.len() != dimensions => {
                    return Err(DmcError::config(format!(
                        "particle {} position {:?} does not have {} components",
                        i, pos, dimensions
                    )));
                }
                Some(pos) => {
                    for (axis, x) in pos.iter().enumerate() {
                        initial[i * dimensions + axis] = *x;
                    }
                }
                None => initial[i * dimensions] = i as f64 - (n - 1) as f64 / 2.0,
            }
        }

        let species: Vec<u32> = params.particles.iter().map(|p| p.species).collect();
        let mut identical_pairs = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                if species[i] == species[j] {
                    identical_pairs.push((i, j));
                }
            }
        }

        Ok(Self {
            dimensions,
            charges: params.particles.iter().map(|p| p.charge).collect(),
            species,
            external: params.external.clone(),
            interaction_strength: params.interaction_strength,
            softening: params.softening,
            exchange_probability: params.exchange_probability,
            initial,
            identical_pairs,
        })
    }

    pub fn particle_count(&self) -> usize {
        self.charges.len()
    }

    pub fn initial_configuration(&self) -> &DVector<f64> {
        &self.initial
    }

    fn soft_coulomb(&self, r_squared: f64) -> f64 {
        1.0 / (r_squared + self.softening * self.softening).sqrt()
    }
}

/// One replica of a [`ParticleSystem`]: flattened positions and a signed weight.
#[derive(Clone, Debug)]
pub struct ParticleWalker {
    system: Arc<ParticleSystem>,
    positions: DVector<f64>,
    weight: f64,
}

impl ParticleWalker {
    /// Walker at the system's initial configuration with unit weight.
    pub fn new(system: Arc<ParticleSystem>) -> Self {
        let positions = system.initial.clone();
        Self {
            system,
            positions,
            weight: 1.0,
        }
    }

    pub fn system(&self) -> &ParticleSystem {
        &self.system
    }

    fn particle(&self, i: usize) -> nalgebra::DVectorView<'_, f64> {
        let d = self.system.dimensions;
        self.positions.rows(i * d, d)
    }

    fn swap_particles(&mut self, i: usize, j: usize) {
        let d = self.system.dimensions;
        for axis in 0..d {
            self.positions.swap_rows(i * d + axis, j * d + axis);
        }
    }

    fn external_potential(&self) -> f64 {
        let sys = &self.system;
        let d = sys.dimensions;
        match &sys.external {
            ExternalPotential::Harmonic { omega } => 0.5 * omega * omega * self.positions.norm_squared(),
            ExternalPotential::Coulomb { nuclei } => {
                let mut v = 0.0;
                for (i, q) in sys.charges.iter().enumerate() {
                    for nucleus in nuclei {
                        let r2: f64 = (0..d)
                            .map(|axis| (self.positions[i * d + axis] - nucleus.position[axis]).powi(2))
                            .sum();
                        v += q * nucleus.charge * sys.soft_coulomb(r2);
                    }
                }
                v
            }
            ExternalPotential::Free => 0.0,
        }
    }

    fn interaction_potential(&self) -> f64 {
        let sys = &self.system;
        if sys.interaction_strength == 0.0 {
            return 0.0;
        }
        let n = sys.particle_count();
        let mut v = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                let r2 = (self.particle(i) - self.particle(j)).norm_squared();
                v += sys.charges[i] * sys.charges[j] * sys.soft_coulomb(r2);
            }
        }
        sys.interaction_strength * v
    }

    fn gaussian_kernel(distance_squared: f64, tau: f64) -> f64 {
        (-distance_squared / (2.0 * tau)).exp()
    }
}

impl Walker for ParticleWalker {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    fn diffuse<R: Rng + ?Sized>(&mut self, tau: f64, rng: &mut R) {
        let scale = tau.sqrt();
        for x in self.positions.iter_mut() {
            let step: f64 = StandardNormal.sample(rng);
            *x += scale * step;
        }
    }

    fn potential(&self) -> f64 {
        self.external_potential() + self.interaction_potential()
    }

    /// Swap a random identical pair and flip the sign.
    fn exchange<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let pairs = &self.system.identical_pairs;
        if pairs.is_empty() || rng.gen::<f64>() >= self.system.exchange_probability {
            return;
        }
        let (i, j) = pairs[rng.gen_range(0..pairs.len())];
        self.swap_particles(i, j);
        self.weight = -self.weight;
    }

    fn diffusive_greens_function(&self, target: &Self, tau: f64) -> f64 {
        Self::gaussian_kernel((&target.positions - &self.positions).norm_squared(), tau)
    }

    /// Images are the identity and every single transposition of identical
    /// particles; transpositions are odd.
    fn exchange_diffusive_gf(&self, target: &Self, tau: f64) -> SignedAmplitude {
        let mut amplitude = SignedAmplitude::new(self.diffusive_greens_function(target, tau), 0.0);
        let mut image = self.clone();
        for &(i, j) in self.system.identical_pairs.iter() {
            image.swap_particles(i, j);
            amplitude.opposite += image.diffusive_greens_function(target, tau);
            image.swap_particles(i, j);
        }
        amplitude
    }

    /// Only defined in 1D, where the node is any coincidence of identical
    /// particles.
    fn crossed_nodal_surface(&self, after: &Self) -> bool {
        if self.system.dimensions != 1 {
            return false;
        }
        self.system.identical_pairs.iter().any(|&(i, j)| {
            sign(self.positions[i] - self.positions[j]) != sign(after.positions[i] - after.positions[j])
        })
    }

    fn cancel_probability(&self, other: &Self, tau: f64) -> f64 {
        if sign(self.weight) * sign(other.weight) >= 0 {
            return 0.0;
        }
        // Overlap of the two diffusion kernels relative to a kernel with itself.
        let r2 = (&self.positions - &other.positions).norm_squared();
        (-r2 / (4.0 * tau)).exp()
    }

    fn coordinates(&self) -> DVector<f64> {
        self.positions.clone()
    }

    fn set_coordinates(&mut self, coordinates: &DVector<f64>) {
        self.positions.copy_from(coordinates);
    }

    /// Order identical particles by their first coordinate, flipping the sign
    /// once per transposition.
    fn reflect_to_irreducible(&mut self) {
        let d = self.system.dimensions;
        let n = self.system.particle_count();
        // Insertion sort so that the parity is counted swap by swap.
        for i in 1..n {
            let mut k = i;
            while k > 0 {
                let prev = (0..k)
                    .rev()
                    .find(|&m| self.system.species[m] == self.system.species[k]);
                match prev {
                    Some(m) if self.positions[m * d] > self.positions[k * d] => {
                        self.swap_particles(m, k);
                        self.weight = -self.weight;
                        k = m;
                    }
                    _ => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn two_fermions_1d(exchange_probability: f64) -> Arc<ParticleSystem> {
        let params = SystemParams {
            particles: vec![
                ParticleParams { charge: -1.0, species: 0, position: None },
                ParticleParams { charge: -1.0, species: 0, position: None },
            ],
            external: ExternalPotential::Harmonic { omega: 1.0 },
            interaction_strength: 0.0,
            softening: 0.01,
            exchange_probability,
        };
        Arc::new(ParticleSystem::from_params(&params, 1).unwrap())
    }

    fn walker_at(system: &Arc<ParticleSystem>, coords: &[f64], weight: f64) -> ParticleWalker {
        let mut w = ParticleWalker::new(Arc::clone(system));
        w.set_coordinates(&DVector::from_column_slice(coords));
        w.set_weight(weight);
        w
    }

    #[test]
    fn test_default_positions_are_spread() {
        let system = two_fermions_1d(0.0);
        let w = ParticleWalker::new(Arc::clone(&system));
        assert_eq!(w.coordinates(), DVector::from_vec(vec![-0.5, 0.5]));
        assert_eq!(w.weight(), 1.0);
    }

    #[test]
    fn test_harmonic_potential() {
        let system = two_fermions_1d(0.0);
        let w = walker_at(&system, &[1.0, -2.0], 1.0);
        assert_relative_eq!(w.potential(), 2.5);
    }

    #[test]
    fn test_coulomb_potential() {
        let params = SystemParams {
            particles: vec![ParticleParams {
                charge: -1.0,
                species: 0,
                position: Some(vec![1.0, 0.0, 0.0]),
            }],
            external: ExternalPotential::Coulomb {
                nuclei: vec![Nucleus { charge: 1.0, position: vec![0.0, 0.0, 0.0] }],
            },
            interaction_strength: 1.0,
            softening: 0.0,
            exchange_probability: 0.0,
        };
        let system = Arc::new(ParticleSystem::from_params(&params, 3).unwrap());
        let w = ParticleWalker::new(system);
        assert_relative_eq!(w.potential(), -1.0);
    }

    #[test]
    fn test_soft_core_interaction() {
        let params = SystemParams {
            particles: vec![
                ParticleParams { charge: -1.0, species: 0, position: Some(vec![0.0]) },
                ParticleParams { charge: -1.0, species: 1, position: Some(vec![0.0]) },
            ],
            external: ExternalPotential::Free,
            interaction_strength: 2.0,
            softening: 0.5,
            exchange_probability: 0.0,
        };
        let system = Arc::new(ParticleSystem::from_params(&params, 1).unwrap());
        let w = ParticleWalker::new(system);
        assert_relative_eq!(w.potential(), 4.0);
    }

    #[test]
    fn test_invalid_position_is_rejected() {
        let params = SystemParams {
            particles: vec![ParticleParams { charge: -1.0, species: 0, position: Some(vec![0.0]) }],
            ..SystemParams::default()
        };
        assert!(matches!(ParticleSystem::from_params(&params, 3), Err(DmcError::Config(_))));
    }

    #[test]
    fn test_exchange_swaps_and_flips_sign() {
        let system = two_fermions_1d(1.0);
        let mut w = walker_at(&system, &[-1.0, 2.0], 0.5);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        w.exchange(&mut rng);
        assert_eq!(w.coordinates(), DVector::from_vec(vec![2.0, -1.0]));
        assert_eq!(w.weight(), -0.5);
    }

    #[test]
    fn test_nodal_crossing_in_1d() {
        let system = two_fermions_1d(0.0);
        let before = walker_at(&system, &[-0.1, 0.1], 1.0);
        let crossed = walker_at(&system, &[0.2, 0.1], 1.0);
        let stayed = walker_at(&system, &[-0.3, 0.4], 1.0);
        assert!(before.crossed_nodal_surface(&crossed));
        assert!(!before.crossed_nodal_surface(&stayed));
    }

    #[test]
    fn test_exchange_diffusive_gf_images() {
        let system = two_fermions_1d(0.0);
        let tau = 0.5;
        let source = walker_at(&system, &[-1.0, 1.0], 1.0);
        let target = walker_at(&system, &[1.0, -1.0], 1.0);
        let amplitude = source.exchange_diffusive_gf(&target, tau);
        assert_relative_eq!(amplitude.same, (-8.0_f64 / (2.0 * tau)).exp());
        assert_relative_eq!(amplitude.opposite, 1.0);
    }

    #[test]
    fn test_cancel_probability_is_symmetric() {
        let system = two_fermions_1d(0.0);
        let a = walker_at(&system, &[-1.0, 0.5], 1.0);
        let b = walker_at(&system, &[-0.8, 0.7], -2.0);
        let c = walker_at(&system, &[-0.8, 0.7], 2.0);
        let tau = 0.1;
        assert_relative_eq!(a.cancel_probability(&b, tau), b.cancel_probability(&a, tau));
        assert_relative_eq!(a.cancel_probability(&b, tau), (-0.08_f64 / 0.4).exp());
        assert_eq!(a.cancel_probability(&c, tau), 0.0);
    }

    #[test]
    fn test_reflect_to_irreducible_orders_identical_particles() {
        let system = two_fermions_1d(0.0);
        let mut w = walker_at(&system, &[0.7, -0.2], 1.0);
        w.reflect_to_irreducible();
        assert_eq!(w.coordinates(), DVector::from_vec(vec![-0.2, 0.7]));
        assert_eq!(w.weight(), -1.0);

        w.reflect_to_irreducible();
        assert_eq!(w.weight(), -1.0);
    }

    #[test]
    fn test_diffusion_variance() {
        let system = two_fermions_1d(0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let tau = 0.04;
        let n = 20_000;
        let mut sum_sq = 0.0;
        for _ in 0..n {
            let mut w = walker_at(&system, &[0.0, 0.0], 1.0);
            w.diffuse(tau, &mut rng);
            sum_sq += w.coordinates().norm_squared();
        }
        assert_relative_eq!(sum_sq / (2 * n) as f64, tau, epsilon = 2e-3);
    }
}
