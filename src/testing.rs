//! Deterministic one-dimensional walker used by unit tests.

use nalgebra::DVector;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::sampling::{sign, SignedAmplitude, Walker};

/// Single coordinate in 1D with an optional pinned potential.
///
/// The exact node sits at x = 0 and walkers of opposite sign cancel with
/// half the Gaussian overlap of their positions.
#[derive(Clone, Debug, PartialEq)]
pub struct StaticWalker {
    pub x: f64,
    pub weight: f64,
    pub fixed_potential: Option<f64>,
    pub frozen: bool,
    pub scripted_step: Option<f64>,
    pub panics_on_diffuse: bool,
}

impl StaticWalker {
    pub fn new(x: f64, weight: f64) -> Self {
        Self {
            x,
            weight,
            fixed_potential: None,
            frozen: false,
            scripted_step: None,
            panics_on_diffuse: false,
        }
    }

    pub fn with_potential(mut self, potential: f64) -> Self {
        self.fixed_potential = Some(potential);
        self
    }

    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// Panic on the first move, standing in for a faulty walker.
    pub fn panicking(mut self) -> Self {
        self.panics_on_diffuse = true;
        self
    }

    /// Move by a fixed displacement instead of a random one.
    pub fn scripted(mut self, step: f64) -> Self {
        self.scripted_step = Some(step);
        self
    }
}

impl Walker for StaticWalker {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    fn diffuse<R: Rng + ?Sized>(&mut self, tau: f64, rng: &mut R) {
        assert!(!self.panics_on_diffuse, "walker failed to diffuse");
        if self.frozen {
            return;
        }
        match self.scripted_step {
            Some(step) => self.x += step,
            None => {
                let step: f64 = StandardNormal.sample(rng);
                self.x += tau.sqrt() * step;
            }
        }
    }

    fn potential(&self) -> f64 {
        self.fixed_potential.unwrap_or(0.5 * self.x * self.x)
    }

    fn exchange<R: Rng + ?Sized>(&mut self, _rng: &mut R) {}

    fn diffusive_greens_function(&self, target: &Self, tau: f64) -> f64 {
        let dx = target.x - self.x;
        (-dx * dx / (2.0 * tau)).exp()
    }

    fn exchange_diffusive_gf(&self, target: &Self, tau: f64) -> SignedAmplitude {
        // The mirror image -x plays the role of an odd exchange image.
        let direct = self.diffusive_greens_function(target, tau);
        let dx = target.x + self.x;
        SignedAmplitude::new(direct, (-dx * dx / (2.0 * tau)).exp())
    }

    fn crossed_nodal_surface(&self, after: &Self) -> bool {
        sign(self.x) != sign(after.x)
    }

    fn cancel_probability(&self, other: &Self, tau: f64) -> f64 {
        if sign(self.weight) * sign(other.weight) >= 0 {
            return 0.0;
        }
        let dx = self.x - other.x;
        0.5 * (-dx * dx / (4.0 * tau)).exp()
    }

    fn coordinates(&self) -> DVector<f64> {
        DVector::from_vec(vec![self.x])
    }

    fn set_coordinates(&mut self, coordinates: &DVector<f64>) {
        self.x = coordinates[0];
    }
}
