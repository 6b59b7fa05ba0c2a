//! Diffusion schemes: free diffusion of every walker together with the
//! nodal or sign handling that distinguishes each approximation.
//!
//! Each scheme ends by applying the potential Green's function. The "before"
//! potential comes from the walker's own pre-move copy for `exact_1d` and
//! from the prior-iteration population, index for index, for every other
//! scheme.

use std::fmt;
use std::str::FromStr;

use nalgebra::DVector;
use rand::Rng;

use crate::error::{DmcError, Result};

use super::cancellation::ReferenceField;
use super::context::SimulationContext;
use super::greens::potential_greens_function;
use super::reducer::DistributedReducer;
use super::traits::{sign, Walker};

/// The interchangeable diffusion schemes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiffusionScheme {
    /// Exact nodal surface, one dimension only
    Exact1d,
    /// Unconstrained diffusion
    Bosonic,
    /// Kill walkers that land where the opposite sign dominates
    MaxSeparation,
    /// As `MaxSeparation`, including exchange images
    ExchangeDiffuse,
    /// Nodal surface of the prior population's diffused wavefunction
    StochasticNodes,
    /// `StochasticNodes` with the reference field spread over all ranks
    StochasticNodesDistributed,
}

impl FromStr for DiffusionScheme {
    type Err = DmcError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "exact_1d" => Ok(Self::Exact1d),
            "bosonic" => Ok(Self::Bosonic),
            "max_seperation" | "max_separation" => Ok(Self::MaxSeparation),
            "exchange_diffuse" => Ok(Self::ExchangeDiffuse),
            "stochastic_nodes" => Ok(Self::StochasticNodes),
            "stochastic_nodes_mpi" => Ok(Self::StochasticNodesDistributed),
            _ => Err(DmcError::config(format!(
                "unknown diffusion_scheme '{s}', expected one of exact_1d, bosonic, \
                 max_seperation, exchange_diffuse, stochastic_nodes, stochastic_nodes_mpi"
            ))),
        }
    }
}

impl fmt::Display for DiffusionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exact1d => "exact_1d",
            Self::Bosonic => "bosonic",
            Self::MaxSeparation => "max_seperation",
            Self::ExchangeDiffuse => "exchange_diffuse",
            Self::StochasticNodes => "stochastic_nodes",
            Self::StochasticNodesDistributed => "stochastic_nodes_mpi",
        };
        write!(f, "{name}")
    }
}

/// Time steps and damping shared by all schemes.
#[derive(Copy, Clone, Debug)]
pub struct DiffusionParams {
    /// Diffusion time step τ
    pub tau: f64,
    /// Time step of the Green's function used to build reference fields
    pub nodal_tau: f64,
    /// Damping of a walker's own prior copy in its reference field
    pub self_gf_strength: f64,
    /// Spatial dimensionality of the system
    pub dimensions: usize,
}

impl DiffusionScheme {
    /// Reject schemes that cannot run in the given dimensionality.
    pub fn validate(&self, dimensions: usize) -> Result<()> {
        if *self == Self::Exact1d && dimensions != 1 {
            return Err(DmcError::DimensionMismatch {
                scheme: self.to_string(),
                dimensions,
            });
        }
        Ok(())
    }

    /// Whether the scheme reads the prior-iteration population.
    pub fn needs_prior(&self) -> bool {
        *self != Self::Exact1d
    }

    /// Run the scheme over this rank's walkers.
    ///
    /// `prior` is the population as it was before this iteration and must
    /// line up index for index with `walkers`. `prototype` is any walker of
    /// the simulated system; the distributed scheme uses it to rebuild
    /// walkers broadcast from other ranks.
    #[allow(clippy::too_many_arguments)]
    pub fn apply<W, R, D>(
        &self,
        walkers: &mut [W],
        prior: &[W],
        prototype: &W,
        params: &DiffusionParams,
        ctx: &mut SimulationContext,
        rng: &mut R,
        reducer: &D,
    ) -> Result<()>
    where
        W: Walker,
        R: Rng + ?Sized,
        D: DistributedReducer + ?Sized,
    {
        self.validate(params.dimensions)?;
        if self.needs_prior() && prior.len() != walkers.len() {
            return Err(DmcError::config(format!(
                "prior population has {} walkers, current has {}",
                prior.len(),
                walkers.len()
            )));
        }

        match self {
            Self::Exact1d => diffuse_exact_1d(walkers, params, ctx, rng),
            Self::Bosonic => diffuse_bosonic(walkers, prior, params, rng),
            Self::MaxSeparation => diffuse_max_separation(walkers, prior, params, ctx, rng),
            Self::ExchangeDiffuse => exchange_diffuse(walkers, prior, params, ctx, rng),
            Self::StochasticNodes => diffuse_stochastic_nodes(walkers, prior, params, ctx, rng),
            Self::StochasticNodesDistributed => {
                diffuse_stochastic_nodes_distributed(walkers, prior, prototype, params, ctx, rng, reducer)
            }
        }
        Ok(())
    }
}

pub(super) fn kill<W: Walker>(walker: &mut W, ctx: &mut SimulationContext) {
    ctx.record_nodal_death(|| walker.coordinates());
    walker.set_weight(0.0);
}

fn apply_potential_gf<W: Walker>(walker: &mut W, pot_before: f64, tau: f64) {
    let pot_after = walker.potential();
    walker.scale_weight(potential_greens_function(tau, pot_before, pot_after));
}

fn diffuse_exact_1d<W: Walker, R: Rng + ?Sized>(
    walkers: &mut [W],
    params: &DiffusionParams,
    ctx: &mut SimulationContext,
    rng: &mut R,
) {
    for w in walkers.iter_mut() {
        let before = w.copy();
        w.diffuse(params.tau, rng);

        if before.crossed_nodal_surface(w) {
            kill(w, ctx);
        }

        apply_potential_gf(w, before.potential(), params.tau);
    }
}

fn diffuse_bosonic<W: Walker, R: Rng + ?Sized>(
    walkers: &mut [W],
    prior: &[W],
    params: &DiffusionParams,
    rng: &mut R,
) {
    for (w, last) in walkers.iter_mut().zip(prior) {
        w.diffuse(params.tau, rng);
        apply_potential_gf(w, last.potential(), params.tau);
    }
}

fn diffuse_max_separation<W: Walker, R: Rng + ?Sized>(
    walkers: &mut [W],
    prior: &[W],
    params: &DiffusionParams,
    ctx: &mut SimulationContext,
    rng: &mut R,
) {
    let field = ReferenceField::new(prior, params.self_gf_strength);
    for (n, w) in walkers.iter_mut().enumerate() {
        w.diffuse(params.tau, rng);
        let psi = field.signed_amplitude(w, params.nodal_tau, Some(n));

        if psi.is_dominated() {
            kill(w, ctx);
        } else {
            w.scale_weight(psi.cancellation_factor());
        }

        apply_potential_gf(w, prior[n].potential(), params.tau);
    }
}

fn exchange_diffuse<W: Walker, R: Rng + ?Sized>(
    walkers: &mut [W],
    prior: &[W],
    params: &DiffusionParams,
    ctx: &mut SimulationContext,
    rng: &mut R,
) {
    let field = ReferenceField::new(prior, params.self_gf_strength);
    for (n, w) in walkers.iter_mut().enumerate() {
        w.diffuse(params.tau, rng);
        let psi = field.exchange_signed_amplitude(w, params.tau, Some(n));

        if psi.is_dominated() {
            kill(w, ctx);
        } else {
            w.scale_weight(psi.cancellation_factor());
        }

        apply_potential_gf(w, prior[n].potential(), params.tau);
    }
}

fn diffuse_stochastic_nodes<W: Walker, R: Rng + ?Sized>(
    walkers: &mut [W],
    prior: &[W],
    params: &DiffusionParams,
    ctx: &mut SimulationContext,
    rng: &mut R,
) {
    let field = ReferenceField::new(prior, params.self_gf_strength);
    for (n, w) in walkers.iter_mut().enumerate() {
        let psi_before = field.amplitude(w, params.nodal_tau, Some(n));
        w.diffuse(params.tau, rng);
        let psi_after = field.amplitude(w, params.nodal_tau, Some(n));

        if sign(psi_before) != sign(psi_after) {
            kill(w, ctx);
        }

        apply_potential_gf(w, prior[n].potential(), params.tau);
    }
}

/// Broadcast a walker from `root` and rebuild it on every rank.
fn share_walker<W: Walker, D: DistributedReducer + ?Sized>(
    local: Option<&W>,
    prototype: &W,
    root: usize,
    reducer: &D,
    buffer: &mut [f64],
) -> W {
    let width = buffer.len() - 1;
    if let Some(w) = local {
        buffer[..width].copy_from_slice(w.coordinates().as_slice());
        buffer[width] = w.weight();
    }
    reducer.broadcast(buffer, root);

    let mut shared = prototype.copy();
    shared.set_coordinates(&DVector::from_column_slice(&buffer[..width]));
    shared.set_weight(buffer[width]);
    shared
}

/// Stochastic nodes with the reference field spread across ranks.
///
/// Ranks take turns as owner. The owner's walker count is broadcast, then
/// each owned walker is handled as a globally synchronized transaction: the
/// pre-move walker is broadcast and every rank adds its partial field sum,
/// the owner diffuses, the same is done for the post-move walker, and the
/// owner alone kills on a sign change. This costs one count broadcast per
/// rank plus two broadcasts and two reductions per walker, all serialized;
/// with unbalanced ranks the number of rounds grows with
/// ranks × largest local population.
fn diffuse_stochastic_nodes_distributed<W, R, D>(
    walkers: &mut [W],
    prior: &[W],
    prototype: &W,
    params: &DiffusionParams,
    ctx: &mut SimulationContext,
    rng: &mut R,
    reducer: &D,
) where
    W: Walker,
    R: Rng + ?Sized,
    D: DistributedReducer + ?Sized,
{
    let field = ReferenceField::new(prior, params.self_gf_strength);
    let mut buffer = vec![0.0; prototype.coordinates().len() + 1];
    let rank = reducer.rank();

    for owner in 0..reducer.size() {
        let owns = rank == owner;
        let local_count = if owns { walkers.len() } else { 0 };
        let count = reducer.broadcast_count(local_count, owner);

        for n in 0..count {
            let before = share_walker(owns.then(|| &walkers[n]), prototype, owner, reducer, &mut buffer);
            let psi_before = reducer.sum(field.amplitude(&before, params.nodal_tau, None));

            if owns {
                walkers[n].diffuse(params.tau, rng);
            }

            let after = share_walker(owns.then(|| &walkers[n]), prototype, owner, reducer, &mut buffer);
            let psi_after = reducer.sum(field.amplitude(&after, params.nodal_tau, None));

            if owns && sign(psi_before) != sign(psi_after) {
                kill(&mut walkers[n], ctx);
            }
        }
    }

    // The potential part is independent of the other ranks.
    for (w, last) in walkers.iter_mut().zip(prior) {
        apply_potential_gf(w, last.potential(), params.tau);
    }
}
