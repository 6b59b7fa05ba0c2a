//! The walker population and its per-iteration propagation.

use rand::Rng;
use tracing::debug;

use crate::error::Result;

use super::branching::{branch, BranchStats};
use super::cancellation::apply_pairwise_cancellations;
use super::context::{ExpectationAccumulator, SimulationContext};
use super::control::{PopulationController, PopulationSnapshot};
use super::diffusion::{DiffusionParams, DiffusionScheme};
use super::reducer::DistributedReducer;
use super::traits::Walker;

/// Why an iteration has to be thrown away.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RevertReason {
    /// Some |weight| exceeded the configured maximum before branching
    Explosion,
    /// No walkers survived branching
    Collapse,
}

/// Outcome of one iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Propagation {
    Completed,
    /// The caller must restore the pre-iteration population
    Reverted(RevertReason),
}

impl Propagation {
    pub fn is_reverted(&self) -> bool {
        matches!(self, Propagation::Reverted(_))
    }
}

/// Resolved settings for [`WalkerPopulation::propagate`].
#[derive(Copy, Clone, Debug)]
pub struct PropagationConfig {
    pub scheme: DiffusionScheme,
    pub diffusion: DiffusionParams,
    pub controller: PopulationController,
    /// Revert threshold on |weight| after renormalization
    pub max_weight: f64,
    /// Cap on the number of copies a single walker may branch into
    pub max_offspring: Option<usize>,
    /// Run pairwise cancellation after diffusion and exchange
    pub pairwise_cancellation: bool,
    /// Cancellation time step as a multiple of the diffusion time step
    pub cancellation_tau_ratio: f64,
}

impl PropagationConfig {
    pub fn cancellation_tau(&self) -> f64 {
        self.diffusion.tau * self.cancellation_tau_ratio
    }
}

/// Walkers owned by this rank.
///
/// The population exclusively owns its walkers. In-place updates happen
/// during diffusion and cancellation; branching replaces the whole
/// generation at once.
#[derive(Clone, Debug)]
pub struct WalkerPopulation<W: Walker> {
    pub(crate) walkers: Vec<W>,
    pub(crate) prototype: W,
    pub(crate) accumulator: ExpectationAccumulator,
    pub(crate) expectation: f64,
}

impl<W: Walker> WalkerPopulation<W> {
    /// Wrap existing walkers. `prototype` is any walker of the same system.
    pub fn from_walkers(walkers: Vec<W>, prototype: W) -> Self {
        Self {
            walkers,
            prototype,
            accumulator: ExpectationAccumulator::default(),
            expectation: f64::NAN,
        }
    }

    /// `count` copies of `initial`, each diffused for `pre_diffusion` and
    /// reflected into the irreducible sector.
    pub fn pre_diffused<R: Rng + ?Sized>(
        initial: W,
        count: usize,
        pre_diffusion: f64,
        rng: &mut R,
    ) -> Self {
        // Room for the population to fluctuate without reallocating.
        let mut walkers = Vec::with_capacity(2 * count);
        for _ in 0..count {
            let mut w = initial.copy();
            w.diffuse(pre_diffusion, rng);
            w.reflect_to_irreducible();
            walkers.push(w);
        }
        Self::from_walkers(walkers, initial)
    }

    pub fn len(&self) -> usize {
        self.walkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.walkers.is_empty()
    }

    pub fn walkers(&self) -> &[W] {
        &self.walkers
    }

    pub fn walkers_mut(&mut self) -> &mut [W] {
        &mut self.walkers
    }

    pub fn prototype(&self) -> &W {
        &self.prototype
    }

    /// Deep copy of every walker.
    pub fn copy(&self) -> Self {
        Self {
            walkers: self.walkers.iter().map(|w| w.copy()).collect(),
            prototype: self.prototype.copy(),
            accumulator: self.accumulator,
            expectation: self.expectation,
        }
    }

    /// True when both populations hold the same walkers in the same order.
    pub fn same_state(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .walkers
                .iter()
                .zip(other.walkers.iter())
                .all(|(a, b)| a.same_state(b))
    }

    /// Last finalized expectation value (mixed potential or local energy).
    pub fn expectation_value(&self) -> f64 {
        self.expectation
    }

    pub fn make_exchange_moves<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for w in self.walkers.iter_mut() {
            w.exchange(rng);
        }
    }

    /// Pairwise cancellation on this rank, recorded in the context.
    pub fn apply_cancellations(&mut self, tau: f64, ctx: &mut SimulationContext) {
        ctx.cancelled_weight = apply_pairwise_cancellations(&mut self.walkers, tau);
    }

    /// Replace the current generation with its branched offspring.
    pub fn branch<R: Rng + ?Sized>(&mut self, max_offspring: Option<usize>, rng: &mut R) -> BranchStats {
        let generation = std::mem::take(&mut self.walkers);
        let (next, stats) = branch(generation, max_offspring, rng);
        self.walkers = next;
        stats
    }

    /// Σ|w|, the effective population.
    pub fn sum_mod_weight(&self) -> f64 {
        self.walkers.iter().map(|w| w.weight().abs()).sum()
    }

    pub fn average_weight(&self) -> f64 {
        self.walkers.iter().map(|w| w.weight()).sum::<f64>() / self.len() as f64
    }

    pub fn average_mod_weight(&self) -> f64 {
        self.sum_mod_weight() / self.len() as f64
    }

    pub fn average_mod_weight_squared(&self) -> f64 {
        self.walkers.iter().map(|w| w.weight().powi(2)).sum::<f64>() / self.len() as f64
    }

    /// Σ|w_i| v_i / Σ|w_i|.
    pub fn average_potential(&self) -> f64 {
        let (pot, weight) = self.walkers.iter().fold((0.0, 0.0), |(pot, weight), w| {
            let mod_w = w.weight().abs();
            (pot + w.potential() * mod_w, weight + mod_w)
        });
        pot / weight
    }

    pub(crate) fn exceeds_weight(&self, max_weight: f64) -> bool {
        self.walkers.iter().any(|w| w.weight().abs() > max_weight)
    }

    /// One full iteration: diffusion, exchange, optional cancellation,
    /// renormalization, explosion check, branching and collapse check.
    ///
    /// `prior` is an unmodified copy of this population taken before the
    /// iteration; it is both the reference field for the diffusion schemes
    /// and the state to restore when a revert is returned.
    pub fn propagate<R, D>(
        &mut self,
        prior: &Self,
        config: &PropagationConfig,
        ctx: &mut SimulationContext,
        rng: &mut R,
        reducer: &D,
    ) -> Result<Propagation>
    where
        R: Rng + ?Sized,
        D: DistributedReducer + ?Sized,
    {
        self.accumulator.reset();
        let population_before = self.len() as f64;

        config.scheme.apply(
            &mut self.walkers,
            &prior.walkers,
            &self.prototype,
            &config.diffusion,
            ctx,
            rng,
            reducer,
        )?;

        self.make_exchange_moves(rng);

        if config.pairwise_cancellation {
            self.apply_cancellations(config.cancellation_tau(), ctx);
        }

        let snapshot = PopulationSnapshot {
            population_before,
            sum_mod_weight: self.sum_mod_weight(),
            reference_energy: self.average_potential(),
        };
        config
            .controller
            .renormalize(&mut self.walkers, ctx, &snapshot, reducer);

        if self.exceeds_weight(config.max_weight) {
            debug!(iteration = ctx.iteration, "population explosion");
            return Ok(Propagation::Reverted(RevertReason::Explosion));
        }

        for w in self.walkers.iter() {
            self.accumulator.accumulate(w.potential(), w.weight());
        }
        let effective_population = self.sum_mod_weight();

        let stats = self.branch(config.max_offspring, rng);
        debug!(
            iteration = ctx.iteration,
            killed = stats.killed,
            cloned = stats.cloned,
            population = self.len(),
            "branched"
        );

        if self.is_empty() {
            debug!(iteration = ctx.iteration, "population collapse");
            return Ok(Propagation::Reverted(RevertReason::Collapse));
        }

        self.expectation = self.accumulator.finalize(effective_population);
        Ok(Propagation::Completed)
    }
}
