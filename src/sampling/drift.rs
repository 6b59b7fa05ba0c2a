//! Drift-diffusion family: importance-sampled DMC guided by a trial
//! wavefunction.
//!
//! Walkers are created by Metropolis sampling of |ψ|², move by a drift
//! `τ ∇ψ/ψ` plus free diffusion, die when ψ changes sign (fixed node) and are
//! reweighted with the branching Green's function built from local energies.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::error::{DmcError, Result};
use crate::wavefunction::TrialWavefunction;

use super::control::PopulationSnapshot;
use super::context::SimulationContext;
use super::diffusion::kill;
use super::greens::branching_greens_function;
use super::population::{Propagation, PropagationConfig, RevertReason, WalkerPopulation};
use super::reducer::DistributedReducer;
use super::traits::{sign, Walker};

/// Parameters of the Metropolis sampler used to seed the population.
#[derive(Copy, Clone, Debug)]
pub struct MetropolisParams {
    /// Standard deviation of the Gaussian proposal
    pub step: f64,
    /// Moves between two recorded samples
    pub decorrelation: usize,
}

/// Single Metropolis chain over |ψ|².
pub struct MetropolisChain<'a, W: Walker, T: TrialWavefunction> {
    trial: &'a T,
    current: W,
    psi: f64,
    proposal: Normal<f64>,
    pub accepted: usize,
    pub proposed: usize,
}

impl<'a, W: Walker, T: TrialWavefunction> MetropolisChain<'a, W, T> {
    pub fn new(start: &W, trial: &'a T, step: f64) -> Result<Self> {
        let proposal = Normal::new(0.0, step)
            .map_err(|e| DmcError::config(format!("invalid metropolis_step {step}: {e}")))?;
        let current = start.copy();
        let psi = trial.evaluate(&current.coordinates());
        Ok(Self {
            trial,
            current,
            psi,
            proposal,
            accepted: 0,
            proposed: 0,
        })
    }

    /// One proposal; returns whether it was accepted.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        let mut proposed = self.current.coordinates();
        for x in proposed.iter_mut() {
            *x += self.proposal.sample(rng);
        }
        let new_psi = self.trial.evaluate(&proposed);
        let acceptance_ratio = (new_psi / self.psi).powi(2);
        self.proposed += 1;

        // A chain stuck on a node (ψ = 0) accepts anything with ψ ≠ 0.
        if self.psi == 0.0 || rng.gen::<f64>() < acceptance_ratio {
            self.current.set_coordinates(&proposed);
            self.psi = new_psi;
            self.accepted += 1;
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> &W {
        &self.current
    }

    pub fn acceptance_rate(&self) -> f64 {
        self.accepted as f64 / self.proposed.max(1) as f64
    }
}

/// `count` unit-weight walkers sampled from |ψ|², starting at `prototype`.
pub fn metropolis_population<W, T, R>(
    prototype: &W,
    trial: &T,
    count: usize,
    params: &MetropolisParams,
    rng: &mut R,
) -> Result<WalkerPopulation<W>>
where
    W: Walker,
    T: TrialWavefunction,
    R: Rng + ?Sized,
{
    let mut chain = MetropolisChain::new(prototype, trial, params.step)?;
    let decorrelation = params.decorrelation.max(1);

    // Burn-in before the first recorded sample.
    for _ in 0..10 * decorrelation {
        chain.step(rng);
    }

    let mut walkers = Vec::with_capacity(2 * count);
    for _ in 0..count {
        for _ in 0..decorrelation {
            chain.step(rng);
        }
        let mut w = chain.current().copy();
        w.set_weight(1.0);
        walkers.push(w);
    }
    debug!(
        samples = count,
        acceptance = chain.acceptance_rate(),
        "metropolis initialization"
    );

    let mut prototype = prototype.copy();
    prototype.set_weight(1.0);
    Ok(WalkerPopulation::from_walkers(walkers, prototype))
}

impl<W: Walker> WalkerPopulation<W> {
    /// One drift-diffusion iteration.
    ///
    /// The trial energy is updated before the explosion check so that every
    /// rank makes the same collective calls whatever its local outcome.
    pub fn diffuse_and_branch<T, R, D>(
        &mut self,
        trial: &T,
        config: &PropagationConfig,
        finite_difference_step: f64,
        ctx: &mut SimulationContext,
        rng: &mut R,
        reducer: &D,
    ) -> Result<Propagation>
    where
        T: TrialWavefunction,
        R: Rng + ?Sized,
        D: DistributedReducer + ?Sized,
    {
        let tau = config.diffusion.tau;
        let h = finite_difference_step;
        self.accumulator.reset();
        let population_before = self.len() as f64;

        for w in self.walkers.iter_mut() {
            let before = w.coordinates();
            let psi_before = trial.evaluate(&before);
            if sign(psi_before) == 0 {
                kill(w, ctx);
                continue;
            }
            let el_before = trial.local_energy(&before, w.potential(), h);
            let drift = trial.drift_velocity(&before, h) * tau;

            w.diffuse(tau, rng);
            let after = w.coordinates() + drift;
            w.set_coordinates(&after);

            if sign(trial.evaluate(&after)) != sign(psi_before) {
                kill(w, ctx);
                continue;
            }
            let el_after = trial.local_energy(&after, w.potential(), h);
            w.scale_weight(branching_greens_function(tau, el_before, el_after, ctx.trial_energy));
            self.accumulator.accumulate(el_after, w.weight());
        }

        let sum_mod_weight = self.sum_mod_weight();
        let mixed_energy = self.accumulator.finalize(sum_mod_weight);
        self.expectation = mixed_energy;

        // G_b already carries exp(E_T τ); the growth estimator wants the
        // population change without it.
        let snapshot = PopulationSnapshot {
            population_before,
            sum_mod_weight: sum_mod_weight / (ctx.trial_energy * tau).exp(),
            reference_energy: mixed_energy,
        };
        let trial_energy = config.controller.update(ctx, &snapshot, reducer);
        debug!(iteration = ctx.iteration, mixed_energy, trial_energy, "drift-diffusion step");

        if self.exceeds_weight(config.max_weight) {
            return Ok(Propagation::Reverted(RevertReason::Explosion));
        }

        self.branch(config.max_offspring, rng);
        if self.is_empty() {
            return Ok(Propagation::Reverted(RevertReason::Collapse));
        }
        Ok(Propagation::Completed)
    }
}
