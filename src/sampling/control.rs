//! Trial-energy feedback that keeps the population near its target size.

use std::fmt;
use std::str::FromStr;

use crate::error::DmcError;

use super::context::SimulationContext;
use super::reducer::DistributedReducer;
use super::traits::Walker;

/// Estimator used to set the trial energy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EnergyEstimator {
    /// Growth estimator, mixed exponentially with the previous trial energy
    Growth,
    /// Weighted average of the reference energy (potential or local energy)
    Potential,
}

impl FromStr for EnergyEstimator {
    type Err = DmcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "growth" => Ok(Self::Growth),
            "potential" => Ok(Self::Potential),
            _ => Err(DmcError::config(format!(
                "unknown energy_estimator '{s}', expected 'growth' or 'potential'"
            ))),
        }
    }
}

impl fmt::Display for EnergyEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Growth => write!(f, "growth"),
            Self::Potential => write!(f, "potential"),
        }
    }
}

/// Rank-local quantities the estimators reduce over.
#[derive(Copy, Clone, Debug)]
pub struct PopulationSnapshot {
    /// Walker count before this iteration's moves
    pub population_before: f64,
    /// Σ|w| after this iteration's moves
    pub sum_mod_weight: f64,
    /// |w|-weighted average potential (or mixed local energy)
    pub reference_energy: f64,
}

#[derive(Copy, Clone, Debug)]
pub struct PopulationController {
    pub estimator: EnergyEstimator,
    pub tau: f64,
    pub target_population: f64,
    /// Weight α of the previous trial energy in the growth estimator
    pub growth_mixing_factor: f64,
}

impl PopulationController {
    /// Candidate trial energy; identical on every rank. May be non-finite.
    pub fn estimate<D: DistributedReducer + ?Sized>(
        &self,
        trial_energy: f64,
        snapshot: &PopulationSnapshot,
        reducer: &D,
    ) -> f64 {
        match self.estimator {
            EnergyEstimator::Growth => {
                let pop_before = reducer.sum(snapshot.population_before);
                let pop_after = reducer.sum(snapshot.sum_mod_weight);
                let mut estimate = (pop_before / pop_after).ln() / self.tau;
                // Bias towards the target population
                estimate -= (pop_before / self.target_population).ln();
                trial_energy * self.growth_mixing_factor
                    + estimate * (1.0 - self.growth_mixing_factor)
            }
            EnergyEstimator::Potential => {
                let reference = reducer.average(snapshot.reference_energy);
                let effective_population = reducer.sum(snapshot.sum_mod_weight);
                reference - (effective_population / self.target_population).ln()
            }
        }
    }

    /// Update the context's trial energy, keeping the last finite value when
    /// the estimate is not finite. Returns the trial energy in force.
    pub fn update<D: DistributedReducer + ?Sized>(
        &self,
        ctx: &mut SimulationContext,
        snapshot: &PopulationSnapshot,
        reducer: &D,
    ) -> f64 {
        let candidate = self.estimate(ctx.trial_energy, snapshot, reducer);
        ctx.update_trial_energy(candidate);
        ctx.trial_energy
    }

    /// Update the trial energy and multiply every weight by exp(E_T τ).
    pub fn renormalize<W: Walker, D: DistributedReducer + ?Sized>(
        &self,
        walkers: &mut [W],
        ctx: &mut SimulationContext,
        snapshot: &PopulationSnapshot,
        reducer: &D,
    ) {
        let trial_energy = self.update(ctx, snapshot, reducer);
        let gn = (trial_energy * self.tau).exp();
        for w in walkers.iter_mut() {
            w.scale_weight(gn);
        }
    }
}
