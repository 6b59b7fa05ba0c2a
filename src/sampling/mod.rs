//! Sampling module - the walker-population DMC engine.

mod branching;
mod cancellation;
mod context;
mod control;
mod diffusion;
mod drift;
mod greens;
mod population;
mod reducer;
mod runner;
mod traits;

pub use branching::{branch, branching_decision, offspring_count, BranchStats, BranchingResult};
pub use cancellation::{apply_pairwise_cancellations, renormalize_mean_mod_weight, ReferenceField};
pub use context::{ExpectationAccumulator, SimulationContext};
pub use control::{EnergyEstimator, PopulationController, PopulationSnapshot};
pub use diffusion::{DiffusionParams, DiffusionScheme};
pub use drift::{metropolis_population, MetropolisChain, MetropolisParams};
pub use greens::{branching_greens_function, potential_greens_function};
pub use population::{Propagation, PropagationConfig, RevertReason, WalkerPopulation};
pub use reducer::{DistributedReducer, SingleProcess, ThreadGroup, ThreadRank};
pub use runner::{run_distributed, DmcRunner, DmcSummary};
pub use traits::{sign, SignedAmplitude, Walker};
