//! Rust DMC - a walker-population Diffusion Monte Carlo engine.
//!
//! Walkers diffuse, have their signs or nodes handled by one of several
//! schemes, are reweighted by Green's functions and branched, while a trial
//! energy is tuned to hold the population near its target size. Runs may be
//! split across several ranks that communicate through a
//! [`DistributedReducer`].

pub mod error;
pub mod io;
pub mod sampling;
pub mod systems;
pub mod wavefunction;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root
pub use error::{DmcError, Result};
pub use io::{read_params, DmcParams, RunConfig};
pub use sampling::{
    run_distributed, DiffusionScheme, DistributedReducer, DmcRunner, DmcSummary, EnergyEstimator, Propagation,
    SimulationContext, SingleProcess, ThreadGroup, Walker, WalkerPopulation,
};
pub use systems::{ParticleParams, ParticleSystem, ParticleWalker, SystemParams};
pub use wavefunction::{GaussianTrial, TrialWavefunction};
