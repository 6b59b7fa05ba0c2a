//! Physical systems the engine can simulate.

mod particles;

pub use particles::{ExternalPotential, Nucleus, ParticleParams, ParticleSystem, ParticleWalker, SystemParams};
