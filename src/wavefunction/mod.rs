//! Trial wavefunctions for the drift-diffusion family.

mod gaussian;
mod traits;

pub use gaussian::GaussianTrial;
pub use traits::TrialWavefunction;
