//! Error types for DMC runs.
//!
//! Population explosion and collapse are not errors: they are reported as
//! [`crate::sampling::Propagation::Reverted`] outcomes. Everything here is
//! fatal for the run.

use thiserror::Error;

/// Fatal errors raised while configuring or driving a simulation.
#[derive(Error, Debug)]
pub enum DmcError {
    /// Invalid or unknown configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// A scheme was selected that cannot run in the configured dimensionality
    #[error("Diffusion scheme '{scheme}' requires 1 dimension, configured with {dimensions}")]
    DimensionMismatch { scheme: String, dimensions: usize },

    /// File system errors
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A rank worker thread panicked
    #[error("Rank {0} terminated abnormally")]
    RankPanicked(usize),

    /// Another rank failed, so this one stopped at the next collective
    #[error("Run aborted after a failure on another rank")]
    PeerAborted,
}

/// Result type alias for DMC operations.
pub type Result<T> = std::result::Result<T, DmcError>;

impl DmcError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}
