use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::traits::TrialWavefunction;

/// ψ(r) = f(r) exp(−α|r|²/2), with f(r) = r_k when `node_axis` is `Some(k)`
/// and 1 otherwise.
///
/// With α = ω this is exact for the harmonic oscillator: the ground state,
/// or the first excited state along coordinate k.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianTrial {
    pub alpha: f64,
    #[serde(default)]
    pub node_axis: Option<usize>,
}

impl GaussianTrial {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, node_axis: None }
    }

    pub fn with_node(alpha: f64, axis: usize) -> Self {
        Self { alpha, node_axis: Some(axis) }
    }

    fn envelope(&self, r: &DVector<f64>) -> f64 {
        (-0.5 * self.alpha * r.norm_squared()).exp()
    }

    /// Closed-form gradient.
    pub fn analytic_gradient(&self, r: &DVector<f64>) -> DVector<f64> {
        let mut grad = r * (-self.alpha * self.evaluate(r));
        if let Some(k) = self.node_axis {
            grad[k] += self.envelope(r);
        }
        grad
    }

    /// Closed-form laplacian.
    pub fn analytic_laplacian(&self, r: &DVector<f64>) -> f64 {
        let d = r.len() as f64;
        let radial = self.alpha * self.alpha * r.norm_squared() - self.alpha * d;
        match self.node_axis {
            Some(_) => self.evaluate(r) * (radial - 2.0 * self.alpha),
            None => self.evaluate(r) * radial,
        }
    }
}

impl TrialWavefunction for GaussianTrial {
    fn evaluate(&self, r: &DVector<f64>) -> f64 {
        let prefactor = match self.node_axis {
            Some(k) => r[k],
            None => 1.0,
        };
        prefactor * self.envelope(r)
    }
}
