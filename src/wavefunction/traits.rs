//! Trial wavefunction trait used by the drift-diffusion family.
//!
//! Coordinates are the flattened walker configuration, so the same trait
//! serves any number of particles and dimensions.

use nalgebra::DVector;

pub trait TrialWavefunction {
    /// Evaluate ψ at `r`.
    fn evaluate(&self, r: &DVector<f64>) -> f64;

    /// Gradient of ψ by central differences with step `h`.
    fn gradient(&self, r: &DVector<f64>, h: f64) -> DVector<f64> {
        let mut grad = DVector::zeros(r.len());
        for axis in 0..r.len() {
            let mut r_fwd = r.clone();
            let mut r_bwd = r.clone();
            r_fwd[axis] += h;
            r_bwd[axis] -= h;
            grad[axis] = (self.evaluate(&r_fwd) - self.evaluate(&r_bwd)) / (2.0 * h);
        }
        grad
    }

    /// Laplacian of ψ by central differences with step `h`.
    fn laplacian(&self, r: &DVector<f64>, h: f64) -> f64 {
        let psi = self.evaluate(r);
        let mut laplacian = 0.0;
        for axis in 0..r.len() {
            let mut r_fwd = r.clone();
            let mut r_bwd = r.clone();
            r_fwd[axis] += h;
            r_bwd[axis] -= h;
            laplacian += (self.evaluate(&r_fwd) - 2.0 * psi + self.evaluate(&r_bwd)) / (h * h);
        }
        laplacian
    }

    /// Drift velocity v = ∇ψ/ψ.
    fn drift_velocity(&self, r: &DVector<f64>, h: f64) -> DVector<f64> {
        self.gradient(r, h) / self.evaluate(r)
    }

    /// Local energy E_L = −½∇²ψ/ψ + V.
    fn local_energy(&self, r: &DVector<f64>, potential: f64, h: f64) -> f64 {
        -0.5 * self.laplacian(r, h) / self.evaluate(r) + potential
    }
}
