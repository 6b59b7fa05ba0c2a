//! Traits for DMC walkers.

use std::ops::AddAssign;

use nalgebra::DVector;
use rand::Rng;

/// Returns the sign of non-zero values, or 0 for exactly 0.
pub fn sign(value: f64) -> i32 {
    (0.0 < value) as i32 - (value < 0.0) as i32
}

/// Diffused-wavefunction amplitude split by sign relative to a target walker.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SignedAmplitude {
    /// Contributions whose sign matches the target
    pub same: f64,
    /// Contributions of the opposite sign
    pub opposite: f64,
}

impl SignedAmplitude {
    pub fn new(same: f64, opposite: f64) -> Self {
        Self { same, opposite }
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self {
            same: self.same * factor,
            opposite: self.opposite * factor,
        }
    }

    /// Exchange the roles of the two components.
    pub fn swapped(self) -> Self {
        Self {
            same: self.opposite,
            opposite: self.same,
        }
    }

    /// True when the opposite-sign amplitude outweighs the same-sign one.
    pub fn is_dominated(&self) -> bool {
        self.same < self.opposite
    }

    /// Multiplicative weight correction `1 - opposite/same`.
    ///
    /// With no same-sign amplitude at all there is nothing to cancel against,
    /// so the factor is 1.
    pub fn cancellation_factor(&self) -> f64 {
        if self.same > 0.0 {
            1.0 - self.opposite / self.same
        } else {
            1.0
        }
    }
}

impl AddAssign for SignedAmplitude {
    fn add_assign(&mut self, rhs: Self) {
        self.same += rhs.same;
        self.opposite += rhs.opposite;
    }
}

/// A single configuration replica carrying a signed statistical weight.
///
/// The population engine only talks to walkers through this trait; the
/// particle representation, diffusion kernel and potential belong to the
/// implementor.
pub trait Walker: Clone {
    /// Signed weight; the sign labels the sign sector.
    fn weight(&self) -> f64;

    fn set_weight(&mut self, weight: f64);

    fn scale_weight(&mut self, factor: f64) {
        let w = self.weight();
        self.set_weight(w * factor);
    }

    /// Apply a free diffusive move over imaginary time `tau`.
    fn diffuse<R: Rng + ?Sized>(&mut self, tau: f64, rng: &mut R);

    /// Potential energy of the current configuration. May be infinite.
    fn potential(&self) -> f64;

    /// Attempt a symmetry-exchange move.
    fn exchange<R: Rng + ?Sized>(&mut self, rng: &mut R);

    /// Exact copy, weight included.
    fn copy(&self) -> Self {
        self.clone()
    }

    /// Copy produced by branching: unit weight with the sign of the parent.
    fn branch_copy(&self) -> Self {
        let mut child = self.clone();
        child.set_weight(sign(self.weight()) as f64);
        child
    }

    /// Free-particle Green's function G_D(target ← self, tau), without weight.
    fn diffusive_greens_function(&self, target: &Self, tau: f64) -> f64;

    /// Green's function from `self` and all its exchange images to `target`,
    /// split into images that keep the sign of `self` (`same`) and images that
    /// flip it (`opposite`).
    fn exchange_diffusive_gf(&self, target: &Self, tau: f64) -> SignedAmplitude;

    /// Whether the straight move from `self` to `after` crossed the exact
    /// nodal surface.
    fn crossed_nodal_surface(&self, after: &Self) -> bool;

    /// Probability in [0, 1] that `self` and `other` cancel. Must be
    /// symmetric in its two walkers.
    fn cancel_probability(&self, other: &Self, tau: f64) -> f64;

    /// Flattened particle coordinates.
    fn coordinates(&self) -> DVector<f64>;

    fn set_coordinates(&mut self, coordinates: &DVector<f64>);

    /// Map the configuration into the irreducible sector of its symmetry group.
    fn reflect_to_irreducible(&mut self) {}

    /// Structural equality of weight and configuration.
    fn same_state(&self, other: &Self) -> bool {
        self.weight() == other.weight() && self.coordinates() == other.coordinates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sign() {
        assert_eq!(sign(0.0), 0);
        assert_eq!(sign(2.5), 1);
        assert_eq!(sign(-1e-300), -1);
    }

    #[test]
    fn test_signed_amplitude_cancellation_factor() {
        let psi = SignedAmplitude::new(4.0, 1.0);
        assert!(!psi.is_dominated());
        assert_relative_eq!(psi.cancellation_factor(), 0.75, epsilon = 1e-12);
        assert!(psi.swapped().is_dominated());
        assert_relative_eq!(SignedAmplitude::default().cancellation_factor(), 1.0);
    }

    #[test]
    fn test_signed_amplitude_accumulate() {
        let mut total = SignedAmplitude::default();
        total += SignedAmplitude::new(1.0, 2.0).scaled(0.5);
        total += SignedAmplitude::new(1.0, 0.0);
        assert_relative_eq!(total.same, 1.5);
        assert_relative_eq!(total.opposite, 1.0);
    }
}
