//! Sign cancellation between walkers of opposite sign.
//!
//! Two disciplines are provided: explicit pairwise cancellation, and the
//! wavefunction-referenced split of the diffused wavefunction into same-sign
//! and opposite-sign amplitudes used by the separation diffusion schemes.

use tracing::debug;

use super::traits::{sign, SignedAmplitude, Walker};

/// The prior-iteration population viewed as a field
/// ψ_D(c) = Σ_i w_i G_D(c ← x_i, τ).
pub struct ReferenceField<'a, W: Walker> {
    walkers: &'a [W],
    self_gf_strength: f64,
}

impl<'a, W: Walker> ReferenceField<'a, W> {
    /// `self_gf_strength` damps the contribution of the walker sitting at
    /// `self_index` when one is given.
    pub fn new(walkers: &'a [W], self_gf_strength: f64) -> Self {
        Self {
            walkers,
            self_gf_strength,
        }
    }

    fn amplitude_factor(&self, n: usize, self_index: Option<usize>) -> f64 {
        if Some(n) == self_index {
            self.self_gf_strength
        } else {
            1.0
        }
    }

    /// Scalar diffused wavefunction at the configuration of `target`.
    pub fn amplitude(&self, target: &W, tau: f64, self_index: Option<usize>) -> f64 {
        self.walkers
            .iter()
            .enumerate()
            .map(|(n, w)| {
                self.amplitude_factor(n, self_index)
                    * w.weight()
                    * w.diffusive_greens_function(target, tau)
            })
            .sum()
    }

    /// Diffused wavefunction split by sign relative to `target`.
    pub fn signed_amplitude(
        &self,
        target: &W,
        tau: f64,
        self_index: Option<usize>,
    ) -> SignedAmplitude {
        let mut psi = SignedAmplitude::default();
        for (n, w) in self.walkers.iter().enumerate() {
            let gf = self.amplitude_factor(n, self_index)
                * w.weight().abs()
                * w.diffusive_greens_function(target, tau);
            if sign(w.weight()) * sign(target.weight()) == 1 {
                psi.same += gf;
            } else {
                psi.opposite += gf;
            }
        }
        psi
    }

    /// As [`Self::signed_amplitude`], including every walker's exchange images.
    ///
    /// Each walker reports its images relative to its own sign; when that sign
    /// differs from the target's the attribution is swapped.
    pub fn exchange_signed_amplitude(
        &self,
        target: &W,
        tau: f64,
        self_index: Option<usize>,
    ) -> SignedAmplitude {
        let mut psi = SignedAmplitude::default();
        for (n, w) in self.walkers.iter().enumerate() {
            let gf = w
                .exchange_diffusive_gf(target, tau)
                .scaled(self.amplitude_factor(n, self_index) * w.weight().abs());
            if sign(w.weight()) * sign(target.weight()) == 1 {
                psi += gf;
            } else {
                psi += gf.swapped();
            }
        }
        psi
    }
}

/// Attenuate every unordered pair (i < j) by `1 - p_ij`, then divide all
/// weights by the mean |weight|. Returns the total |Δw| removed before the
/// renormalization.
///
/// Cost is O(n²) and only walkers on this rank take part.
pub fn apply_pairwise_cancellations<W: Walker>(walkers: &mut [W], tau: f64) -> f64 {
    let before: Vec<f64> = walkers.iter().map(|w| w.weight()).collect();

    for i in 0..walkers.len() {
        for j in (i + 1)..walkers.len() {
            let p = walkers[i]
                .cancel_probability(&walkers[j], tau)
                .clamp(0.0, 1.0);
            if p > 0.0 {
                walkers[i].scale_weight(1.0 - p);
                walkers[j].scale_weight(1.0 - p);
            }
        }
    }

    let cancelled: f64 = before
        .iter()
        .zip(walkers.iter())
        .map(|(b, w)| (b - w.weight()).abs())
        .sum();
    debug!(cancelled, "pairwise cancellation");

    renormalize_mean_mod_weight(walkers);
    cancelled
}

/// Divide all weights by the mean |weight| so the weight scale stays O(1).
pub fn renormalize_mean_mod_weight<W: Walker>(walkers: &mut [W]) {
    if walkers.is_empty() {
        return;
    }
    let mean = walkers.iter().map(|w| w.weight().abs()).sum::<f64>() / walkers.len() as f64;
    if mean > 0.0 && mean.is_finite() {
        for w in walkers.iter_mut() {
            w.scale_weight(1.0 / mean);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticWalker;
    use approx::assert_relative_eq;

    #[test]
    fn test_amplitude_with_self_damping() {
        let reference = vec![StaticWalker::new(0.0, 1.0), StaticWalker::new(1.0, -2.0)];
        let field = ReferenceField::new(&reference, 0.5);
        let target = StaticWalker::new(0.0, 1.0);

        let tau = 0.5;
        let g01 = (-1.0_f64 / (2.0 * tau)).exp();
        assert_relative_eq!(field.amplitude(&target, tau, None), 1.0 - 2.0 * g01, epsilon = 1e-12);
        assert_relative_eq!(
            field.amplitude(&target, tau, Some(0)),
            0.5 - 2.0 * g01,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_signed_amplitude_split() {
        let reference = vec![StaticWalker::new(0.0, 1.0), StaticWalker::new(0.0, -3.0)];
        let field = ReferenceField::new(&reference, 1.0);

        let positive = StaticWalker::new(0.0, 2.0);
        let psi = field.signed_amplitude(&positive, 1.0, None);
        assert_relative_eq!(psi.same, 1.0);
        assert_relative_eq!(psi.opposite, 3.0);

        let negative = StaticWalker::new(0.0, -2.0);
        let psi = field.signed_amplitude(&negative, 1.0, None);
        assert_relative_eq!(psi.same, 3.0);
        assert_relative_eq!(psi.opposite, 1.0);
    }

    #[test]
    fn test_exchange_signed_amplitude_swaps_for_opposite_walkers() {
        let reference = vec![StaticWalker::new(0.5, -1.0)];
        let field = ReferenceField::new(&reference, 1.0);
        let target = StaticWalker::new(0.5, 1.0);
        let tau = 1.0;

        let psi = field.exchange_signed_amplitude(&target, tau, None);
        let image = reference[0].exchange_diffusive_gf(&target, tau);
        assert_relative_eq!(psi.same, image.opposite, epsilon = 1e-12);
        assert_relative_eq!(psi.opposite, image.same, epsilon = 1e-12);
    }

    #[test]
    fn test_pairwise_cancellation_is_symmetric() {
        let tau = 0.1;
        let mut walkers = vec![StaticWalker::new(0.0, 1.0), StaticWalker::new(0.2, -1.0)];
        let p_ab = walkers[0].cancel_probability(&walkers[1], tau);
        let p_ba = walkers[1].cancel_probability(&walkers[0], tau);
        assert_relative_eq!(p_ab, p_ba);
        assert!(p_ab > 0.0);

        let cancelled = apply_pairwise_cancellations(&mut walkers, tau);
        assert_relative_eq!(cancelled, 2.0 * p_ab, epsilon = 1e-12);
        // Both scaled by the same factor, then renormalized to mean |w| = 1.
        assert_relative_eq!(walkers[0].weight, 1.0, epsilon = 1e-12);
        assert_relative_eq!(walkers[1].weight, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_same_sign_walkers_do_not_cancel() {
        let mut walkers = vec![
            StaticWalker::new(0.0, 2.0),
            StaticWalker::new(0.0, 1.0),
            StaticWalker::new(0.0, 3.0),
        ];
        let cancelled = apply_pairwise_cancellations(&mut walkers, 0.1);
        assert_eq!(cancelled, 0.0);
        assert_relative_eq!(walkers[0].weight, 1.0);
        assert_relative_eq!(walkers[1].weight, 0.5);
        assert_relative_eq!(walkers[2].weight, 1.5);
    }
}
