//! Energy-dependent parts of the short-time Green's function.
//!
//! Both factors are symmetric in their endpoints and evaluate to exactly 0
//! when either endpoint sits on an infinite potential wall, so a walker that
//! steps into a hard wall dies instead of carrying a NaN weight.

/// Potential part of the Green's function,
/// G_v(x, x', τ) = exp(-τ (V(x) + V(x')) / 2).
pub fn potential_greens_function(tau: f64, pot_before: f64, pot_after: f64) -> f64 {
    if pot_before.is_infinite() || pot_after.is_infinite() {
        return 0.0;
    }
    (-tau * (pot_before + pot_after) / 2.0).exp()
}

/// Branching Green's function with the trial-energy shift,
/// G_b = exp(-τ ((E_L(x) + E_L(x')) / 2 - E_T)).
pub fn branching_greens_function(
    tau: f64,
    local_energy_before: f64,
    local_energy_after: f64,
    trial_energy: f64,
) -> f64 {
    if local_energy_before.is_infinite() || local_energy_after.is_infinite() {
        return 0.0;
    }
    (-tau * ((local_energy_before + local_energy_after) / 2.0 - trial_energy)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_potential_gf_zero_potential() {
        assert_relative_eq!(potential_greens_function(0.01, 0.0, 0.0), 1.0);
    }

    #[test]
    fn test_potential_gf_symmetric() {
        let a = potential_greens_function(0.05, 1.3, -0.4);
        let b = potential_greens_function(0.05, -0.4, 1.3);
        assert_relative_eq!(a, b, epsilon = 1e-15);
        assert_relative_eq!(a, (-0.05_f64 * 0.45).exp(), epsilon = 1e-15);
    }

    #[test]
    fn test_infinite_wall_gives_zero() {
        assert_eq!(potential_greens_function(0.01, f64::INFINITY, 0.0), 0.0);
        assert_eq!(potential_greens_function(0.01, 0.0, f64::INFINITY), 0.0);
        assert_eq!(potential_greens_function(0.01, f64::NEG_INFINITY, 0.0), 0.0);
        assert_eq!(
            branching_greens_function(0.01, 1.0, f64::INFINITY, 0.5),
            0.0
        );
    }

    #[test]
    fn test_branching_gf_at_trial_energy_is_one() {
        assert_relative_eq!(branching_greens_function(0.1, 0.5, 0.5, 0.5), 1.0);
        let g = branching_greens_function(0.1, 1.0, 2.0, 0.5);
        assert_relative_eq!(g, (-0.1_f64 * 1.0).exp(), epsilon = 1e-15);
    }
}
