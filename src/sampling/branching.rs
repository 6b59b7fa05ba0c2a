//! Birth-death branching of walkers.

use rand::Rng;

use super::traits::Walker;

/// Branching decision for one walker.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BranchingResult {
    Clone { n: usize }, // n copies, n >= 2
    Keep,               // exactly one copy survives
    Kill,               // no copies survive
}

impl BranchingResult {
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => BranchingResult::Kill,
            1 => BranchingResult::Keep,
            n => BranchingResult::Clone { n },
        }
    }

    pub fn count(&self) -> usize {
        match *self {
            BranchingResult::Kill => 0,
            BranchingResult::Keep => 1,
            BranchingResult::Clone { n } => n,
        }
    }
}

/// Stochastic rounding floor(|w| + U), U ~ Uniform[0, 1), so the expected
/// number of offspring is exactly |w|. Non-finite weights produce none.
pub fn offspring_count<R: Rng + ?Sized>(weight: f64, max_offspring: Option<usize>, rng: &mut R) -> usize {
    let u: f64 = rng.gen();
    let count = (weight.abs() + u).floor();
    if !count.is_finite() {
        return 0;
    }
    let count = count as usize;
    match max_offspring {
        Some(max) => count.min(max),
        None => count,
    }
}

pub fn branching_decision<R: Rng + ?Sized>(
    weight: f64,
    max_offspring: Option<usize>,
    rng: &mut R,
) -> BranchingResult {
    BranchingResult::from_count(offspring_count(weight, max_offspring, rng))
}

/// Counts of what happened during one branching step.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BranchStats {
    pub killed: usize,
    pub kept: usize,
    pub cloned: usize,
}

/// Replace a generation with its offspring.
///
/// Every clone is produced from the untouched previous generation, which is
/// dropped as a whole once the new generation is complete. The size of the
/// result equals the sum of the offspring counts.
pub fn branch<W: Walker, R: Rng + ?Sized>(
    generation: Vec<W>,
    max_offspring: Option<usize>,
    rng: &mut R,
) -> (Vec<W>, BranchStats) {
    let mut next = Vec::with_capacity(generation.len());
    let mut stats = BranchStats::default();

    for walker in generation.iter() {
        let decision = branching_decision(walker.weight(), max_offspring, rng);
        match decision {
            BranchingResult::Kill => stats.killed += 1,
            BranchingResult::Keep => stats.kept += 1,
            BranchingResult::Clone { .. } => stats.cloned += 1,
        }
        for _ in 0..decision.count() {
            next.push(walker.branch_copy());
        }
    }

    (next, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticWalker;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_offspring_expectation_matches_weight() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let n_draws = 200_000;
        for &weight in &[0.0, 0.3, 1.0, -1.7, 2.45] {
            let total: usize = (0..n_draws)
                .map(|_| offspring_count(weight, None, &mut rng))
                .sum();
            let mean = total as f64 / n_draws as f64;
            assert_relative_eq!(mean, f64::abs(weight), epsilon = 0.01);
        }
    }

    #[test]
    fn test_offspring_bounds_and_cap() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..1000 {
            let n = offspring_count(2.5, None, &mut rng);
            assert!(n == 2 || n == 3);
            assert!(offspring_count(10.0, Some(3), &mut rng) <= 3);
            assert_eq!(offspring_count(0.0, None, &mut rng), 0);
            assert_eq!(offspring_count(f64::NAN, None, &mut rng), 0);
        }
    }

    #[test]
    fn test_branching_result_from_count() {
        assert_eq!(BranchingResult::from_count(0), BranchingResult::Kill);
        assert_eq!(BranchingResult::from_count(1), BranchingResult::Keep);
        assert_eq!(BranchingResult::from_count(4), BranchingResult::Clone { n: 4 });
        assert_eq!(BranchingResult::Clone { n: 4 }.count(), 4);
    }

    #[test]
    fn test_branch_produces_unit_weight_copies() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let generation = vec![
            StaticWalker::new(1.0, 3.0),
            StaticWalker::new(2.0, -2.0),
            StaticWalker::new(3.0, 0.0),
        ];
        let (next, stats) = branch(generation, None, &mut rng);

        assert_eq!(next.len(), 5);
        assert_eq!(stats, BranchStats { killed: 1, kept: 0, cloned: 2 });
        assert!(next[..3].iter().all(|w| w.x == 1.0 && w.weight == 1.0));
        assert!(next[3..].iter().all(|w| w.x == 2.0 && w.weight == -1.0));
    }
}
