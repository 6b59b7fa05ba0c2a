//! Per-run mutable simulation state threaded through every iteration.

use nalgebra::DVector;
use tracing::warn;

/// State that survives across iterations, plus per-iteration counters that
/// are reset by [`SimulationContext::begin_iteration`].
#[derive(Clone, Debug)]
pub struct SimulationContext {
    /// Current iteration, starting from 1
    pub iteration: usize,
    /// Trial energy E_T, always finite
    pub trial_energy: f64,
    /// Walkers killed at a nodal surface this iteration
    pub nodal_deaths: usize,
    /// Coordinates of walkers killed at a nodal surface this iteration
    pub nodal_surface: Vec<DVector<f64>>,
    /// Whether kill coordinates are collected
    pub record_nodal_surface: bool,
    /// Total |Δw| removed by pairwise cancellation this iteration
    pub cancelled_weight: f64,
}

impl SimulationContext {
    pub fn new(initial_trial_energy: f64, record_nodal_surface: bool) -> Self {
        Self {
            iteration: 0,
            trial_energy: initial_trial_energy,
            nodal_deaths: 0,
            nodal_surface: Vec::new(),
            record_nodal_surface,
            cancelled_weight: 0.0,
        }
    }

    /// Advance the iteration counter and clear per-iteration diagnostics.
    pub fn begin_iteration(&mut self) {
        self.iteration += 1;
        self.reset_diagnostics();
    }

    /// Clear per-iteration diagnostics without advancing the counter.
    pub fn reset_diagnostics(&mut self) {
        self.nodal_deaths = 0;
        self.nodal_surface.clear();
        self.cancelled_weight = 0.0;
    }

    /// Count a nodal death, keeping its coordinates if recording is on.
    pub fn record_nodal_death(&mut self, coordinates: impl FnOnce() -> DVector<f64>) {
        self.nodal_deaths += 1;
        if self.record_nodal_surface {
            self.nodal_surface.push(coordinates());
        }
    }

    /// Accept `candidate` as the new trial energy if it is finite.
    /// Returns false, keeping the previous value, otherwise.
    pub fn update_trial_energy(&mut self, candidate: f64) -> bool {
        if candidate.is_finite() {
            self.trial_energy = candidate;
            true
        } else {
            warn!(
                iteration = self.iteration,
                candidate,
                retained = self.trial_energy,
                "non-finite trial energy discarded"
            );
            false
        }
    }
}

/// Weighted running sum of a per-walker observable over one iteration.
#[derive(Copy, Clone, Debug, Default)]
pub struct ExpectationAccumulator {
    sum: f64,
    samples: usize,
}

impl ExpectationAccumulator {
    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.samples = 0;
    }

    pub fn accumulate(&mut self, value: f64, weight: f64) {
        if value.is_finite() && weight != 0.0 {
            self.sum += value * weight.abs();
            self.samples += 1;
        }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Normalize the accumulated sum by the resulting population size.
    pub fn finalize(&self, population: f64) -> f64 {
        if population > 0.0 {
            self.sum / population
        } else {
            f64::NAN
        }
    }
}
