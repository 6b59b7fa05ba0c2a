//! Driver loop: initial population, iterations with revert handling, and
//! per-iteration output.

use std::fmt;
use std::io::Write;
use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::error::{DmcError, Result};
use crate::io::{write_nodal_points, write_walkers, ProgressReport, RankFiles, RootFiles, RunConfig};

use super::context::SimulationContext;
use super::drift::metropolis_population;
use super::population::{Propagation, WalkerPopulation};
use super::reducer::{DistributedReducer, SingleProcess, ThreadGroup};
use super::traits::Walker;

/// Outcome of a complete run, identical on every rank.
#[derive(Clone, Debug, PartialEq)]
pub struct DmcSummary {
    pub iterations: usize,
    pub final_trial_energy: f64,
    /// Mean trial energy over the second half of the run
    pub mean_trial_energy: f64,
    pub final_population: f64,
    /// Sum over iterations of the number of ranks that reverted
    pub reverts: usize,
    pub nodal_deaths: usize,
}

impl fmt::Display for DmcSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DMC Simulation Results")?;
        writeln!(f, "----------------------")?;
        writeln!(f, "Iterations: {}", self.iterations)?;
        writeln!(f, "Final trial energy: {:.6} Ha", self.final_trial_energy)?;
        writeln!(f, "Average trial energy (second half): {:.6} Ha", self.mean_trial_energy)?;
        writeln!(f, "Final population: {}", self.final_population)?;
        writeln!(f, "Reverted iterations: {}", self.reverts)?;
        write!(f, "Nodal deaths: {}", self.nodal_deaths)
    }
}

/// One rank's share of a DMC run.
pub struct DmcRunner<W: Walker, D: DistributedReducer> {
    config: RunConfig,
    reducer: D,
    rng: ChaCha8Rng,
    ctx: SimulationContext,
    population: WalkerPopulation<W>,
    root_files: Option<RootFiles>,
    rank_files: RankFiles,
    trial_energies: Vec<f64>,
    reverts: usize,
    nodal_deaths: usize,
    created: Instant,
    started: Instant,
}

impl<W: Walker, D: DistributedReducer> DmcRunner<W, D> {
    /// Build the initial population and open the output files.
    ///
    /// This is a collective call: if any rank fails, all of them return an
    /// error.
    pub fn new(config: RunConfig, prototype: W, reducer: D) -> Result<Self> {
        let created = Instant::now();
        let rank = reducer.rank();
        let mut rng = rank_rng(config.seed, rank);

        let root_files = if reducer.is_root() {
            RootFiles::create(&config.output_dir)
                .and_then(|mut files| files.write_header(&config.source).map(|()| Some(files)))
        } else {
            Ok(None)
        };

        let count = config.initial_population(rank);
        let population = match &config.trial_wavefunction {
            Some(trial) => metropolis_population(&prototype, trial, count, &config.metropolis, &mut rng),
            None => Ok(WalkerPopulation::pre_diffused(prototype, count, config.pre_diffusion, &mut rng)),
        };
        let rank_files = RankFiles::create(
            &config.output_dir,
            rank,
            config.processes,
            config.write_wavefunction_every.is_some(),
            config.write_nodal_surface,
        );

        let setup = match (population, root_files, rank_files) {
            (Ok(population), Ok(root_files), Ok(rank_files)) => Ok((population, root_files, rank_files)),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => Err(e),
        };
        let (population, root_files, rank_files) = agree(&reducer, setup)?;

        Ok(Self {
            ctx: SimulationContext::new(config.trial_energy, config.write_nodal_surface),
            config,
            reducer,
            rng,
            population,
            root_files,
            rank_files,
            trial_energies: Vec::new(),
            reverts: 0,
            nodal_deaths: 0,
            created,
            started: Instant::now(),
        })
    }

    pub fn population(&self) -> &WalkerPopulation<W> {
        &self.population
    }

    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    pub fn run(mut self) -> Result<DmcSummary> {
        let prop = &self.config.propagation;
        if self.reducer.is_root() {
            info!(
                scheme = %prop.scheme,
                estimator = %prop.controller.estimator,
                drift_diffusion = self.config.trial_wavefunction.is_some(),
                iterations = self.config.iterations,
                ranks = self.reducer.size(),
                "starting DMC run"
            );
        }
        let setup_secs = self.created.elapsed().as_secs_f64();
        let announced = match self.root_files.as_mut() {
            Some(files) => files.write_setup_done(setup_secs),
            None => Ok(()),
        };
        agree(&self.reducer, announced)?;
        self.started = Instant::now();

        let mut final_population = self.reducer.sum(self.population.len() as f64);
        for _ in 0..self.config.iterations {
            let iterated = self.iterate();
            let reverted = agree(&self.reducer, iterated)?;
            let written = self.write_output(reverted);
            let report = agree(&self.reducer, written)?;
            final_population = report.population;
        }

        let summary = self.summary(final_population);
        if self.reducer.is_root() {
            info!(
                elapsed_secs = self.started.elapsed().as_secs_f64(),
                trial_energy = summary.mean_trial_energy,
                reverts = summary.reverts,
                "DMC run finished"
            );
            if let Some(files) = self.root_files.as_mut() {
                writeln!(files.progress, "\nDone, total time: {:.3}s.", self.created.elapsed().as_secs_f64())?;
                files.flush()?;
            }
        }
        Ok(summary)
    }

    /// One iteration; returns whether it was reverted on this rank.
    fn iterate(&mut self) -> Result<bool> {
        self.ctx.begin_iteration();
        let snapshot = self.population.copy();

        let outcome = match &self.config.trial_wavefunction {
            Some(trial) => self.population.diffuse_and_branch(
                trial,
                &self.config.propagation,
                self.config.finite_difference_step,
                &mut self.ctx,
                &mut self.rng,
                &self.reducer,
            )?,
            None => self.population.propagate(
                &snapshot,
                &self.config.propagation,
                &mut self.ctx,
                &mut self.rng,
                &self.reducer,
            )?,
        };

        match outcome {
            Propagation::Completed => Ok(false),
            Propagation::Reverted(reason) => {
                warn!(
                    rank = self.reducer.rank(),
                    iteration = self.ctx.iteration,
                    ?reason,
                    "reverting iteration"
                );
                self.population = snapshot;
                Ok(true)
            }
        }
    }

    /// Reduce the iteration's statistics and write them out. Every rank
    /// takes part in the reductions; only the root writes the report.
    fn write_output(&mut self, reverted: bool) -> Result<ProgressReport> {
        let (mut sum_w, mut sum_mod, mut sum_w2, mut sum_pot) = (0.0, 0.0, 0.0, 0.0);
        for w in self.population.walkers() {
            let weight = w.weight();
            sum_w += weight;
            sum_mod += weight.abs();
            sum_w2 += weight * weight;
            sum_pot += weight.abs() * w.potential();
        }

        let r = &self.reducer;
        let population = r.sum(self.population.len() as f64);
        let sum_mod = r.sum(sum_mod);
        let report = ProgressReport {
            iteration: self.ctx.iteration,
            iterations: self.config.iterations,
            tau: self.config.tau(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            trial_energy: r.average(self.ctx.trial_energy),
            population,
            processes: r.size(),
            nodal_deaths: r.sum(self.ctx.nodal_deaths as f64) as usize,
            reverted_ranks: r.sum(f64::from(u8::from(reverted))) as usize,
            average_weight: r.sum(sum_w) / population,
            average_mod_weight: sum_mod / population,
            average_mod_weight_squared: r.sum(sum_w2) / population,
            average_potential: r.sum(sum_pot) / sum_mod,
        };

        self.trial_energies.push(report.trial_energy);
        self.reverts += report.reverted_ranks;
        self.nodal_deaths += report.nodal_deaths;
        debug!(
            rank = r.rank(),
            iteration = report.iteration,
            population = report.population,
            trial_energy = report.trial_energy,
            "iteration complete"
        );

        let iteration = self.ctx.iteration;
        if let Some(files) = self.root_files.as_mut() {
            writeln!(files.progress, "\n{report}")?;
            files.evolution.write_row(&report)?;
            files.flush()?;
        }
        if let Some(out) = self.rank_files.wavefunction.as_mut() {
            if matches!(self.config.write_wavefunction_every, Some(every) if iteration % every == 0) {
                write_walkers(out, iteration, self.population.walkers())?;
            }
        }
        if let Some(out) = self.rank_files.nodal_surface.as_mut() {
            write_nodal_points(out, iteration, &self.ctx.nodal_surface)?;
        }
        self.rank_files.flush()?;

        Ok(report)
    }

    fn summary(&self, final_population: f64) -> DmcSummary {
        let second_half = &self.trial_energies[self.trial_energies.len() / 2..];
        let mean_trial_energy = if second_half.is_empty() {
            self.ctx.trial_energy
        } else {
            second_half.iter().sum::<f64>() / second_half.len() as f64
        };
        DmcSummary {
            iterations: self.trial_energies.len(),
            final_trial_energy: self.trial_energies.last().copied().unwrap_or(self.ctx.trial_energy),
            mean_trial_energy,
            final_population,
            reverts: self.reverts,
            nodal_deaths: self.nodal_deaths,
        }
    }
}

/// Per-rank random stream. With a seed, every rank shares the key and
/// draws from its own stream.
fn rank_rng(seed: Option<u64>, rank: usize) -> ChaCha8Rng {
    match seed {
        Some(seed) => {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(rank as u64);
            rng
        }
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Collective agreement on a local result: if any rank failed or died,
/// every rank returns an error, so no rank is left waiting at a later
/// collective.
fn agree<T, D: DistributedReducer + ?Sized>(reducer: &D, local: Result<T>) -> Result<T> {
    let failures = reducer.sum(if local.is_err() { 1.0 } else { 0.0 });
    match local {
        Err(e) => Err(e),
        Ok(_) if failures > 0.0 || reducer.is_aborted() => Err(DmcError::PeerAborted),
        Ok(value) => Ok(value),
    }
}

/// Run `config.processes` ranks, one thread each, and return the root's
/// summary. `make_prototype` builds the initial walker on each rank.
pub fn run_distributed<W, F>(config: &RunConfig, make_prototype: F) -> Result<DmcSummary>
where
    W: Walker,
    F: Fn() -> Result<W> + Sync,
{
    if config.processes == 1 {
        return DmcRunner::new(config.clone(), make_prototype()?, SingleProcess)?.run();
    }

    let make_prototype = &make_prototype;
    std::thread::scope(|scope| {
        let handles: Vec<_> = ThreadGroup::new(config.processes)
            .into_iter()
            .map(|rank| {
                scope.spawn(move || {
                    // A failing prototype must still reach the agreement in `new`.
                    let prototype = make_prototype();
                    match prototype {
                        Ok(prototype) => DmcRunner::new(config.clone(), prototype, rank)?.run(),
                        Err(e) => {
                            let _ = agree::<(), _>(&rank, Err(DmcError::PeerAborted));
                            Err(e)
                        }
                    }
                })
            })
            .collect();

        let joined: Vec<_> = handles.into_iter().map(|handle| handle.join()).collect();
        let mut results = Vec::with_capacity(joined.len());
        for (rank, result) in joined.into_iter().enumerate() {
            results.push(result.map_err(|_| DmcError::RankPanicked(rank))?);
        }
        // Report the originating error rather than a peer's abort.
        let mut root = None;
        for result in results {
            match result {
                Err(DmcError::PeerAborted) => root = root.or(Some(Err(DmcError::PeerAborted))),
                Err(e) => return Err(e),
                Ok(summary) => root = root.or(Some(Ok(summary))),
            }
        }
        root.unwrap_or(Err(DmcError::PeerAborted))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::DmcParams;
    use crate::testing::StaticWalker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params(dir: &str) -> DmcParams {
        DmcParams {
            iterations: 20,
            target_population: 40,
            dimensions: 1,
            seed: Some(11),
            output_dir: std::env::temp_dir().join(dir),
            ..DmcParams::default()
        }
    }

    #[test]
    fn test_single_rank_run_is_reproducible() {
        let config = params("rust_dmc_runner_repro").resolve().unwrap();
        let run = || {
            DmcRunner::new(config.clone(), StaticWalker::new(0.0, 1.0), SingleProcess)
                .unwrap()
                .run()
                .unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.iterations, 20);
        assert_eq!(a.final_trial_energy, b.final_trial_energy);
        assert_eq!(a.final_population, b.final_population);
        assert!(a.final_population > 0.0);
    }

    #[test]
    fn test_initial_population_per_rank() {
        let mut p = params("rust_dmc_runner_init");
        p.target_population = 7;
        p.trial_energy = 0.75;
        let config = p.resolve().unwrap();
        let runner = DmcRunner::new(config, StaticWalker::new(0.0, 1.0), SingleProcess).unwrap();
        assert_eq!(runner.population().len(), 7);
        assert_eq!(runner.context().iteration, 0);
        assert_eq!(runner.context().trial_energy, 0.75);
    }

    #[test]
    fn test_rank_streams_do_not_overlap_neighbouring_seeds() {
        use rand::RngCore;
        let draw = |seed, rank| rank_rng(Some(seed), rank).next_u64();
        assert_eq!(draw(4, 1), draw(4, 1));
        assert_ne!(draw(4, 0), draw(4, 1));
        assert_ne!(draw(4, 1), draw(5, 0));
    }

    #[test]
    fn test_threaded_run_reports_global_population() {
        let mut p = params("rust_dmc_runner_threads");
        p.np = 2;
        p.diffusion_scheme = "stochastic_nodes_mpi".into();
        let config = p.resolve().unwrap();
        let summary = run_distributed(&config, || Ok(StaticWalker::new(0.5, 1.0))).unwrap();
        assert_eq!(summary.iterations, 20);
        assert!(summary.final_population > 0.0);
        assert!(summary.mean_trial_energy.is_finite());
    }

    #[test]
    fn test_failing_prototype_aborts_every_rank() {
        let mut p = params("rust_dmc_runner_abort");
        p.np = 3;
        let config = p.resolve().unwrap();
        let result = run_distributed::<StaticWalker, _>(&config, || Err(DmcError::config("no walker")));
        assert!(matches!(result, Err(DmcError::Config(_))));
    }

    #[test]
    fn test_panicking_rank_is_reported() {
        let mut p = params("rust_dmc_runner_panic");
        p.np = 2;
        let config = p.resolve().unwrap();
        let calls = AtomicUsize::new(0);
        let result = run_distributed(&config, || {
            let walker = StaticWalker::new(0.5, 1.0);
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                Ok(walker.panicking())
            } else {
                Ok(walker)
            }
        });
        assert!(matches!(result, Err(DmcError::RankPanicked(_))));
    }
}
