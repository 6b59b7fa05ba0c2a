//! Per-iteration output: progress report, evolution log and coordinate dumps.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use nalgebra::DVector;

use crate::error::Result;
use crate::sampling::Walker;

use super::config::DmcParams;

pub const PROGRESS_FILE: &str = "progress";
pub const EVOLUTION_FILE: &str = "evolution";
pub const WAVEFUNCTION_FILE: &str = "wavefunction";
pub const NODAL_SURFACE_FILE: &str = "nodal_surface";

/// Everything reported for one iteration, already reduced over all ranks.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressReport {
    pub iteration: usize,
    pub iterations: usize,
    pub tau: f64,
    pub elapsed_secs: f64,
    pub trial_energy: f64,
    pub population: f64,
    pub processes: usize,
    pub nodal_deaths: usize,
    pub reverted_ranks: usize,
    pub average_weight: f64,
    pub average_mod_weight: f64,
    pub average_mod_weight_squared: f64,
    pub average_potential: f64,
}

impl ProgressReport {
    pub fn percent_complete(&self) -> f64 {
        100.0 * self.iteration as f64 / self.iterations as f64
    }

    pub fn imaginary_time(&self) -> f64 {
        self.tau * self.iteration as f64
    }

    pub fn secs_per_iteration(&self) -> f64 {
        self.elapsed_secs / self.iteration.max(1) as f64
    }

    pub fn eta_secs(&self) -> f64 {
        self.secs_per_iteration() * self.iterations.saturating_sub(self.iteration) as f64
    }

    pub fn nodal_death_percent(&self) -> f64 {
        100.0 * self.nodal_deaths as f64 / self.population
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Iteration {}/{} ({:.1}% imaginary time = {:.4})",
            self.iteration,
            self.iterations,
            self.percent_complete(),
            self.imaginary_time()
        )?;
        writeln!(
            f,
            "    Time running       : {:.3}s ({:.3e}s/iter)",
            self.elapsed_secs,
            self.secs_per_iteration()
        )?;
        writeln!(f, "    ETA                : {:.1}s", self.eta_secs())?;
        writeln!(f, "    Trial energy       : {:.8} Hartree", self.trial_energy)?;
        writeln!(
            f,
            "    Population         : {} ({:.1} per process)",
            self.population,
            self.population / self.processes as f64
        )?;
        writeln!(
            f,
            "    Nodal deaths       : {} ({:.3}% of the total population)",
            self.nodal_deaths,
            self.nodal_death_percent()
        )?;
        writeln!(
            f,
            "    Reverted on        : {}/{} processes",
            self.reverted_ranks, self.processes
        )
    }
}

/// CSV log with one row per iteration. The header is written once, before
/// the first row.
pub struct EvolutionLog<W: Write> {
    writer: W,
    header_written: bool,
}

impl<W: Write> EvolutionLog<W> {
    pub const HEADER: [&'static str; 7] = [
        "Population",
        "Trial energy",
        "Average weight",
        "Average |weight|",
        "Average |weight|^2",
        "Average potential",
        "Nodal deaths",
    ];

    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
        }
    }

    pub fn write_row(&mut self, report: &ProgressReport) -> Result<()> {
        if !self.header_written {
            writeln!(self.writer, "{}", Self::HEADER.join(","))?;
            self.header_written = true;
        }
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{}",
            report.population,
            report.trial_energy,
            report.average_weight,
            report.average_mod_weight,
            report.average_mod_weight_squared,
            report.average_potential,
            report.nodal_deaths
        )?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn write_point<W: Write>(out: &mut W, point: &DVector<f64>, weight: Option<f64>) -> Result<()> {
    let mut fields: Vec<String> = point.iter().map(|x| x.to_string()).collect();
    if let Some(w) = weight {
        fields.push(w.to_string());
    }
    writeln!(out, "{}", fields.join(","))?;
    Ok(())
}

/// Every walker as `x_1,...,x_n,weight`, under a `# Iteration n` tag.
pub fn write_walkers<W: Write, P: Walker>(out: &mut W, iteration: usize, walkers: &[P]) -> Result<()> {
    writeln!(out, "# Iteration {iteration}")?;
    for w in walkers {
        write_point(out, &w.coordinates(), Some(w.weight()))?;
    }
    Ok(())
}

/// Coordinates of walkers killed at a node, under a `# Iteration n` tag.
pub fn write_nodal_points<W: Write>(out: &mut W, iteration: usize, points: &[DVector<f64>]) -> Result<()> {
    writeln!(out, "# Iteration {iteration}")?;
    for p in points {
        write_point(out, p, None)?;
    }
    Ok(())
}

/// Files written by the root rank only.
pub struct RootFiles {
    pub progress: BufWriter<File>,
    pub evolution: EvolutionLog<BufWriter<File>>,
}

impl RootFiles {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            progress: BufWriter::new(File::create(dir.join(PROGRESS_FILE))?),
            evolution: EvolutionLog::new(BufWriter::new(File::create(dir.join(EVOLUTION_FILE))?)),
        })
    }

    /// Opening section of the progress stream, written before the walkers
    /// are created.
    pub fn write_header(&mut self, params: &DmcParams) -> Result<()> {
        write_header(&mut self.progress, params)?;
        self.progress.flush()?;
        Ok(())
    }

    pub fn write_setup_done(&mut self, setup_secs: f64) -> Result<()> {
        write_setup_done(&mut self.progress, setup_secs)?;
        self.progress.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.progress.flush()?;
        self.evolution.flush()
    }
}

fn write_header<W: Write>(out: &mut W, params: &DmcParams) -> Result<()> {
    writeln!(out, "Parameters")?;
    for line in serde_yaml::to_string(params)?.lines() {
        writeln!(out, "    {line}")?;
    }
    writeln!(out, "Initializing walkers")?;
    Ok(())
}

fn write_setup_done<W: Write>(out: &mut W, setup_secs: f64) -> Result<()> {
    writeln!(out, "Starting DMC simulation")?;
    writeln!(out, "    Total setup time: {setup_secs:.3}s")?;
    Ok(())
}

/// Coordinate dumps; every rank writes its own walkers.
#[derive(Default)]
pub struct RankFiles {
    pub wavefunction: Option<BufWriter<File>>,
    pub nodal_surface: Option<BufWriter<File>>,
}

impl RankFiles {
    pub fn create(
        dir: &Path,
        rank: usize,
        processes: usize,
        write_wavefunction: bool,
        write_nodal_surface: bool,
    ) -> Result<Self> {
        let open = |name: &str| -> Result<BufWriter<File>> {
            std::fs::create_dir_all(dir)?;
            Ok(BufWriter::new(File::create(rank_file_path(dir, name, rank, processes))?))
        };
        Ok(Self {
            wavefunction: write_wavefunction.then(|| open(WAVEFUNCTION_FILE)).transpose()?,
            nodal_surface: write_nodal_surface.then(|| open(NODAL_SURFACE_FILE)).transpose()?,
        })
    }

    pub fn flush(&mut self) -> Result<()> {
        for file in [self.wavefunction.as_mut(), self.nodal_surface.as_mut()].into_iter().flatten() {
            file.flush()?;
        }
        Ok(())
    }
}

/// `dir/name` for a single rank, `dir/name.rank` otherwise.
pub fn rank_file_path(dir: &Path, name: &str, rank: usize, processes: usize) -> PathBuf {
    if processes == 1 {
        dir.join(name)
    } else {
        dir.join(format!("{name}.{rank}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticWalker;

    fn report(iteration: usize) -> ProgressReport {
        ProgressReport {
            iteration,
            iterations: 10,
            tau: 0.01,
            elapsed_secs: 2.0,
            trial_energy: 0.5,
            population: 100.0,
            processes: 2,
            nodal_deaths: 5,
            reverted_ranks: 1,
            average_weight: 0.9,
            average_mod_weight: 1.0,
            average_mod_weight_squared: 1.1,
            average_potential: 0.4,
        }
    }

    #[test]
    fn test_evolution_header_written_once() {
        let mut log = EvolutionLog::new(Vec::new());
        for i in 1..=3 {
            log.write_row(&report(i)).unwrap();
        }
        let text = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "Population,Trial energy,Average weight,Average |weight|,Average |weight|^2,Average potential,Nodal deaths"
        );
        assert_eq!(text.matches("Population").count(), 1);
        let columns = lines[0].split(',').count();
        assert!(lines.iter().all(|l| l.split(',').count() == columns));
        assert_eq!(lines[1], "100,0.5,0.9,1,1.1,0.4,5");
    }

    #[test]
    fn test_progress_report_fields() {
        let r = report(5);
        assert_eq!(r.percent_complete(), 50.0);
        assert_eq!(r.eta_secs(), 2.0);
        assert_eq!(r.nodal_death_percent(), 5.0);

        let text = r.to_string();
        assert!(text.starts_with("Iteration 5/10 (50.0% imaginary time = 0.0500)"));
        assert!(text.contains("Population         : 100 (50.0 per process)"));
        assert!(text.contains("Reverted on        : 1/2 processes"));
    }

    #[test]
    fn test_startup_section() {
        let params = DmcParams {
            tau: 0.02,
            trial_energy: -0.5,
            ..DmcParams::default()
        };
        let mut out = Vec::new();
        write_header(&mut out, &params).unwrap();
        write_setup_done(&mut out, 1.5).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Parameters\n"));
        assert!(text.contains("\n    tau: 0.02\n"));
        assert!(text.contains("\n    trial_energy: -0.5\n"));
        assert!(text.contains("\n    diffusion_scheme: bosonic\n"));
        let init = text.find("Initializing walkers").unwrap();
        let start = text.find("Starting DMC simulation").unwrap();
        assert!(init < start);
        assert!(text.ends_with("    Total setup time: 1.500s\n"));
    }

    #[test]
    fn test_rank_file_path() {
        let dir = Path::new("out");
        assert_eq!(rank_file_path(dir, NODAL_SURFACE_FILE, 0, 1), dir.join("nodal_surface"));
        assert_eq!(rank_file_path(dir, WAVEFUNCTION_FILE, 2, 4), dir.join("wavefunction.2"));
    }

    #[test]
    fn test_walker_dump() {
        let mut out = Vec::new();
        let walkers = vec![StaticWalker::new(0.5, 1.0), StaticWalker::new(-1.5, -2.0)];
        write_walkers(&mut out, 3, &walkers).unwrap();
        write_nodal_points(&mut out, 3, &[DVector::from_vec(vec![0.0, 1.0])]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "# Iteration 3\n0.5,1\n-1.5,-2\n# Iteration 3\n0,1\n");
    }
}
