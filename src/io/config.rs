//! YAML run configuration.
//!
//! ```yaml
//! tau: 0.01
//! iterations: 2000
//! target_population: 500
//! diffusion_scheme: exact_1d
//! energy_estimator: growth
//! dimensions: 1
//! system:
//!   particles:
//!     - { charge: -1.0, species: 0 }
//!     - { charge: -1.0, species: 0 }
//!   external: { kind: harmonic, omega: 1.0 }
//!   interaction_strength: 0.0
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DmcError, Result};
use crate::sampling::{
    DiffusionParams, DiffusionScheme, EnergyEstimator, MetropolisParams, PopulationController,
    PropagationConfig,
};
use crate::systems::SystemParams;
use crate::wavefunction::GaussianTrial;

/// Options exactly as they appear in the configuration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DmcParams {
    #[serde(default = "default_tau")]
    pub tau: f64,
    /// Time step used by the reference-field schemes; `tau` when absent
    #[serde(default)]
    pub nodal_tau: Option<f64>,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_target_population")]
    pub target_population: usize,
    #[serde(default = "default_max_weight")]
    pub max_weight: f64,
    #[serde(default)]
    pub max_offspring: Option<usize>,
    #[serde(default = "default_diffusion_scheme")]
    pub diffusion_scheme: String,
    #[serde(default = "default_energy_estimator")]
    pub energy_estimator: String,
    #[serde(default = "default_growth_mixing_factor")]
    pub growth_mixing_factor: f64,
    #[serde(default = "default_self_gf_strength")]
    pub self_gf_strength: f64,
    #[serde(default)]
    pub write_nodal_surface: bool,
    /// Dump every walker's coordinates every n iterations
    #[serde(default)]
    pub write_wavefunction_every: Option<usize>,
    #[serde(default)]
    pub pairwise_cancellation: bool,
    /// Pairwise cancellation time step as a multiple of `tau`
    #[serde(default = "default_tau_c_ratio")]
    pub tau_c_ratio: f64,
    /// Trial energy before the first update
    #[serde(default)]
    pub trial_energy: f64,
    #[serde(default = "default_pre_diffusion")]
    pub pre_diffusion: f64,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_np")]
    pub np: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_metropolis_step")]
    pub metropolis_step: f64,
    #[serde(default = "default_metropolis_decorrelation")]
    pub metropolis_decorrelation: usize,
    #[serde(default = "default_finite_difference_step")]
    pub finite_difference_step: f64,
    /// Selects the drift-diffusion family when present
    #[serde(default)]
    pub trial_wavefunction: Option<GaussianTrial>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub system: SystemParams,
}

fn default_tau() -> f64 {
    0.01
}

fn default_iterations() -> usize {
    1000
}

fn default_target_population() -> usize {
    1000
}

fn default_max_weight() -> f64 {
    100.0
}

fn default_diffusion_scheme() -> String {
    DiffusionScheme::Bosonic.to_string()
}

fn default_energy_estimator() -> String {
    EnergyEstimator::Potential.to_string()
}

fn default_growth_mixing_factor() -> f64 {
    0.5
}

fn default_self_gf_strength() -> f64 {
    1.0
}

fn default_tau_c_ratio() -> f64 {
    1.0
}

fn default_pre_diffusion() -> f64 {
    1.0
}

fn default_dimensions() -> usize {
    3
}

fn default_np() -> usize {
    1
}

fn default_metropolis_step() -> f64 {
    0.5
}

fn default_metropolis_decorrelation() -> usize {
    10
}

fn default_finite_difference_step() -> f64 {
    1e-4
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for DmcParams {
    fn default() -> Self {
        Self {
            tau: default_tau(),
            nodal_tau: None,
            iterations: default_iterations(),
            target_population: default_target_population(),
            max_weight: default_max_weight(),
            max_offspring: None,
            diffusion_scheme: default_diffusion_scheme(),
            energy_estimator: default_energy_estimator(),
            growth_mixing_factor: default_growth_mixing_factor(),
            self_gf_strength: default_self_gf_strength(),
            write_nodal_surface: false,
            write_wavefunction_every: None,
            pairwise_cancellation: false,
            tau_c_ratio: default_tau_c_ratio(),
            trial_energy: 0.0,
            pre_diffusion: default_pre_diffusion(),
            dimensions: default_dimensions(),
            np: default_np(),
            seed: None,
            metropolis_step: default_metropolis_step(),
            metropolis_decorrelation: default_metropolis_decorrelation(),
            finite_difference_step: default_finite_difference_step(),
            trial_wavefunction: None,
            output_dir: default_output_dir(),
            system: SystemParams::default(),
        }
    }
}

/// Read [`DmcParams`] from a YAML file.
pub fn read_params<P: AsRef<Path>>(filename: P) -> Result<DmcParams> {
    let file = std::fs::File::open(filename)?;
    let reader = std::io::BufReader::new(file);
    let params: DmcParams = serde_yaml::from_reader(reader)?;
    Ok(params)
}

impl DmcParams {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Validate every option and resolve the string selectors.
    pub fn resolve(&self) -> Result<RunConfig> {
        let scheme: DiffusionScheme = self.diffusion_scheme.parse()?;
        let estimator: EnergyEstimator = self.energy_estimator.parse()?;
        scheme.validate(self.dimensions)?;

        let nodal_tau = self.nodal_tau.unwrap_or(self.tau);
        positive("tau", self.tau)?;
        positive("nodal_tau", nodal_tau)?;
        positive("max_weight", self.max_weight)?;
        positive("tau_c_ratio", self.tau_c_ratio)?;
        if !self.trial_energy.is_finite() {
            return Err(DmcError::config("trial_energy must be finite"));
        }
        positive("metropolis_step", self.metropolis_step)?;
        positive("finite_difference_step", self.finite_difference_step)?;
        if !(0.0..=1.0).contains(&self.growth_mixing_factor) {
            return Err(DmcError::config(format!(
                "growth_mixing_factor must lie in [0, 1], got {}",
                self.growth_mixing_factor
            )));
        }
        if !self.self_gf_strength.is_finite() {
            return Err(DmcError::config("self_gf_strength must be finite"));
        }
        if !(self.pre_diffusion >= 0.0 && self.pre_diffusion.is_finite()) {
            return Err(DmcError::config("pre_diffusion must be non-negative"));
        }
        if self.dimensions == 0 {
            return Err(DmcError::config("dimensions must be at least 1"));
        }
        if self.np == 0 {
            return Err(DmcError::config("np must be at least 1"));
        }
        if self.target_population < self.np {
            return Err(DmcError::config(format!(
                "target_population {} is smaller than the number of processes {}",
                self.target_population, self.np
            )));
        }
        if self.max_offspring == Some(0) {
            return Err(DmcError::config("max_offspring must be at least 1"));
        }
        if self.write_wavefunction_every == Some(0) {
            return Err(DmcError::config("write_wavefunction_every must be at least 1"));
        }
        if let Some(trial) = &self.trial_wavefunction {
            positive("trial_wavefunction.alpha", trial.alpha)?;
            let coordinates = self.dimensions * self.system.particles.len();
            if matches!(trial.node_axis, Some(k) if k >= coordinates) {
                return Err(DmcError::config(format!(
                    "trial_wavefunction.node_axis must be below {coordinates}"
                )));
            }
        }

        Ok(RunConfig {
            propagation: PropagationConfig {
                scheme,
                diffusion: DiffusionParams {
                    tau: self.tau,
                    nodal_tau,
                    self_gf_strength: self.self_gf_strength,
                    dimensions: self.dimensions,
                },
                controller: PopulationController {
                    estimator,
                    tau: self.tau,
                    target_population: self.target_population as f64,
                    growth_mixing_factor: self.growth_mixing_factor,
                },
                max_weight: self.max_weight,
                max_offspring: self.max_offspring,
                pairwise_cancellation: self.pairwise_cancellation,
                cancellation_tau_ratio: self.tau_c_ratio,
            },
            trial_energy: self.trial_energy,
            source: self.clone(),
            iterations: self.iterations,
            target_population: self.target_population,
            processes: self.np,
            seed: self.seed,
            pre_diffusion: self.pre_diffusion,
            metropolis: MetropolisParams {
                step: self.metropolis_step,
                decorrelation: self.metropolis_decorrelation,
            },
            finite_difference_step: self.finite_difference_step,
            trial_wavefunction: self.trial_wavefunction,
            write_nodal_surface: self.write_nodal_surface,
            write_wavefunction_every: self.write_wavefunction_every,
            output_dir: self.output_dir.clone(),
            dimensions: self.dimensions,
            system: self.system.clone(),
        })
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(DmcError::config(format!("{name} must be positive, got {value}")))
    }
}

/// Validated configuration with the dispatch enums resolved.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub propagation: PropagationConfig,
    pub iterations: usize,
    pub target_population: usize,
    pub processes: usize,
    pub seed: Option<u64>,
    /// Initial trial energy
    pub trial_energy: f64,
    pub pre_diffusion: f64,
    pub metropolis: MetropolisParams,
    pub finite_difference_step: f64,
    pub trial_wavefunction: Option<GaussianTrial>,
    pub write_nodal_surface: bool,
    pub write_wavefunction_every: Option<usize>,
    pub output_dir: PathBuf,
    pub dimensions: usize,
    pub system: SystemParams,
    /// Options as read, echoed at the top of the progress stream
    pub source: DmcParams,
}

impl RunConfig {
    pub fn tau(&self) -> f64 {
        self.propagation.diffusion.tau
    }

    /// Walkers created on `rank`; the remainder goes to the lowest ranks.
    pub fn initial_population(&self, rank: usize) -> usize {
        let base = self.target_population / self.processes;
        let extra = usize::from(rank < self.target_population % self.processes);
        base + extra
    }
}
