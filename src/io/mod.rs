//! IO module - configuration and output files.

mod config;
mod output;

pub use config::{read_params, DmcParams, RunConfig};
pub use output::{
    rank_file_path, write_nodal_points, write_walkers, EvolutionLog, ProgressReport, RankFiles, RootFiles,
    EVOLUTION_FILE, NODAL_SURFACE_FILE, PROGRESS_FILE, WAVEFUNCTION_FILE,
};
