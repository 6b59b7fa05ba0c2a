use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use rust_dmc::{read_params, run_distributed, DmcSummary, ParticleSystem, ParticleWalker, Result};

#[derive(Parser, Debug)]
#[command(version, about = "Walker-population Diffusion Monte Carlo", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.yml")]
    config: String,

    /// Override the number of iterations
    #[arg(short, long)]
    iterations: Option<usize>,

    /// Override the random seed
    #[arg(short, long)]
    seed: Option<u64>,

    /// Override the number of processes (ranks)
    #[arg(short = 'n', long)]
    processes: Option<usize>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn run(args: &Args) -> Result<DmcSummary> {
    let mut params = read_params(&args.config)?;
    if let Some(iterations) = args.iterations {
        params.iterations = iterations;
    }
    if let Some(seed) = args.seed {
        params.seed = Some(seed);
    }
    if let Some(np) = args.processes {
        params.np = np;
    }

    let config = params.resolve()?;
    let system = Arc::new(ParticleSystem::from_params(&config.system, config.dimensions)?);
    run_distributed(&config, || Ok(ParticleWalker::new(Arc::clone(&system))))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&args) {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
