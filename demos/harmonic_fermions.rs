//! Two identical fermions in a 1D harmonic trap
//!
//! Run with: cargo run --release --example harmonic_fermions -- [SCHEME]
//!
//! SCHEME is any diffusion scheme name (default: exact_1d). The exact ground
//! state energy of two non-interacting fermions with ω = 1 is 0.5 + 1.5 = 2.

use std::sync::Arc;

use rust_dmc::{DmcParams, ParticleParams, ParticleSystem, ParticleWalker, SystemParams};
use rust_dmc::systems::ExternalPotential;

fn main() -> rust_dmc::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let scheme = std::env::args().nth(1).unwrap_or_else(|| "exact_1d".to_string());
    let fermion = ParticleParams { charge: -1.0, species: 0, position: None };
    let params = DmcParams {
        tau: 0.01,
        iterations: 2000,
        target_population: 1000,
        diffusion_scheme: scheme.clone(),
        energy_estimator: "growth".into(),
        dimensions: 1,
        seed: Some(1),
        output_dir: std::env::temp_dir().join("rust_dmc_harmonic_fermions"),
        system: SystemParams {
            particles: vec![fermion.clone(), fermion],
            external: ExternalPotential::Harmonic { omega: 1.0 },
            interaction_strength: 0.0,
            exchange_probability: 0.1,
            ..SystemParams::default()
        },
        ..DmcParams::default()
    };

    let config = params.resolve()?;
    let system = Arc::new(ParticleSystem::from_params(&config.system, config.dimensions)?);
    let summary = rust_dmc::run_distributed(&config, || Ok(ParticleWalker::new(Arc::clone(&system))))?;

    println!("Scheme: {scheme}");
    println!("{summary}");
    println!("Exact: 2.0 Ha");
    println!("Output written to {}", config.output_dir.display());
    Ok(())
}
