use crate::cli::RunArgs;
use crate::config::{PartialRunConfig, RunSettings};
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use cvbias::backends::{AdapterRegistry, ContextWrapper};
use cvbias::engine::driver::SamplingMethodDriver;
use cvbias::engine::state::BiasState;
use cvbias::workflows::analyze::{self, BiasPotential};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{info, warn};

pub fn run(args: RunArgs) -> Result<()> {
    let partial_config = PartialRunConfig::from_file(&args.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let settings = partial_config.merge_with_cli(&args)?;
    let RunSettings {
        method,
        system,
        steps,
        seed,
    } = settings;

    let driver = match &args.restart {
        Some(path) => {
            info!("Resuming from bias state {:?}", path);
            SamplingMethodDriver::resume(method.clone(), read_state(path)?)?
        }
        None => SamplingMethodDriver::new(method.clone()),
    };

    let kt = method.kb() * method.temperature();
    let context = system.into_context(kt, seed);
    let progress_handler = CliProgressHandler::new();
    let mut wrapper = ContextWrapper::bind(
        context,
        driver,
        &AdapterRegistry::standard(),
        Some(progress_handler.get_callback()),
    )?;

    println!(
        "Running {} steps on backend '{}'...",
        steps,
        wrapper.backend_kind()
    );
    wrapper.session(|w| w.run(steps))?;
    let (_, state) = wrapper.finish();
    let state = state.ok_or_else(|| {
        CliError::Other(anyhow::anyhow!("Sampling method finished without a bias state"))
    })?;

    info!(
        steps = state.step_count(),
        depositions = state.deposition_count(),
        "Simulation finished"
    );
    write_state(&args.output, &state)?;
    println!(
        "✓ {} Gaussians deposited; bias state written to: {}",
        state.deposition_count(),
        args.output.display()
    );

    if let Some(profile_path) = &args.profile {
        let result = analyze::analyze(&method, std::slice::from_ref(&state))?;
        match (method.grid(), result.replicas.first()) {
            (Some(grid), Some(potential)) => {
                write_profile(profile_path, &grid.cell_centers(), potential)?;
                println!("✓ Free-energy profile written to: {}", profile_path.display());
            }
            (None, _) => {
                warn!("A free-energy profile needs a [[grid]] section; skipping.");
                println!("Warning: no grid configured, profile not written.");
            }
            (_, None) => {}
        }
    }

    Ok(())
}

fn read_state(path: &Path) -> Result<BiasState> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| CliError::FileParsing {
        path: path.to_path_buf(),
        source: e.into(),
    })
}

fn write_state(path: &Path, state: &BiasState) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, state).map_err(|e| CliError::FileWriting {
        path: path.to_path_buf(),
        source: e.into(),
    })
}

fn write_profile(
    path: &Path,
    points: &[nalgebra::DVector<f64>],
    potential: &BiasPotential,
) -> Result<()> {
    let to_error = |e: csv::Error| CliError::FileWriting {
        path: path.to_path_buf(),
        source: e.into(),
    };
    let mut writer = csv::Writer::from_path(path).map_err(to_error)?;

    let ndim = points.first().map_or(0, |p| p.len());
    let mut header: Vec<String> = (0..ndim).map(|k| format!("cv{}", k)).collect();
    header.extend(["bias".to_string(), "free_energy".to_string()]);
    writer.write_record(&header).map_err(to_error)?;

    let biases = potential.evaluate_many(points);
    for (point, bias) in points.iter().zip(biases) {
        let mut record: Vec<String> = point.iter().map(|x| x.to_string()).collect();
        record.push(bias.to_string());
        record.push(potential.free_energy(point).to_string());
        writer.write_record(&record).map_err(to_error)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;

    const CONFIG: &str = r#"
        [method]
        cvs = ["x"]
        height = [1.0]
        sigma = [0.2]
        stride = 10
        ngaussians = 20
        temperature = 300.0
        delta-t = 1500.0

        [[grid]]
        lower = -2.5
        upper = 2.5
        bins = 50

        [run]
        steps = 101
        seed = 5
    "#;

    fn run_args(dir: &Path, extra: &[&str]) -> RunArgs {
        let config_path = dir.join("run.toml");
        fs::write(&config_path, CONFIG).unwrap();
        let mut args = vec![
            "cvbias".to_string(),
            "run".to_string(),
            "-c".to_string(),
            config_path.to_str().unwrap().to_string(),
            "-o".to_string(),
            dir.join("state.json").to_str().unwrap().to_string(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        match Cli::parse_from(args).command {
            Commands::Run(run_args) => run_args,
            _ => panic!("Expected 'run' subcommand"),
        }
    }

    #[test]
    fn run_writes_state_and_profile() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile.csv");
        let args = run_args(dir.path(), &["--profile", profile.to_str().unwrap()]);
        run(args).unwrap();

        let state = read_state(&dir.path().join("state.json")).unwrap();
        assert_eq!(state.step_count(), 101);
        assert_eq!(state.deposition_count(), 10);

        let content = fs::read_to_string(&profile).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("cv0,bias,free_energy"));
        assert_eq!(lines.count(), 50);
    }

    #[test]
    fn restart_continues_step_and_deposition_counters() {
        let dir = tempfile::tempdir().unwrap();
        run(run_args(dir.path(), &["-n", "55"])).unwrap();

        let saved = dir.path().join("first.json");
        fs::rename(dir.path().join("state.json"), &saved).unwrap();
        run(run_args(
            dir.path(),
            &["-n", "50", "--restart", saved.to_str().unwrap()],
        ))
        .unwrap();

        let state = read_state(&dir.path().join("state.json")).unwrap();
        assert_eq!(state.step_count(), 105);
        assert_eq!(state.deposition_count(), 10);
    }
}
