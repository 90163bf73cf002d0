use crate::error::{CliError, Result};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::{
    Layer,
    filter::{LevelFilter, Targets},
    fmt::{self, format::FmtSpan, time::Uptime},
    prelude::*,
    registry::LookupSpan,
};

/// Target prefix shared by the engine library and this binary.
const TARGET: &str = "cvbias";

pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<PathBuf>) -> Result<()> {
    let level = console_level(verbosity, quiet);

    let file_layer = match log_file {
        Some(path) => Some(file_layer(File::create(&path).map_err(CliError::Io)?, level)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer(level))
        .with(file_layer)
        .init();

    Ok(())
}

fn console_level(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Per-step `trace` events only reach the console at `-vvv`; other crates never go below `warn`.
fn console_targets(level: LevelFilter) -> Targets {
    Targets::new()
        .with_default(level.min(LevelFilter::WARN))
        .with_target(TARGET, level)
}

/// The log file is a record of the run: depositions (`debug`) are always kept.
fn file_targets(level: LevelFilter) -> Targets {
    Targets::new()
        .with_default(level.min(LevelFilter::WARN))
        .with_target(TARGET, level.max(LevelFilter::DEBUG))
}

fn stderr_layer<S>(level: LevelFilter) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact()
        .with_filter(console_targets(level))
}

fn file_layer<S>(file: File, level: LevelFilter) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_ids(true)
        .with_target(true)
        .with_timer(Uptime::default())
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(file_targets(level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Once;
    use tracing::{Level, debug, error, info, trace, warn};

    static INIT: Once = Once::new();

    fn ensure_global_logger_is_set() {
        INIT.call_once(|| {
            setup_logging(3, false, None).expect("Failed to set up global logger for tests");
        });
    }

    #[test]
    #[serial]
    fn initialization_and_macros_work() {
        ensure_global_logger_is_set();

        error!("This is an error");
        warn!("This is a warning");
        info!(step = 10, "Depositing Gaussian");
        debug!("This is debug");
        trace!("This is trace");
    }

    #[test]
    fn console_level_follows_verbosity_and_quiet() {
        assert_eq!(console_level(0, false), LevelFilter::WARN);
        assert_eq!(console_level(2, false), LevelFilter::DEBUG);
        assert_eq!(console_level(7, false), LevelFilter::TRACE);
        assert_eq!(console_level(3, true), LevelFilter::ERROR);
    }

    #[test]
    fn console_keeps_other_crates_at_warn() {
        let targets = console_targets(LevelFilter::TRACE);
        assert!(targets.would_enable("cvbias::engine::driver", &Level::TRACE));
        assert!(targets.would_enable("rayon_core", &Level::WARN));
        assert!(!targets.would_enable("rayon_core", &Level::INFO));

        let quiet = console_targets(LevelFilter::ERROR);
        assert!(!quiet.would_enable("cvbias::engine::driver", &Level::WARN));
    }

    #[test]
    fn log_file_records_depositions_at_default_verbosity() {
        let targets = file_targets(LevelFilter::WARN);
        assert!(targets.would_enable("cvbias::engine::depositor", &Level::DEBUG));
        assert!(!targets.would_enable("cvbias::engine::driver", &Level::TRACE));
        assert!(!targets.would_enable("rayon_core", &Level::INFO));
    }

    #[test]
    #[serial]
    fn file_layer_writes_deposition_fields_and_drops_step_traces() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("run.log");

        let file = File::create(&log_path).unwrap();
        let subscriber = tracing_subscriber::registry().with(file_layer(file, LevelFilter::WARN));

        tracing::subscriber::with_default(subscriber, || {
            debug!(target: "cvbias::engine::depositor", index = 3, "Gaussian deposited");
            trace!(target: "cvbias::engine::driver", step = 4, "Bias step completed");
            debug!(target: "rayon_core", "worker spawned");
        });

        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("Gaussian deposited"));
        assert!(content.contains("index=3"));
        assert!(content.contains("DEBUG"));
        assert!(!content.contains("Bias step completed"));
        assert!(!content.contains("worker spawned"));
    }

    #[test]
    #[serial]
    fn invalid_log_file_path_propagates_error() {
        let invalid_path = PathBuf::from("/");

        if cfg!(unix) && invalid_path.is_dir() {
            let result = setup_logging(0, false, Some(invalid_path));
            assert!(matches!(result, Err(CliError::Io(_))));
        }
    }
}
