use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use crate::system::DoubleWell;
use cvbias::core::cv::{CollectiveVariable, Component};
use cvbias::core::grid::{Grid, GridDimension};
use cvbias::engine::config::{ParallelBiasConfig, ParallelBiasConfigBuilder};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_STEPS: u64 = 10_000;
const DEFAULT_SEED: u64 = 0;

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialMethodConfig {
    cvs: Option<Vec<String>>,
    height: Option<Vec<f64>>,
    sigma: Option<Vec<f64>>,
    stride: Option<u64>,
    ngaussians: Option<usize>,
    temperature: Option<f64>,
    #[serde(rename = "delta-t")]
    delta_t: Option<f64>,
    kb: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct PartialGridDimension {
    lower: f64,
    upper: f64,
    bins: usize,
    #[serde(default)]
    periodic: bool,
}

impl From<PartialGridDimension> for GridDimension {
    fn from(p: PartialGridDimension) -> Self {
        if p.periodic {
            GridDimension::periodic(p.lower, p.upper, p.bins)
        } else {
            GridDimension::new(p.lower, p.upper, p.bins)
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialSystemConfig {
    barrier: Option<f64>,
    stiffness: Option<f64>,
    friction: Option<f64>,
    dt: Option<f64>,
    start: Option<[f64; 3]>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialRunSection {
    steps: Option<u64>,
    seed: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialRunConfig {
    method: Option<PartialMethodConfig>,
    grid: Option<Vec<PartialGridDimension>>,
    system: Option<PartialSystemConfig>,
    run: Option<PartialRunSection>,
}

/// Fully resolved settings of a `run` invocation.
#[derive(Debug)]
pub struct RunSettings {
    pub method: ParallelBiasConfig,
    pub system: DoubleWell,
    pub steps: u64,
    pub seed: u64,
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn merge_with_cli(mut self, args: &RunArgs) -> Result<RunSettings> {
        self.apply_set_values(&args.set_values)?;

        let method = self.method.take().unwrap_or_default();
        let system = self.system.take().unwrap_or_default();
        let run = self.run.take().unwrap_or_default();

        let cvs = method
            .cvs
            .ok_or_else(|| CliError::Config("`method.cvs` is required.".to_string()))?
            .iter()
            .map(|name| parse_cv(name))
            .collect::<Result<Vec<_>>>()?;

        let grid = match self.grid {
            Some(dims) => Some(
                Grid::new(dims.into_iter().map(Into::into).collect())
                    .map_err(|e| CliError::Config(e.to_string()))?,
            ),
            None => None,
        };

        let mut builder = ParallelBiasConfigBuilder::new().cvs(cvs).grid(grid);
        if let Some(height) = method.height {
            builder = builder.height(height);
        }
        if let Some(sigma) = method.sigma {
            builder = builder.sigma(sigma);
        }
        if let Some(stride) = args.stride.or(method.stride) {
            builder = builder.stride(stride);
        }
        if let Some(ngaussians) = method.ngaussians {
            builder = builder.ngaussians(ngaussians);
        }
        if let Some(temperature) = method.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(delta_t) = method.delta_t {
            builder = builder.delta_t(delta_t);
        }
        if let Some(kb) = method.kb {
            builder = builder.kb(kb);
        }
        let method = builder
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;

        let defaults = DoubleWell::default();
        let system = DoubleWell {
            barrier: system.barrier.unwrap_or(defaults.barrier),
            stiffness: system.stiffness.unwrap_or(defaults.stiffness),
            friction: system.friction.unwrap_or(defaults.friction),
            dt: system.dt.unwrap_or(defaults.dt),
            start: system.start.unwrap_or(defaults.start),
        };
        if !(system.friction > 0.0 && system.dt > 0.0) {
            return Err(CliError::Config(
                "`system.friction` and `system.dt` must be positive.".to_string(),
            ));
        }

        Ok(RunSettings {
            method,
            system,
            steps: args.steps.or(run.steps).unwrap_or(DEFAULT_STEPS),
            seed: args.seed.or(run.seed).unwrap_or(DEFAULT_SEED),
        })
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value_str)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };

            match key {
                "method.stride" => {
                    self.method_mut().stride = Some(parse_value(key, value_str)?);
                }
                "method.ngaussians" => {
                    self.method_mut().ngaussians = Some(parse_value(key, value_str)?);
                }
                "method.temperature" => {
                    self.method_mut().temperature = Some(parse_value(key, value_str)?);
                }
                "method.delta-t" => {
                    self.method_mut().delta_t = Some(parse_value(key, value_str)?);
                }
                "method.kb" => {
                    self.method_mut().kb = Some(parse_value(key, value_str)?);
                }
                "system.barrier" => {
                    self.system_mut().barrier = Some(parse_value(key, value_str)?);
                }
                "system.stiffness" => {
                    self.system_mut().stiffness = Some(parse_value(key, value_str)?);
                }
                "system.friction" => {
                    self.system_mut().friction = Some(parse_value(key, value_str)?);
                }
                "system.dt" => {
                    self.system_mut().dt = Some(parse_value(key, value_str)?);
                }
                "run.steps" => {
                    self.run.get_or_insert_with(Default::default).steps =
                        Some(parse_value(key, value_str)?);
                }
                "run.seed" => {
                    self.run.get_or_insert_with(Default::default).seed =
                        Some(parse_value(key, value_str)?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unknown configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    fn method_mut(&mut self) -> &mut PartialMethodConfig {
        self.method.get_or_insert_with(Default::default)
    }

    fn system_mut(&mut self) -> &mut PartialSystemConfig {
        self.system.get_or_insert_with(Default::default)
    }
}

fn parse_value<T: FromStr>(key: &str, value_str: &str) -> Result<T> {
    value_str.trim().parse().map_err(|_| {
        CliError::Config(format!("Invalid value for {}: {}", key, value_str))
    })
}

fn parse_cv(name: &str) -> Result<Arc<dyn CollectiveVariable>> {
    let axis = match name {
        "x" => 0,
        "y" => 1,
        "z" => 2,
        other => {
            return Err(CliError::Config(format!(
                "Unknown collective variable '{}': expected one of x, y, z",
                other
            )));
        }
    };
    Ok(Arc::new(Component::new(0, axis)))
}
