use crate::core::cv::{CollectiveVariable, CvSet};
use crate::core::grid::Grid;
use crate::core::models::snapshot::SnapshotField;
use crate::core::potentials::DEFAULT_KB;
use nalgebra::DVector;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Parameter '{0}' must not be empty")]
    Empty(&'static str),

    #[error("Parameter '{0}' must be greater than zero")]
    ZeroCount(&'static str),

    #[error("Parameter '{parameter}' must be finite and positive, got {value}")]
    NonPositive { parameter: &'static str, value: f64 },

    #[error("Parameter '{parameter}' has {found} entries, expected {expected}")]
    LengthMismatch {
        parameter: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Grid has {grid} dimensions but the method biases {cvs} CVs")]
    GridDimensionMismatch { grid: usize, cvs: usize },

    #[error("Grid dimension {dim} is periodic but CV '{cv}' is not")]
    PeriodicGridOnAperiodicCv { dim: usize, cv: String },

    #[error("Grid dimension {dim} wraps with period {grid} but CV '{cv}' has period {expected}")]
    GridPeriodMismatch {
        dim: usize,
        cv: String,
        grid: f64,
        expected: f64,
    },
}

/// Validated, immutable configuration of a parallel-bias metadynamics run.
#[derive(Debug, Clone)]
pub struct ParallelBiasConfig {
    cvs: CvSet,
    height: DVector<f64>,
    sigma: DVector<f64>,
    stride: u64,
    ngaussians: usize,
    temperature: f64,
    delta_t: f64,
    kb: f64,
    grid: Option<Grid>,
}

impl ParallelBiasConfig {
    /// Snapshot fields every backend must supply for this method.
    pub const SNAPSHOT_FLAGS: &'static [SnapshotField] =
        &[SnapshotField::Positions, SnapshotField::Indices];

    pub fn cvs(&self) -> &CvSet {
        &self.cvs
    }

    /// Number of biased CVs, `d`.
    #[inline]
    pub fn ndim(&self) -> usize {
        self.cvs.len()
    }

    /// Initial Gaussian height per CV (always length `d`).
    pub fn height(&self) -> &DVector<f64> {
        &self.height
    }

    pub fn sigma(&self) -> &DVector<f64> {
        &self.sigma
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn ngaussians(&self) -> usize {
        self.ngaussians
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }

    pub fn kb(&self) -> f64 {
        self.kb
    }

    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    /// Inverse thermal energy `1 / (k_B T)`.
    #[inline]
    pub fn beta(&self) -> f64 {
        1.0 / (self.kb * self.temperature)
    }

    #[inline]
    pub fn kb_delta_t(&self) -> f64 {
        self.kb * self.delta_t
    }

    /// Conversion factor from deposited bias to free energy, `(T + ΔT) / ΔT`.
    #[inline]
    pub fn free_energy_factor(&self) -> f64 {
        (self.temperature + self.delta_t) / self.delta_t
    }

    pub fn periods(&self) -> DVector<f64> {
        self.cvs.periods()
    }
}

#[derive(Default)]
pub struct ParallelBiasConfigBuilder {
    cvs: Vec<Arc<dyn CollectiveVariable>>,
    height: Option<Vec<f64>>,
    sigma: Option<Vec<f64>>,
    stride: Option<u64>,
    ngaussians: Option<usize>,
    temperature: Option<f64>,
    delta_t: Option<f64>,
    kb: Option<f64>,
    grid: Option<Grid>,
}

impl ParallelBiasConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cv(mut self, cv: Arc<dyn CollectiveVariable>) -> Self {
        self.cvs.push(cv);
        self
    }
    pub fn cvs(mut self, cvs: Vec<Arc<dyn CollectiveVariable>>) -> Self {
        self.cvs = cvs;
        self
    }
    /// Initial heights; a single value is broadcast to every CV.
    pub fn height(mut self, height: Vec<f64>) -> Self {
        self.height = Some(height);
        self
    }
    pub fn sigma(mut self, sigma: Vec<f64>) -> Self {
        self.sigma = Some(sigma);
        self
    }
    pub fn stride(mut self, stride: u64) -> Self {
        self.stride = Some(stride);
        self
    }
    pub fn ngaussians(mut self, ngaussians: usize) -> Self {
        self.ngaussians = Some(ngaussians);
        self
    }
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
    pub fn delta_t(mut self, delta_t: f64) -> Self {
        self.delta_t = Some(delta_t);
        self
    }
    pub fn kb(mut self, kb: f64) -> Self {
        self.kb = Some(kb);
        self
    }
    pub fn grid(mut self, grid: Option<Grid>) -> Self {
        self.grid = grid;
        self
    }

    pub fn build(self) -> Result<ParallelBiasConfig, ConfigError> {
        if self.cvs.is_empty() {
            return Err(ConfigError::Empty("cvs"));
        }
        let ndim = self.cvs.len();

        let height = self.height.ok_or(ConfigError::MissingParameter("height"))?;
        let sigma = self.sigma.ok_or(ConfigError::MissingParameter("sigma"))?;
        let stride = self.stride.ok_or(ConfigError::MissingParameter("stride"))?;
        let ngaussians = self
            .ngaussians
            .ok_or(ConfigError::MissingParameter("ngaussians"))?;
        let temperature = self
            .temperature
            .ok_or(ConfigError::MissingParameter("temperature"))?;
        let delta_t = self.delta_t.ok_or(ConfigError::MissingParameter("delta_t"))?;
        let kb = self.kb.unwrap_or(DEFAULT_KB);

        if stride == 0 {
            return Err(ConfigError::ZeroCount("stride"));
        }
        if ngaussians == 0 {
            return Err(ConfigError::ZeroCount("ngaussians"));
        }

        let height = per_cv("height", height, ndim, true)?;
        let sigma = per_cv("sigma", sigma, ndim, false)?;

        for (parameter, value) in [
            ("temperature", temperature),
            ("delta_t", delta_t),
            ("kb", kb),
        ] {
            ensure_positive(parameter, value)?;
        }

        if let Some(grid) = &self.grid {
            if grid.ndim() != ndim {
                return Err(ConfigError::GridDimensionMismatch {
                    grid: grid.ndim(),
                    cvs: ndim,
                });
            }
            check_grid_periods(grid, &self.cvs)?;
        }

        Ok(ParallelBiasConfig {
            cvs: CvSet::new(self.cvs),
            height,
            sigma,
            stride,
            ngaussians,
            temperature,
            delta_t,
            kb,
            grid: self.grid,
        })
    }
}

fn ensure_positive(parameter: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { parameter, value })
    }
}

/// A periodic grid axis wraps CV values into its bounds, so it must wrap with the
/// same period as the CV it discretizes.
fn check_grid_periods(
    grid: &Grid,
    cvs: &[Arc<dyn CollectiveVariable>],
) -> Result<(), ConfigError> {
    for (dim, (axis, cv)) in grid.dimensions().iter().zip(cvs).enumerate() {
        if !axis.periodic {
            continue;
        }
        let span = axis.upper - axis.lower;
        match cv.period() {
            None => {
                return Err(ConfigError::PeriodicGridOnAperiodicCv {
                    dim,
                    cv: cv.name().to_string(),
                });
            }
            Some(period) if (period - span).abs() > 1e-9 * period.abs().max(1.0) => {
                return Err(ConfigError::GridPeriodMismatch {
                    dim,
                    cv: cv.name().to_string(),
                    grid: span,
                    expected: period,
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn per_cv(
    parameter: &'static str,
    values: Vec<f64>,
    ndim: usize,
    broadcast: bool,
) -> Result<DVector<f64>, ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::Empty(parameter));
    }
    for &value in &values {
        ensure_positive(parameter, value)?;
    }
    match values.len() {
        n if n == ndim => Ok(DVector::from_vec(values)),
        1 if broadcast => Ok(DVector::from_element(ndim, values[0])),
        found => Err(ConfigError::LengthMismatch {
            parameter,
            expected: ndim,
            found,
        }),
    }
}
