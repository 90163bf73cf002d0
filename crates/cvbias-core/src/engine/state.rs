use super::config::ParallelBiasConfig;
use super::error::{EngineError, check_len};
use crate::core::grid::{Grid, GridDimension, GridLocation};
use crate::core::potentials::{
    Gaussians, add_gaussian, gaussian, parallel_bias, switching_probabilities, wrap,
};
use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Grid-cached bias of the accelerated path.
///
/// Since `V_k` only depends on `xi_k`, the per-CV bias and its derivative are accumulated
/// incrementally on the axis centers of each grid dimension. The coupled parallel-bias
/// potential (one value per cell) and its gradient (`d` values per cell) are derived
/// from those tables after every deposition and looked up in O(1) during a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCache {
    dimensions: Vec<GridDimension>,
    axis_bias: Vec<DVector<f64>>,
    axis_bias_gradient: Vec<DVector<f64>>,
    potential: DVector<f64>,
    /// `d × cells`; column `c` is the bias gradient at cell `c`.
    gradient: DMatrix<f64>,
}

impl GridCache {
    pub fn new(grid: &Grid) -> Self {
        let axes: Vec<DVector<f64>> = grid
            .dimensions()
            .iter()
            .map(|dim| DVector::zeros(dim.bins))
            .collect();
        Self {
            dimensions: grid.dimensions().to_vec(),
            axis_bias_gradient: axes.clone(),
            axis_bias: axes,
            potential: DVector::zeros(grid.size()),
            gradient: DMatrix::zeros(grid.ndim(), grid.size()),
        }
    }

    pub fn potential(&self) -> &DVector<f64> {
        &self.potential
    }

    /// Checks that these tables were built for `grid`, so that a restarted run
    /// never indexes a cache of a different layout.
    pub fn check_shape(&self, grid: &Grid) -> Result<(), EngineError> {
        let d = grid.ndim();
        check_len("grid cache dimensions", d, self.dimensions.len())?;
        check_len("grid cache axes", d, self.axis_bias.len())?;
        check_len("grid cache axes", d, self.axis_bias_gradient.len())?;
        for (k, dim) in grid.dimensions().iter().enumerate() {
            let saved = &self.dimensions[k];
            check_len("grid cache bins", dim.bins, saved.bins)?;
            check_len("grid cache bins", dim.bins, self.axis_bias[k].len())?;
            check_len("grid cache bins", dim.bins, self.axis_bias_gradient[k].len())?;
            let scale = dim.upper.abs().max(dim.lower.abs()).max(1.0);
            if saved.periodic != dim.periodic
                || (saved.lower - dim.lower).abs() > 1e-9 * scale
                || (saved.upper - dim.upper).abs() > 1e-9 * scale
            {
                return Err(EngineError::GridMismatch { dim: k });
            }
        }
        check_len("grid cache cells", grid.size(), self.potential.len())?;
        check_len("grid cache cells", grid.size(), self.gradient.ncols())?;
        check_len("grid cache gradient rows", d, self.gradient.nrows())
    }

    pub fn gradient(&self) -> &DMatrix<f64> {
        &self.gradient
    }

    /// Per-CV bias `V_k` and `∂V_k/∂xi_k` at the center of `cell`.
    pub fn cell_bias_each_cv(&self, grid: &Grid, cell: usize) -> (DVector<f64>, DVector<f64>) {
        let d = grid.ndim();
        let bias = DVector::from_fn(d, |k, _| self.axis_bias[k][grid.axis_index(cell, k)]);
        let slope = DVector::from_fn(d, |k, _| {
            self.axis_bias_gradient[k][grid.axis_index(cell, k)]
        });
        (bias, slope)
    }

    pub(crate) fn accumulate(
        &mut self,
        grid: &Grid,
        deposition: &Deposition,
        sigmas: &DVector<f64>,
        periods: &DVector<f64>,
        beta: f64,
    ) {
        for k in 0..grid.ndim() {
            for (bin, center) in grid.axis_centers(k).into_iter().enumerate() {
                let delta = wrap(center - deposition.center[k], periods[k]);
                let (value, slope) = gaussian(delta, deposition.height[k], sigmas[k]);
                self.axis_bias[k][bin] += value;
                self.axis_bias_gradient[k][bin] += slope;
            }
        }
        self.refresh_cells(grid, beta);
    }

    fn refresh_cells(&mut self, grid: &Grid, beta: f64) {
        let GridCache {
            axis_bias,
            axis_bias_gradient,
            potential,
            gradient,
            ..
        } = self;
        let d = grid.ndim();
        let refresh = |cell: usize, value: &mut f64, column: &mut [f64]| {
            let bias = DVector::from_fn(d, |k, _| axis_bias[k][grid.axis_index(cell, k)]);
            let probabilities = switching_probabilities(&bias, beta);
            *value = parallel_bias(&bias, beta);
            for (k, out) in column.iter_mut().enumerate() {
                *out = probabilities[k] * axis_bias_gradient[k][grid.axis_index(cell, k)];
            }
        };

        #[cfg(not(feature = "parallel"))]
        potential
            .as_mut_slice()
            .iter_mut()
            .zip(gradient.as_mut_slice().chunks_mut(d))
            .enumerate()
            .for_each(|(cell, (value, column))| refresh(cell, value, column));

        #[cfg(feature = "parallel")]
        potential
            .as_mut_slice()
            .par_iter_mut()
            .zip(gradient.as_mut_slice().par_chunks_mut(d))
            .enumerate()
            .for_each(|(cell, (value, column))| refresh(cell, value, column));
    }
}

/// A Gaussian selected for deposition but not yet written into the state.
#[derive(Debug, Clone, PartialEq)]
pub struct Deposition {
    pub index: usize,
    pub height: DVector<f64>,
    pub center: DVector<f64>,
}

/// Accumulated record of every deposited Gaussian of one replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasState {
    bias: Vec<Vector3<f64>>,
    xi: DVector<f64>,
    /// `[ngaussians, d]`; rows at or beyond `deposition_count` are zero.
    heights: DMatrix<f64>,
    /// `[ngaussians, d]`, parallel to `heights`.
    centers: DMatrix<f64>,
    sigmas: DVector<f64>,
    grid: Option<GridCache>,
    deposition_count: usize,
    step_count: u64,
}

impl BiasState {
    pub fn new(
        natoms: usize,
        xi: DVector<f64>,
        ngaussians: usize,
        sigmas: DVector<f64>,
        grid: Option<&Grid>,
    ) -> Self {
        let d = xi.len();
        Self {
            bias: vec![Vector3::zeros(); natoms],
            xi,
            heights: DMatrix::zeros(ngaussians, d),
            centers: DMatrix::zeros(ngaussians, d),
            sigmas,
            grid: grid.map(GridCache::new),
            deposition_count: 0,
            step_count: 0,
        }
    }

    /// Atomic bias forces produced by the last step.
    pub fn bias(&self) -> &[Vector3<f64>] {
        &self.bias
    }

    /// CV value observed at the last step.
    pub fn xi(&self) -> &DVector<f64> {
        &self.xi
    }

    pub fn heights(&self) -> &DMatrix<f64> {
        &self.heights
    }

    pub fn centers(&self) -> &DMatrix<f64> {
        &self.centers
    }

    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.sigmas.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.heights.nrows()
    }

    #[inline]
    pub fn deposition_count(&self) -> usize {
        self.deposition_count
    }

    #[inline]
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn grid_cache(&self) -> Option<&GridCache> {
        self.grid.as_ref()
    }

    /// Parallel-bias potential per grid cell, if a grid is configured.
    pub fn grid_potential(&self) -> Option<&DVector<f64>> {
        self.grid.as_ref().map(GridCache::potential)
    }

    /// Bias gradient per grid cell (`d × cells`), if a grid is configured.
    pub fn grid_gradient(&self) -> Option<&DMatrix<f64>> {
        self.grid.as_ref().map(GridCache::gradient)
    }

    pub fn gaussians<'a>(&'a self, periods: &'a DVector<f64>) -> Gaussians<'a> {
        Gaussians::new(
            &self.heights,
            &self.centers,
            self.deposition_count,
            &self.sigmas,
            periods,
        )
    }

    /// Validates a saved state against the configuration it is about to run under.
    pub fn check_compatible(&self, config: &ParallelBiasConfig) -> Result<(), EngineError> {
        let d = config.ndim();
        check_len("CV dimension", d, self.ndim())?;
        check_len("CV value", d, self.xi.len())?;
        check_len("gaussian capacity", config.ngaussians(), self.capacity())?;
        check_len("gaussian height columns", d, self.heights.ncols())?;
        check_len("gaussian center rows", self.capacity(), self.centers.nrows())?;
        check_len("gaussian center columns", d, self.centers.ncols())?;
        if self.deposition_count > self.capacity() {
            return Err(EngineError::CapacityExceeded {
                capacity: self.capacity(),
                attempted: self.deposition_count,
            });
        }
        match (config.grid(), &self.grid) {
            (Some(grid), Some(cache)) => cache.check_shape(grid),
            (None, None) => Ok(()),
            (grid, cache) => Err(EngineError::DimensionMismatch {
                what: "grid cache",
                expected: usize::from(grid.is_some()),
                found: usize::from(cache.is_some()),
            }),
        }
    }

    pub(crate) fn grid_cache_mut(&mut self) -> Option<&mut GridCache> {
        self.grid.as_mut()
    }

    /// Writes a step's outcome into the state. Called once per step, after every
    /// fallible computation of that step has succeeded.
    pub(crate) fn commit(
        &mut self,
        xi: DVector<f64>,
        deposition: Option<&Deposition>,
        bias_forces: &DVector<f64>,
    ) {
        if let Some(deposition) = deposition {
            debug_assert_eq!(deposition.index, self.deposition_count);
            self.heights
                .row_mut(deposition.index)
                .copy_from(&deposition.height.transpose());
            self.centers
                .row_mut(deposition.index)
                .copy_from(&deposition.center.transpose());
            self.deposition_count += 1;
        }
        for (atom, force) in self.bias.iter_mut().enumerate() {
            *force = Vector3::new(
                bias_forces[3 * atom],
                bias_forces[3 * atom + 1],
                bias_forces[3 * atom + 2],
            );
        }
        self.xi = xi;
        self.step_count += 1;
    }
}

/// Transient view of a step in progress: the committed state plus the CV value and
/// the (optional) Gaussian that this step will deposit. Nothing is mutated until the
/// step completes.
#[derive(Debug)]
pub struct PartialState<'a> {
    state: &'a BiasState,
    xi: DVector<f64>,
    location: Option<GridLocation>,
    pending: Option<Deposition>,
}

impl<'a> PartialState<'a> {
    pub fn new(
        state: &'a BiasState,
        xi: DVector<f64>,
        location: Option<GridLocation>,
        pending: Option<Deposition>,
    ) -> Self {
        Self {
            state,
            xi,
            location,
            pending,
        }
    }

    pub fn state(&self) -> &'a BiasState {
        self.state
    }

    pub fn xi(&self) -> &DVector<f64> {
        &self.xi
    }

    /// Grid cell of `xi`; `None` when no grid is configured.
    pub fn location(&self) -> Option<GridLocation> {
        self.location
    }

    pub fn pending(&self) -> Option<&Deposition> {
        self.pending.as_ref()
    }

    /// Number of Gaussians visible to this step, including the pending one.
    pub fn deposition_count(&self) -> usize {
        self.state.deposition_count + usize::from(self.pending.is_some())
    }

    /// Exact `V_k(xi)` and `∂V_k/∂xi_k` over all committed and pending Gaussians.
    pub fn bias_each_cv_with_gradient(
        &self,
        periods: &DVector<f64>,
    ) -> (DVector<f64>, DVector<f64>) {
        let (mut bias, mut slope) = self
            .state
            .gaussians(periods)
            .bias_each_cv_with_gradient(&self.xi);
        if let Some(pending) = &self.pending {
            add_gaussian(
                &mut bias,
                &mut slope,
                &self.xi,
                &pending.height,
                &pending.center,
                &self.state.sigmas,
                periods,
            );
        }
        (bias, slope)
    }

    pub fn into_parts(self) -> (DVector<f64>, Option<Deposition>) {
        (self.xi, self.pending)
    }
}
