use itertools::Itertools;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    #[error("A grid needs at least one dimension")]
    NoDimensions,

    #[error("Grid dimension {dim} must have at least one bin")]
    NoBins { dim: usize },

    #[error("Grid dimension {dim} has invalid bounds [{lower}, {upper})")]
    InvalidBounds { dim: usize, lower: f64, upper: f64 },
}

/// Bounds and resolution of one grid axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridDimension {
    pub lower: f64,
    pub upper: f64,
    pub bins: usize,
    pub periodic: bool,
}

impl GridDimension {
    pub fn new(lower: f64, upper: f64, bins: usize) -> Self {
        Self {
            lower,
            upper,
            bins,
            periodic: false,
        }
    }

    pub fn periodic(lower: f64, upper: f64, bins: usize) -> Self {
        Self {
            periodic: true,
            ..Self::new(lower, upper, bins)
        }
    }

    #[inline]
    pub fn spacing(&self) -> f64 {
        (self.upper - self.lower) / self.bins as f64
    }

    #[inline]
    pub fn center(&self, bin: usize) -> f64 {
        self.lower + (bin as f64 + 0.5) * self.spacing()
    }

    fn bin_of(&self, x: f64) -> Option<usize> {
        if !x.is_finite() {
            return None;
        }
        let scaled = (x - self.lower) / self.spacing();
        let scaled = if self.periodic {
            scaled.rem_euclid(self.bins as f64)
        } else if x >= self.lower && x < self.upper {
            scaled
        } else {
            return None;
        };
        // Rounding in `rem_euclid` can land exactly on `bins`.
        Some((scaled.floor() as usize).min(self.bins - 1))
    }
}

/// Result of mapping a CV value onto the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridLocation {
    /// Row-major flat index of the containing cell.
    Inside(usize),
    OutOfBounds,
}

impl GridLocation {
    #[inline]
    pub fn cell(&self) -> Option<usize> {
        match self {
            GridLocation::Inside(cell) => Some(*cell),
            GridLocation::OutOfBounds => None,
        }
    }

    #[inline]
    pub fn is_inside(&self) -> bool {
        matches!(self, GridLocation::Inside(_))
    }
}

/// Fixed discretization of CV space. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<GridDimension>", into = "Vec<GridDimension>")]
pub struct Grid {
    dims: Vec<GridDimension>,
    strides: Vec<usize>,
}

impl Grid {
    pub fn new(dims: Vec<GridDimension>) -> Result<Self, GridError> {
        if dims.is_empty() {
            return Err(GridError::NoDimensions);
        }
        for (dim, d) in dims.iter().enumerate() {
            if d.bins == 0 {
                return Err(GridError::NoBins { dim });
            }
            if !(d.lower.is_finite() && d.upper.is_finite() && d.upper > d.lower) {
                return Err(GridError::InvalidBounds {
                    dim,
                    lower: d.lower,
                    upper: d.upper,
                });
            }
        }

        let mut strides = vec![1; dims.len()];
        for k in (0..dims.len() - 1).rev() {
            strides[k] = strides[k + 1] * dims[k + 1].bins;
        }

        Ok(Self { dims, strides })
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dimensions(&self) -> &[GridDimension] {
        &self.dims
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.bins).collect()
    }

    /// Total number of cells.
    #[inline]
    pub fn size(&self) -> usize {
        self.strides[0] * self.dims[0].bins
    }

    pub fn spacing(&self) -> DVector<f64> {
        DVector::from_iterator(self.ndim(), self.dims.iter().map(GridDimension::spacing))
    }

    /// Maps a CV value to its cell. Periodic axes wrap; values outside a non-periodic
    /// axis `[lower, upper)` (or of the wrong dimensionality) are out of bounds.
    pub fn locate(&self, xi: &[f64]) -> GridLocation {
        if xi.len() != self.ndim() {
            return GridLocation::OutOfBounds;
        }
        let mut flat = 0;
        for ((dim, stride), &x) in self.dims.iter().zip(&self.strides).zip(xi) {
            match dim.bin_of(x) {
                Some(bin) => flat += bin * stride,
                None => return GridLocation::OutOfBounds,
            }
        }
        GridLocation::Inside(flat)
    }

    pub fn flat_index(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.ndim() {
            return None;
        }
        index
            .iter()
            .zip(&self.dims)
            .zip(&self.strides)
            .try_fold(0, |acc, ((&i, dim), stride)| {
                (i < dim.bins).then_some(acc + i * stride)
            })
    }

    /// Bin of `flat` along axis `k`.
    #[inline]
    pub fn axis_index(&self, flat: usize, k: usize) -> usize {
        (flat / self.strides[k]) % self.dims[k].bins
    }

    pub fn unravel(&self, flat: usize) -> Vec<usize> {
        (0..self.ndim()).map(|k| self.axis_index(flat, k)).collect()
    }

    pub fn axis_centers(&self, k: usize) -> Vec<f64> {
        let dim = &self.dims[k];
        (0..dim.bins).map(|bin| dim.center(bin)).collect()
    }

    pub fn cell_center(&self, flat: usize) -> DVector<f64> {
        DVector::from_iterator(
            self.ndim(),
            self.dims
                .iter()
                .enumerate()
                .map(|(k, dim)| dim.center(self.axis_index(flat, k))),
        )
    }

    /// Centers of every cell, in flat (row-major) order.
    pub fn cell_centers(&self) -> Vec<DVector<f64>> {
        self.dims
            .iter()
            .map(|dim| (0..dim.bins).map(move |bin| dim.center(bin)))
            .multi_cartesian_product()
            .map(DVector::from_vec)
            .collect()
    }
}

impl TryFrom<Vec<GridDimension>> for Grid {
    type Error = GridError;

    fn try_from(dims: Vec<GridDimension>) -> Result<Self, Self::Error> {
        Self::new(dims)
    }
}

impl From<Grid> for Vec<GridDimension> {
    fn from(grid: Grid) -> Self {
        grid.dims
    }
}
