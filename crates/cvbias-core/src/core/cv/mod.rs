//! # Collective Variables
//!
//! A collective variable reduces a [`Snapshot`] to one scalar value together with its
//! gradient with respect to all `3N` atomic coordinates. Multi-dimensional CV spaces are
//! composed by a [`CvSet`], which stacks the scalar CVs into the `xi` vector and the
//! `[d, 3N]` Jacobian consumed by the bias engine.
//!
//! The bias engine treats CVs as external collaborators: it only relies on the
//! [`CollectiveVariable`] contract. The [`reference`] CVs exist for the command-line
//! harness and tests.

pub mod reference;

use crate::core::models::snapshot::Snapshot;
use nalgebra::{DMatrix, DVector};
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

pub use reference::{Component, DihedralAngle, Distance};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CvError {
    #[error("CV '{cv}' references atom {index}, but the snapshot only has {natoms} atoms")]
    AtomOutOfRange {
        cv: String,
        index: usize,
        natoms: usize,
    },

    #[error("CV '{cv}' is undefined for the current geometry: {reason}")]
    Degenerate { cv: String, reason: String },
}

/// Value of all CVs of a method at one simulation step.
#[derive(Debug, Clone, PartialEq)]
pub struct CvValue {
    pub xi: DVector<f64>,
    /// Shape `[d, 3N]`, row `k` holds the gradient of CV `k` w.r.t. atomic coordinates.
    pub jacobian: DMatrix<f64>,
}

impl CvValue {
    #[inline]
    pub fn dim(&self) -> usize {
        self.xi.len()
    }
}

pub trait CollectiveVariable: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Evaluates the CV and its gradient (length `3N`) for the given snapshot.
    fn evaluate(&self, snapshot: &Snapshot) -> Result<(f64, DVector<f64>), CvError>;

    /// Period of the CV, or `None` for non-periodic CVs.
    fn period(&self) -> Option<f64> {
        None
    }
}

/// Ordered list of scalar CVs spanning the biased CV space.
#[derive(Debug, Clone, Default)]
pub struct CvSet {
    cvs: Vec<Arc<dyn CollectiveVariable>>,
}

impl CvSet {
    pub fn new(cvs: Vec<Arc<dyn CollectiveVariable>>) -> Self {
        Self { cvs }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cvs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cvs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CollectiveVariable>> {
        self.cvs.iter()
    }

    /// Periods of every CV, with `0.0` marking non-periodic dimensions.
    pub fn periods(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.cvs.len(),
            self.cvs.iter().map(|cv| cv.period().unwrap_or(0.0)),
        )
    }

    pub fn evaluate(&self, snapshot: &Snapshot) -> Result<CvValue, CvError> {
        let ncoords = 3 * snapshot.natoms();
        let mut xi = DVector::zeros(self.cvs.len());
        let mut jacobian = DMatrix::zeros(self.cvs.len(), ncoords);

        for (k, cv) in self.cvs.iter().enumerate() {
            let (value, gradient) = cv.evaluate(snapshot)?;
            xi[k] = value;
            jacobian.row_mut(k).copy_from(&gradient.transpose());
        }

        Ok(CvValue { xi, jacobian })
    }
}

impl FromIterator<Arc<dyn CollectiveVariable>> for CvSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn CollectiveVariable>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
