use super::error::BackendError;
use crate::core::models::snapshot::Snapshot;
use nalgebra::{Matrix3, Point3, Vector3};
use std::fmt;

/// Host-side surface of a simulation engine, as seen by the adapters.
///
/// Implementations wrap the engine's own objects; the bias engine never looks inside a
/// context beyond these calls.
pub trait SimulationContext: Send {
    /// Module path of the context's type, e.g. `openmm.app.simulation`.
    fn origin(&self) -> &str;

    /// Current frame of the host simulation.
    fn snapshot(&self) -> Result<Snapshot, BackendError>;

    /// Makes the frame returned by [`snapshot`](Self::snapshot) reflect the engine's
    /// latest state.
    fn synchronize(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Advances the engine by one step with `bias` added to its own forces.
    fn advance(&mut self, bias: &[Vector3<f64>]) -> Result<(), BackendError>;

    fn enter(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn exit(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

pub type ForceFn = Box<dyn Fn(&[Point3<f64>]) -> Vec<Vector3<f64>> + Send>;
pub type StepFn = Box<dyn FnMut(&mut [Point3<f64>], &[Vector3<f64>], f64) + Send>;

/// In-process functional simulation: the engine is a pair of functions over plain
/// positions, stepped directly by the runner.
pub struct JaxMdContext {
    positions: Vec<Point3<f64>>,
    box_matrix: Option<Matrix3<f64>>,
    dt: f64,
    force_fn: ForceFn,
    step_fn: StepFn,
}

impl JaxMdContext {
    pub const ORIGIN: &'static str = "jax_md.simulate";

    pub fn new(positions: Vec<Point3<f64>>, dt: f64, force_fn: ForceFn, step_fn: StepFn) -> Self {
        Self {
            positions,
            box_matrix: None,
            dt,
            force_fn,
            step_fn,
        }
    }

    pub fn with_box(mut self, box_matrix: Matrix3<f64>) -> Self {
        self.box_matrix = Some(box_matrix);
        self
    }

    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }
}

impl fmt::Debug for JaxMdContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JaxMdContext")
            .field("natoms", &self.positions.len())
            .field("box_matrix", &self.box_matrix)
            .field("dt", &self.dt)
            .finish_non_exhaustive()
    }
}

impl SimulationContext for JaxMdContext {
    fn origin(&self) -> &str {
        Self::ORIGIN
    }

    fn snapshot(&self) -> Result<Snapshot, BackendError> {
        let snapshot = Snapshot::new(self.positions.clone(), self.dt);
        Ok(match self.box_matrix {
            Some(box_matrix) => snapshot.with_box(box_matrix),
            None => snapshot,
        })
    }

    fn advance(&mut self, bias: &[Vector3<f64>]) -> Result<(), BackendError> {
        if bias.len() != self.positions.len() {
            return Err(BackendError::Host(format!(
                "bias force array has {} entries for {} atoms",
                bias.len(),
                self.positions.len()
            )));
        }
        let mut forces = (self.force_fn)(&self.positions);
        if forces.len() != self.positions.len() {
            return Err(BackendError::Host(format!(
                "force function returned {} entries for {} atoms",
                forces.len(),
                self.positions.len()
            )));
        }
        for (force, extra) in forces.iter_mut().zip(bias) {
            *force += extra;
        }
        (self.step_fn)(&mut self.positions, &forces, self.dt);
        Ok(())
    }
}
