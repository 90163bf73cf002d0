use nalgebra::{Matrix3, Point3};
use serde::{Deserialize, Serialize};

/// Fields of a [`Snapshot`] that a sampling method may require from a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotField {
    Positions,
    Indices,
    Box,
}

impl SnapshotField {
    pub fn name(&self) -> &'static str {
        match self {
            SnapshotField::Positions => "positions",
            SnapshotField::Indices => "indices",
            SnapshotField::Box => "box",
        }
    }
}

/// A single frame of the host simulation, as read through a backend view.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub positions: Vec<Point3<f64>>,
    pub indices: Vec<usize>,
    pub box_matrix: Option<Matrix3<f64>>,
    pub dt: f64,
}

impl Snapshot {
    pub fn new(positions: Vec<Point3<f64>>, dt: f64) -> Self {
        let indices = (0..positions.len()).collect();
        Self {
            positions,
            indices,
            box_matrix: None,
            dt,
        }
    }

    pub fn with_box(mut self, box_matrix: Matrix3<f64>) -> Self {
        self.box_matrix = Some(box_matrix);
        self
    }

    #[inline]
    pub fn natoms(&self) -> usize {
        self.positions.len()
    }

    /// Returns the first required field this snapshot cannot supply, if any.
    pub fn missing_field(&self, required: &[SnapshotField]) -> Option<SnapshotField> {
        required.iter().copied().find(|field| match field {
            SnapshotField::Positions => self.positions.is_empty(),
            SnapshotField::Indices => self.indices.len() != self.positions.len(),
            SnapshotField::Box => self.box_matrix.is_none(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_assigns_sequential_indices() {
        let snapshot = Snapshot::new(vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)], 0.002);
        assert_eq!(snapshot.indices, vec![0, 1]);
        assert_eq!(snapshot.natoms(), 2);
        assert!(snapshot.box_matrix.is_none());
    }

    #[test]
    fn missing_field_reports_absent_box() {
        let snapshot = Snapshot::new(vec![Point3::origin()], 0.001);
        let required = [SnapshotField::Positions, SnapshotField::Box];
        assert_eq!(snapshot.missing_field(&required), Some(SnapshotField::Box));

        let boxed = snapshot.with_box(Matrix3::identity());
        assert_eq!(boxed.missing_field(&required), None);
    }

    #[test]
    fn missing_field_detects_inconsistent_indices() {
        let mut snapshot = Snapshot::new(vec![Point3::origin(), Point3::origin()], 0.001);
        snapshot.indices.pop();
        assert_eq!(
            snapshot.missing_field(&[SnapshotField::Indices]),
            Some(SnapshotField::Indices)
        );
    }

    #[test]
    fn empty_snapshot_has_no_positions() {
        let snapshot = Snapshot::new(Vec::new(), 0.001);
        assert_eq!(
            snapshot.missing_field(&[SnapshotField::Positions]),
            Some(SnapshotField::Positions)
        );
    }
}
