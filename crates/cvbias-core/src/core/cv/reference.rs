use super::{CollectiveVariable, CvError};
use crate::core::models::snapshot::Snapshot;
use nalgebra::{DVector, Point3, Vector3};
use std::f64::consts::TAU;

const DEGENERATE_EPSILON: f64 = 1e-12;

fn atom<'a>(snapshot: &'a Snapshot, cv: &str, index: usize) -> Result<&'a Point3<f64>, CvError> {
    snapshot
        .positions
        .get(index)
        .ok_or_else(|| CvError::AtomOutOfRange {
            cv: cv.to_string(),
            index,
            natoms: snapshot.natoms(),
        })
}

fn scatter(gradient: &mut DVector<f64>, index: usize, value: &Vector3<f64>) {
    gradient
        .fixed_rows_mut::<3>(3 * index)
        .copy_from(value);
}

/// One Cartesian coordinate of a single atom.
#[derive(Debug, Clone)]
pub struct Component {
    name: String,
    atom: usize,
    axis: usize,
}

impl Component {
    pub fn new(atom: usize, axis: usize) -> Self {
        let label = ["x", "y", "z"].get(axis).copied().unwrap_or("?");
        Self {
            name: format!("component({}, {})", atom, label),
            atom,
            axis: axis.min(2),
        }
    }

    pub fn x(atom: usize) -> Self {
        Self::new(atom, 0)
    }

    pub fn y(atom: usize) -> Self {
        Self::new(atom, 1)
    }

    pub fn z(atom: usize) -> Self {
        Self::new(atom, 2)
    }
}

impl CollectiveVariable for Component {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, snapshot: &Snapshot) -> Result<(f64, DVector<f64>), CvError> {
        let position = atom(snapshot, &self.name, self.atom)?;
        let mut gradient = DVector::zeros(3 * snapshot.natoms());
        gradient[3 * self.atom + self.axis] = 1.0;
        Ok((position[self.axis], gradient))
    }
}

/// Euclidean distance between two atoms (no minimum image).
#[derive(Debug, Clone)]
pub struct Distance {
    name: String,
    atoms: [usize; 2],
}

impl Distance {
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            name: format!("distance({}, {})", a, b),
            atoms: [a, b],
        }
    }
}

impl CollectiveVariable for Distance {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, snapshot: &Snapshot) -> Result<(f64, DVector<f64>), CvError> {
        let [a, b] = self.atoms;
        let r = atom(snapshot, &self.name, b)? - atom(snapshot, &self.name, a)?;
        let distance = r.norm();
        if distance < DEGENERATE_EPSILON {
            return Err(CvError::Degenerate {
                cv: self.name.clone(),
                reason: "atoms overlap".to_string(),
            });
        }

        let unit = r / distance;
        let mut gradient = DVector::zeros(3 * snapshot.natoms());
        scatter(&mut gradient, a, &-unit);
        scatter(&mut gradient, b, &unit);
        Ok((distance, gradient))
    }
}

/// Dihedral angle defined by four atoms, in `(-π, π]`.
#[derive(Debug, Clone)]
pub struct DihedralAngle {
    name: String,
    atoms: [usize; 4],
}

impl DihedralAngle {
    pub fn new(atoms: [usize; 4]) -> Self {
        Self {
            name: format!(
                "dihedral({}, {}, {}, {})",
                atoms[0], atoms[1], atoms[2], atoms[3]
            ),
            atoms,
        }
    }
}

impl CollectiveVariable for DihedralAngle {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, snapshot: &Snapshot) -> Result<(f64, DVector<f64>), CvError> {
        let [i, j, k, l] = self.atoms;
        let p1 = atom(snapshot, &self.name, i)?;
        let p2 = atom(snapshot, &self.name, j)?;
        let p3 = atom(snapshot, &self.name, k)?;
        let p4 = atom(snapshot, &self.name, l)?;

        // Blondel & Karplus (1996) formulation, singularity-free away from collinear triples.
        let f = p1 - p2;
        let g = p2 - p3;
        let h = p4 - p3;
        let a = f.cross(&g);
        let b = h.cross(&g);
        let g_norm = g.norm();
        let a2 = a.norm_squared();
        let b2 = b.norm_squared();
        if g_norm < DEGENERATE_EPSILON || a2 < DEGENERATE_EPSILON || b2 < DEGENERATE_EPSILON {
            return Err(CvError::Degenerate {
                cv: self.name.clone(),
                reason: "three consecutive atoms are collinear".to_string(),
            });
        }

        let sin_term = b.cross(&a).dot(&g) / g_norm;
        let cos_term = a.dot(&b);
        let phi = sin_term.atan2(cos_term);

        let fg = f.dot(&g) / (a2 * g_norm);
        let hg = h.dot(&g) / (b2 * g_norm);
        let d1 = a * (-g_norm / a2);
        let d4 = b * (g_norm / b2);
        let d2 = a * (g_norm / a2) + a * fg - b * hg;
        let d3 = b * (-g_norm / b2) - a * fg + b * hg;

        let mut gradient = DVector::zeros(3 * snapshot.natoms());
        scatter(&mut gradient, i, &d1);
        scatter(&mut gradient, j, &d2);
        scatter(&mut gradient, k, &d3);
        scatter(&mut gradient, l, &d4);
        Ok((phi, gradient))
    }

    fn period(&self) -> Option<f64> {
        Some(TAU)
    }
}
