use cvbias::backends::JaxMdContext;
use nalgebra::{Point3, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

/// A single particle in `U = a (x² - 1)² + ½ k (y² + z²)`, integrated with overdamped
/// Langevin dynamics.
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleWell {
    pub barrier: f64,
    pub stiffness: f64,
    pub friction: f64,
    pub dt: f64,
    pub start: [f64; 3],
}

impl Default for DoubleWell {
    fn default() -> Self {
        Self {
            barrier: 10.0,
            stiffness: 50.0,
            friction: 10.0,
            dt: 1e-3,
            start: [-1.0, 0.0, 0.0],
        }
    }
}

impl DoubleWell {
    pub fn energy(&self, p: &Point3<f64>) -> f64 {
        self.barrier * (p.x * p.x - 1.0).powi(2) + 0.5 * self.stiffness * (p.y * p.y + p.z * p.z)
    }

    pub fn force(&self, p: &Point3<f64>) -> Vector3<f64> {
        Vector3::new(
            -4.0 * self.barrier * p.x * (p.x * p.x - 1.0),
            -self.stiffness * p.y,
            -self.stiffness * p.z,
        )
    }

    /// Wraps the model as an in-process functional context at thermal energy `kt`.
    pub fn into_context(self, kt: f64, seed: u64) -> JaxMdContext {
        let start = vec![Point3::from(self.start)];
        let dt = self.dt;
        let noise = (2.0 * kt * dt / self.friction).sqrt();
        let mobility = dt / self.friction;
        let mut rng = StdRng::seed_from_u64(seed);
        let model = self;

        JaxMdContext::new(
            start,
            dt,
            Box::new(move |positions: &[Point3<f64>]| {
                positions.iter().map(|p| model.force(p)).collect()
            }),
            Box::new(move |positions: &mut [Point3<f64>], forces: &[Vector3<f64>], _dt: f64| {
                for (x, f) in positions.iter_mut().zip(forces) {
                    let kick = Vector3::<f64>::from_fn(|_, _| StandardNormal.sample(&mut rng));
                    *x += f * mobility + kick * noise;
                }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvbias::backends::SimulationContext;

    #[test]
    fn force_is_negative_energy_gradient() {
        let model = DoubleWell::default();
        let p = Point3::new(0.3, -0.2, 0.1);
        let h = 1e-6;
        let force = model.force(&p);
        for axis in 0..3 {
            let mut plus = p;
            let mut minus = p;
            plus[axis] += h;
            minus[axis] -= h;
            let numeric = -(model.energy(&plus) - model.energy(&minus)) / (2.0 * h);
            assert!((numeric - force[axis]).abs() < 1e-5);
        }
    }

    #[test]
    fn minima_sit_at_unit_distance() {
        let model = DoubleWell::default();
        assert_eq!(model.force(&Point3::new(1.0, 0.0, 0.0)), Vector3::zeros());
        assert_eq!(model.force(&Point3::new(-1.0, 0.0, 0.0)), Vector3::zeros());
    }

    #[test]
    fn context_is_reproducible_for_a_seed() {
        let trajectory = |seed| {
            let mut context = DoubleWell::default().into_context(2.5, seed);
            for _ in 0..50 {
                context.advance(&[Vector3::zeros()]).unwrap();
            }
            context.positions()[0]
        };
        assert_eq!(trajectory(7), trajectory(7));
        assert_ne!(trajectory(7), trajectory(8));
    }

    #[test]
    fn context_origin_classifies_as_jax_md() {
        let context = DoubleWell::default().into_context(2.5, 0);
        assert_eq!(
            cvbias::backends::classify(context.origin()).unwrap(),
            cvbias::backends::BackendKind::JaxMd
        );
    }
}
