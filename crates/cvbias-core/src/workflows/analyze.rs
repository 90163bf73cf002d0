use crate::core::potentials::{Gaussians, parallel_bias};
use crate::engine::config::ParallelBiasConfig;
use crate::engine::error::EngineError;
use crate::engine::state::BiasState;
use nalgebra::{DMatrix, DVector};
use tracing::{info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Closed-form bias potential deposited by one replica.
#[derive(Debug, Clone)]
pub struct BiasPotential {
    heights: DMatrix<f64>,
    centers: DMatrix<f64>,
    deposition_count: usize,
    sigmas: DVector<f64>,
    periods: DVector<f64>,
    beta: f64,
    free_energy_factor: f64,
}

impl BiasPotential {
    /// Raw `[ngaussians, d]` heights, zero beyond `deposition_count`.
    pub fn heights(&self) -> &DMatrix<f64> {
        &self.heights
    }

    pub fn centers(&self) -> &DMatrix<f64> {
        &self.centers
    }

    pub fn deposition_count(&self) -> usize {
        self.deposition_count
    }

    fn gaussians(&self) -> Gaussians<'_> {
        Gaussians::new(
            &self.heights,
            &self.centers,
            self.deposition_count,
            &self.sigmas,
            &self.periods,
        )
    }

    /// Running bias along each CV, `V_k(query)`.
    pub fn bias_each_cv(&self, query: &DVector<f64>) -> DVector<f64> {
        self.gaussians().bias_each_cv(query)
    }

    /// Parallel-bias potential at the run's inverse temperature.
    pub fn potential(&self, query: &DVector<f64>) -> f64 {
        self.potential_at(query, self.beta)
    }

    pub fn potential_at(&self, query: &DVector<f64>, beta: f64) -> f64 {
        parallel_bias(&self.bias_each_cv(query), beta)
    }

    /// Well-tempered free-energy estimate, `(T + ΔT)/ΔT · V(query)`.
    pub fn free_energy(&self, query: &DVector<f64>) -> f64 {
        self.free_energy_factor * self.potential(query)
    }

    pub fn evaluate_many(&self, queries: &[DVector<f64>]) -> Vec<f64> {
        #[cfg(not(feature = "parallel"))]
        let values = queries.iter().map(|q| self.potential(q)).collect();

        #[cfg(feature = "parallel")]
        let values = queries.par_iter().map(|q| self.potential(q)).collect();

        values
    }
}

/// Per-replica analysis, index-aligned with the states it was built from.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub replicas: Vec<BiasPotential>,
}

impl AnalysisResult {
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn heights(&self) -> Vec<&DMatrix<f64>> {
        self.replicas.iter().map(BiasPotential::heights).collect()
    }

    pub fn centers(&self) -> Vec<&DMatrix<f64>> {
        self.replicas.iter().map(BiasPotential::centers).collect()
    }
}

#[instrument(skip_all, name = "analysis_workflow")]
pub fn analyze(
    config: &ParallelBiasConfig,
    states: &[BiasState],
) -> Result<AnalysisResult, EngineError> {
    let periods = config.periods();
    let replicas = states
        .iter()
        .map(|state| {
            if state.ndim() != config.ndim() {
                return Err(EngineError::DimensionMismatch {
                    what: "CV dimension",
                    expected: config.ndim(),
                    found: state.ndim(),
                });
            }
            Ok(BiasPotential {
                heights: state.heights().clone(),
                centers: state.centers().clone(),
                deposition_count: state.deposition_count(),
                sigmas: state.sigmas().clone(),
                periods: periods.clone(),
                beta: config.beta(),
                free_energy_factor: config.free_energy_factor(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(replicas = replicas.len(), "Bias analysis completed");
    Ok(AnalysisResult { replicas })
}
