//! # Core Module
//!
//! Stateless building blocks of the bias engine.
//!
//! - **Snapshots** ([`models`]) - The read-only view of a simulation frame handed over by a backend
//! - **Collective Variables** ([`cv`]) - Reductions of atomic coordinates to CV values and Jacobians
//! - **Grids** ([`grid`]) - Fixed discretization of CV space used by the accelerated path
//! - **Potentials** ([`potentials`]) - Gaussian sums and the parallel-bias potential
//!
//! Nothing in this module owns mutable simulation state; everything here is either an
//! immutable configuration object or a pure function, which keeps the exact and the
//! grid-accelerated evaluation paths trivially comparable.

pub mod cv;
pub mod grid;
pub mod models;
pub mod potentials;
