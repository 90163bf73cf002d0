//! # Workflows Module
//!
//! High-level procedures built on top of the engine.
//!
//! ## Architecture
//!
//! - **Analysis Workflow** ([`analyze`]) - Turns the final bias states of one or more
//!   replicas into closed-form bias potentials and free-energy estimators.

pub mod analyze;
