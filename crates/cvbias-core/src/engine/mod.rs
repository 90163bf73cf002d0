//! # Engine Module
//!
//! The stateful bias engine: everything that happens inside a single simulation step of
//! parallel-bias well-tempered metadynamics.
//!
//! ## Overview
//!
//! Each step the [`driver`] evaluates the collective variables of a snapshot, lets the
//! [`depositor`] decide whether a new Gaussian is added (and with which height), asks the
//! [`evaluator`] for the gradient of the bias potential and maps it back onto atoms. The
//! accumulated record of deposited Gaussians lives in [`state`].
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Validated method parameters and their builder
//! - **State Tracking** ([`state`]) - `BiasState`, the grid cache and the per-step `PartialState`
//! - **Evaluation Strategies** ([`strategy`]) - Exact summation or grid-accelerated lookup,
//!   selected once from the configuration
//! - **Progress Monitoring** ([`progress`]) - Step and deposition events for user callbacks
//! - **Error Handling** ([`error`]) - Engine-specific error types
//!
//! Within one replica `step` is strictly serial. Independent replicas share nothing and
//! can be driven from separate threads.

pub mod config;
pub mod depositor;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod progress;
pub mod state;
pub mod strategy;
