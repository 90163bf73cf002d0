//! # cvbias Core Library
//!
//! A collective-variable bias engine for molecular-dynamics simulations, implementing
//! parallel-bias well-tempered metadynamics with an optional grid-accelerated path.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict layered architecture so that the sampling algorithm
//! stays independent of the simulation engine it is attached to.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Snapshot`), collective
//!   variables, the fixed CV-space `Grid`, and the pure Gaussian/parallel-bias formulas.
//!
//! - **[`engine`]: The Logic Core.** The stateful bias engine: method configuration,
//!   the accumulating `BiasState`, Gaussian deposition, bias-gradient evaluation and the
//!   per-step `SamplingMethodDriver` state machine.
//!
//! - **[`backends`]: The Dispatch Layer.** Classifies an opaque simulation context into
//!   one of the supported engines, binds the driver through the matching adapter and
//!   exposes a uniform view/run/synchronize surface.
//!
//! - **[`workflows`]: The Public API.** Post-hoc procedures, such as turning final bias
//!   states into free-energy estimators.

pub mod backends;
pub mod core;
pub mod engine;
pub mod workflows;
