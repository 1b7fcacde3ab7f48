//! Shared primitives for the divtime divergence-time estimation workspace.
//!
//! `divtime-core` provides the foundation the MCMC crate builds on:
//!
//! - **Error types** — [`DivtimeError`] and [`Result`] for structured error handling
//! - **Log-space numerics** — guarded exponentiation and log-sum-exp
//! - **Proposal kernels** — bounded scale and sliding-window moves with reflection

pub mod error;
pub mod moves;
pub mod prob;

pub use error::{DivtimeError, Result};
