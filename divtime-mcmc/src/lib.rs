//! Bayesian divergence-time estimation: MCMC parameter state and tree-time priors.
//!
//! The crate provides the state-management and numerical core of a dated
//! phylogenetic MCMC analysis:
//!
//! - **Calibration constraints** — parsing of node and tip-date age bounds
//! - **Parameter state set** — double-buffered registry of all MCMC
//!   parameters with atomic accept/reject
//! - **Speciation process** — uniform / Yule / conditioned-birth-death /
//!   birth-death-sampling / fossilized-birth-death tree-time priors
//! - **Fossil occurrence graph** — fossil bookkeeping and probability
//!   contribution for the FBD prior
//!
//! Sequence likelihood evaluation, substitution models, and the outer
//! MCMC driver loop are external collaborators.

pub mod calibration;
pub mod fossil_graph;
pub mod model;
pub mod speciation;
pub mod tree;

pub use calibration::{Calibration, CalibrationKind};
pub use fossil_graph::{FossilOccurrenceGraph, Occurrence};
pub use model::{
    initial_root_height, metropolis_accept, AlignmentInfo, ModelConfig, MoveClass, NodeRates,
    Parameter, ParameterKind, ParameterStateSet,
};
pub use speciation::{SpeciationProcess, TreeTimePrior};
pub use tree::{NodeId, TimeTree};
