//! Experiment set construction: scope layering, cross-product rendering,
//! and chained-experiment ordering.

pub mod chain;
pub mod render;
pub mod set;
pub mod types;

pub use render::{compute_mpi_vars, render_experiments, RenderedExperiment};
pub use set::ExperimentSet;
pub use types::{
    ChainEntry, ContextDecl, Exclusions, Experiment, Internals, ModifierRef, CHAIN_ORDERS,
};
