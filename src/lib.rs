//! ramble - An experiment generation and expansion engine
//!
//! Takes declarative descriptions of applications, workloads, and
//! experiments, materializes the concrete experiment set they describe,
//! renders per-experiment directories with runnable scripts, and parses
//! logs into structured figures of merit after external execution.

pub mod analysis;
pub mod application;
pub mod error;
pub mod expander;
pub mod experiment;
pub mod expr;
pub mod keywords;
pub mod value;
pub mod workspace;

pub use analysis::{Analyzer, ExperimentResult, OutputFormat, WorkspaceResults};
pub use application::{
    ApplicationDefinition, CommandExecutable, Composer, ModifierDefinition, ObjectRegistry,
    ShellKind,
};
pub use error::{ErrorKind, RambleError, Result};
pub use expander::Expander;
pub use experiment::{ContextDecl, Exclusions, Experiment, ExperimentSet};
pub use value::{Scalar, Value, VariableMap};
pub use workspace::Workspace;
