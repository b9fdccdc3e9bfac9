//! Log analysis: success criteria, the line-streaming analyzer, and the
//! aggregated results document.

pub mod analyzer;
pub mod criteria;
pub mod results;

pub use analyzer::{Analyzer, FomTable, FomValue, NULL_CONTEXT};
pub use criteria::{CriterionMode, SuccessCriteriaList, SuccessCriterion};
pub use results::{
    ContextFoms, ExperimentResult, ExperimentStatus, FomRecord, OutputFormat, WorkspaceResults,
};
