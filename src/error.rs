//! Error Types
//!
//! Unified error enum for the experiment engine. Validation failures carry
//! structured fields (experiment name, variable name, lengths) so callers
//! can render them or translate them to exit codes.

use std::fmt;
use thiserror::Error;

/// Format a list of (variable, length) pairs for length-mismatch messages.
fn format_lengths(lengths: &[(String, usize)]) -> String {
    let mut out = String::new();
    for (var, len) in lengths {
        out.push_str(&format!("\n    Variable {} has length {}", var, len));
    }
    out
}

#[derive(Debug, Error)]
pub enum RambleError {
    // Declaration errors
    #[error("In {scope} variable {variable} is reserved by ramble")]
    ReservedVariable { scope: String, variable: String },

    #[error("Required key \"{key}\" is not defined in experiment {experiment}")]
    RequiredKeyMissing { experiment: String, key: String },

    #[error("Length mismatch in vector variables in experiment {experiment}{}", format_lengths(.lengths))]
    VectorLengthMismatch {
        experiment: String,
        lengths: Vec<(String, usize)>,
    },

    #[error("Experiment {name} is not unique")]
    DuplicateExperiment { name: String },

    #[error("In experiment {experiment} matrix variable {name} has not been defined yet")]
    UnknownMatrixVariable { experiment: String, name: String },

    #[error("An undefined variable {variable} is defined in zip {zip}")]
    UndefinedZipVariable { zip: String, variable: String },

    #[error("Variable {variable} in zip {zip} does not refer to a vector")]
    NonVectorZipVariable { zip: String, variable: String },

    #[error("Variable {variable} is used across multiple zips")]
    ZipMembership { variable: String },

    #[error("Length mismatch in zip {zip} in experiment {experiment}{}", format_lengths(.lengths))]
    ZipLengthMismatch {
        zip: String,
        experiment: String,
        lengths: Vec<(String, usize)>,
    },

    #[error("Workload {workload} is not defined as a workload of application {application}")]
    UnknownWorkload {
        application: String,
        workload: String,
    },

    #[error("Input {input} is not defined by application {application}")]
    UnknownInput { application: String, input: String },

    #[error("Executable {executable} is not defined for experiment {experiment}")]
    UnknownExecutable {
        experiment: String,
        executable: String,
    },

    #[error("Experiment {name} is not defined")]
    UnknownExperiment { name: String },

    #[error("Application {name} is not defined")]
    UnknownApplication { name: String },

    #[error("Modifier {name} is not defined")]
    UnknownModifier { name: String },

    #[error("Cannot determine usage mode for modifier {modifier}")]
    InvalidModifierMode { modifier: String },

    // Chain errors
    #[error("Cycle detected in experiment chain:\n    Primary experiment {root}\n    Chained experiment name: {child}")]
    ChainCycle { root: String, child: String },

    #[error("Invalid experiment chain defined:\n    Primary experiment {root}\n    {reason}")]
    InvalidChain { root: String, reason: String },

    // Expansion errors
    #[error("Expander was unable to fully expand \"{template}\", and is not allowed to passthrough undefined variables")]
    PassthroughDisallowed { template: String },

    /// A fatal syntax error in a variable definition: invalid placeholder
    /// name, or a cross-experiment reference to a missing experiment.
    #[error("{message}")]
    Syntax { message: String },

    /// A lenient parse or operand failure inside expression evaluation.
    /// The expander leaves the offending string unchanged.
    #[error("{message}")]
    ExpressionSyntax { message: String },

    // Evaluator errors, distinct from syntax errors
    #[error("{message}")]
    MathEvaluation { message: String },

    // Builtin execution errors carry the experiment they were raised in
    #[error("Builtin {builtin} failed in experiment {experiment}: {message}")]
    Builtin {
        experiment: String,
        builtin: String,
        message: String,
    },

    // Workspace errors
    #[error("Operation {operation} requires an active workspace write transaction")]
    TransactionRequired { operation: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl RambleError {
    pub fn syntax(message: impl Into<String>) -> Self {
        RambleError::Syntax { message: message.into() }
    }

    pub fn expr_syntax(message: impl Into<String>) -> Self {
        RambleError::ExpressionSyntax { message: message.into() }
    }

    pub fn math(message: impl Into<String>) -> Self {
        RambleError::MathEvaluation { message: message.into() }
    }

    /// True for the lenient error kinds the expander swallows when a
    /// partially-expanded string fails to evaluate as an expression.
    pub fn is_eval_error(&self) -> bool {
        matches!(
            self,
            RambleError::ExpressionSyntax { .. } | RambleError::MathEvaluation { .. }
        )
    }
}

/// Kinds of errors, used by callers that map errors to exit codes without
/// matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Declaration,
    Chain,
    Expansion,
    Evaluation,
    Workspace,
}

impl RambleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RambleError::ReservedVariable { .. }
            | RambleError::RequiredKeyMissing { .. }
            | RambleError::VectorLengthMismatch { .. }
            | RambleError::DuplicateExperiment { .. }
            | RambleError::UnknownMatrixVariable { .. }
            | RambleError::UndefinedZipVariable { .. }
            | RambleError::NonVectorZipVariable { .. }
            | RambleError::ZipMembership { .. }
            | RambleError::ZipLengthMismatch { .. }
            | RambleError::UnknownWorkload { .. }
            | RambleError::UnknownInput { .. }
            | RambleError::UnknownExecutable { .. }
            | RambleError::UnknownExperiment { .. }
            | RambleError::UnknownApplication { .. }
            | RambleError::UnknownModifier { .. }
            | RambleError::InvalidModifierMode { .. } => ErrorKind::Declaration,
            RambleError::ChainCycle { .. } | RambleError::InvalidChain { .. } => ErrorKind::Chain,
            RambleError::PassthroughDisallowed { .. } | RambleError::Syntax { .. } => {
                ErrorKind::Expansion
            }
            RambleError::ExpressionSyntax { .. } | RambleError::MathEvaluation { .. } => {
                ErrorKind::Evaluation
            }
            RambleError::Builtin { .. }
            | RambleError::TransactionRequired { .. }
            | RambleError::Io(_)
            | RambleError::Json(_)
            | RambleError::Yaml(_) => ErrorKind::Workspace,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Declaration => write!(f, "declaration"),
            ErrorKind::Chain => write!(f, "chain"),
            ErrorKind::Expansion => write!(f, "expansion"),
            ErrorKind::Evaluation => write!(f, "evaluation"),
            ErrorKind::Workspace => write!(f, "workspace"),
        }
    }
}

pub type Result<T> = std::result::Result<T, RambleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_mismatch_message() {
        let err = RambleError::VectorLengthMismatch {
            experiment: "series1_{n_ranks}".to_string(),
            lengths: vec![
                ("wl_var2".to_string(), 1),
                ("n_nodes".to_string(), 2),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("series1_{n_ranks}"));
        assert!(msg.contains("Variable wl_var2 has length 1"));
        assert!(msg.contains("Variable n_nodes has length 2"));
    }

    #[test]
    fn test_error_kinds() {
        let err = RambleError::ChainCycle {
            root: "a".to_string(),
            child: "b".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Chain);
        assert!(RambleError::expr_syntax("bad").is_eval_error());
        assert!(RambleError::math("bad").is_eval_error());
        assert!(!RambleError::syntax("bad").is_eval_error());
        assert!(!err.is_eval_error());
    }
}
