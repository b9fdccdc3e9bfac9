//! Success Criteria
//!
//! Criteria decide whether an experiment succeeded. String-mode criteria
//! match a regex against log lines; application-function criteria run a
//! predicate over the extracted figure-of-merit table after all files are
//! consumed.

use regex_lite::Regex;

use crate::application::types::SuccessFn;
use crate::error::{RambleError, Result};

use super::analyzer::FomTable;

pub enum CriterionMode {
    StringMatch { regex: Regex, file: String },
    ApplicationFunction(SuccessFn),
}

pub struct SuccessCriterion {
    pub name: String,
    pub scope: String,
    pub mode: CriterionMode,
    pub found: bool,
}

impl SuccessCriterion {
    /// The log file this criterion reads, if it is file-based.
    pub fn file(&self) -> Option<&str> {
        match &self.mode {
            CriterionMode::StringMatch { file, .. } => Some(file),
            CriterionMode::ApplicationFunction(_) => None,
        }
    }

    pub fn passes_line(&self, line: &str) -> bool {
        match &self.mode {
            CriterionMode::StringMatch { regex, .. } => regex.is_match(line),
            CriterionMode::ApplicationFunction(_) => false,
        }
    }
}

/// Criteria collected from every scope that contributes them.
#[derive(Default)]
pub struct SuccessCriteriaList {
    criteria: Vec<SuccessCriterion>,
}

impl SuccessCriteriaList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_string_criterion(
        &mut self,
        scope: &str,
        name: &str,
        match_regex: &str,
        file: &str,
    ) -> Result<()> {
        let regex = Regex::new(match_regex).map_err(|e| RambleError::Syntax {
            message: format!(
                "Invalid regex in success criterion {}: {}",
                name, e
            ),
        })?;
        self.criteria.push(SuccessCriterion {
            name: name.to_string(),
            scope: scope.to_string(),
            mode: CriterionMode::StringMatch {
                regex,
                file: file.to_string(),
            },
            found: false,
        });
        Ok(())
    }

    pub fn add_function_criterion(&mut self, scope: &str, name: &str, function: SuccessFn) {
        self.criteria.push(SuccessCriterion {
            name: name.to_string(),
            scope: scope.to_string(),
            mode: CriterionMode::ApplicationFunction(function),
            found: false,
        });
    }

    /// Drop every criterion a scope contributed, so the scope can be
    /// repopulated.
    pub fn flush_scope(&mut self, scope: &str) {
        self.criteria.retain(|c| c.scope != scope);
    }

    pub fn all_criteria(&self) -> impl Iterator<Item = &SuccessCriterion> {
        self.criteria.iter()
    }

    pub fn mark_found(&mut self, name: &str) {
        for criterion in &mut self.criteria {
            if criterion.name == name {
                criterion.found = true;
            }
        }
    }

    /// Mark line-based criteria that match the given line.
    pub fn check_line(&mut self, names: &[String], line: &str) {
        for criterion in &mut self.criteria {
            if !criterion.found
                && names.contains(&criterion.name)
                && criterion.passes_line(line)
            {
                criterion.found = true;
            }
        }
    }

    /// Evaluate non-file criteria against the final FOM table.
    pub fn evaluate_functions(&mut self, fom_values: &FomTable) {
        for criterion in &mut self.criteria {
            if let CriterionMode::ApplicationFunction(function) = &criterion.mode {
                if function(fom_values) {
                    criterion.found = true;
                }
            }
        }
    }

    /// Every criterion must be satisfied.
    pub fn passed(&self) -> bool {
        self.criteria.iter().all(|c| c.found)
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}
