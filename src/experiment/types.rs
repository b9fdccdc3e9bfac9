//! Experiment Types
//!
//! Scope declarations, chain entries, and the materialized experiment.

use indexmap::IndexMap;
use serde::Serialize;

use crate::application::env_mods::EnvVarSet;
use crate::application::types::CommandExecutable;
use crate::error::{RambleError, Result};
use crate::expander::Expander;
use crate::expr::CrossExperimentLookup;
use crate::value::{Value, VariableMap};

/// Per-scope overrides of executable resolution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Internals {
    /// Additional executables defined inline in the configuration.
    pub custom_executables: IndexMap<String, CommandExecutable>,
    /// Explicit executable ordering, overriding the workload's list.
    pub executables: Option<Vec<String>>,
}

impl Internals {
    pub fn merge(&mut self, other: &Internals) {
        for (name, exec) in &other.custom_executables {
            self.custom_executables.insert(name.clone(), exec.clone());
        }
        if other.executables.is_some() {
            self.executables = other.executables.clone();
        }
    }
}

/// A reference to a modifier, as declared in a scope.
#[derive(Debug, Clone, Serialize)]
pub struct ModifierRef {
    pub name: String,
    pub mode: Option<String>,
    pub on_executables: Option<Vec<String>>,
}

/// Ordering tokens for chained experiments.
pub const CHAIN_ORDERS: [&str; 4] = ["before_chain", "before_root", "after_root", "after_chain"];

/// A chained-experiment declaration attached to a primary experiment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainEntry {
    pub name: Option<String>,
    pub command: Option<String>,
    pub order: Option<String>,
    pub variables: VariableMap,
}

/// A scope declaration: variables plus the pieces each scope level may
/// contribute. The same shape serves application, workload, and experiment
/// scopes; for experiments `name` is the (possibly templated) name.
#[derive(Debug, Clone, Default)]
pub struct ContextDecl {
    pub name: String,
    pub variables: VariableMap,
    pub env_var_sets: Vec<EnvVarSet>,
    pub internals: Internals,
    pub is_template: bool,
    pub chained_experiments: Vec<ChainEntry>,
    pub modifiers: Vec<ModifierRef>,
}

impl ContextDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: VariableMap) -> Self {
        self.variables = variables;
        self
    }
}

/// Exclusion rules for rendered experiments: literal value matches and/or
/// `where` predicate templates.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    /// Variable values to exclude. Values are zipped positionally unless a
    /// variable is named in `matrix`, in which case its values multiply.
    pub variables: IndexMap<String, Vec<Value>>,
    pub matrix: Vec<String>,
    /// Predicate templates; a render is dropped when any evaluates truthy.
    pub where_clauses: Vec<String>,
}

impl Exclusions {
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.where_clauses.is_empty()
    }
}

/// A fully-bound concrete experiment.
#[derive(Debug, Clone)]
pub struct Experiment {
    /// Fully-qualified name: `application.workload.experiment`.
    pub namespace: String,
    pub application: String,
    pub workload: String,
    pub variables: VariableMap,
    pub env_var_sets: Vec<EnvVarSet>,
    pub internals: Internals,
    pub is_template: bool,
    pub chained_experiments: Vec<ChainEntry>,
    pub modifiers: Vec<ModifierRef>,
    /// Chain state, filled in by the chain builder.
    pub chain_order: Vec<String>,
    pub chain_prepend: Vec<String>,
    pub chain_append: Vec<String>,
    pub chain_commands: IndexMap<String, String>,
    /// Content hash, filled in when the inventory is written.
    pub experiment_hash: Option<String>,
}

impl Experiment {
    pub fn new(
        namespace: String,
        application: String,
        workload: String,
        variables: VariableMap,
    ) -> Self {
        Self {
            namespace,
            application,
            workload,
            variables,
            env_var_sets: Vec::new(),
            internals: Internals::default(),
            is_template: false,
            chained_experiments: Vec::new(),
            modifiers: Vec::new(),
            chain_order: Vec::new(),
            chain_prepend: Vec::new(),
            chain_append: Vec::new(),
            chain_commands: IndexMap::new(),
            experiment_hash: None,
        }
    }

    /// An expander over this experiment's variables.
    pub fn expander(&self) -> Expander<'_> {
        Expander::new(&self.variables)
    }

    /// An expander that can also resolve cross-experiment references.
    pub fn expander_with<'a>(&'a self, lookup: &'a dyn CrossExperimentLookup) -> Expander<'a> {
        Expander::with_lookup(&self.variables, lookup)
    }

    /// Clone this experiment as the base of a chained child. The copy drops
    /// its own chain declarations so chains never recurse through copies.
    pub fn clone_for_chain(&self) -> Self {
        let mut copy = self.clone();
        copy.chained_experiments = Vec::new();
        copy.chain_order = Vec::new();
        copy.chain_prepend = Vec::new();
        copy.chain_append = Vec::new();
        copy.chain_commands = IndexMap::new();
        copy.is_template = false;
        copy.experiment_hash = None;
        copy
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

/// Parse and validate a chain-order token.
pub fn validate_chain_order(root: &str, order: &str) -> Result<()> {
    if CHAIN_ORDERS.contains(&order) {
        Ok(())
    } else {
        Err(RambleError::InvalidChain {
            root: root.to_string(),
            reason: format!(
                "Optional keyword \"order\" must be one of {:?}",
                CHAIN_ORDERS
            ),
        })
    }
}
