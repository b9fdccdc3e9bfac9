//! Application Descriptors
//!
//! Typed declarations contributed by application plugins: workloads,
//! executables, inputs, figures of merit, success criteria, and builtin
//! command generators. Builtins are registered explicitly by name; the
//! engine never introspects plugin types.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::analysis::analyzer::FomTable;
use crate::application::modifier::ModifierInstance;
use crate::error::Result;
use crate::experiment::Experiment;
use crate::value::Value;
use crate::workspace::Workspace;

pub const BUILTIN_PREFIX: &str = "builtin::";
pub const MODIFIER_BUILTIN_PREFIX: &str = "modifier_builtin::";

/// Output-capture mode for an executable's redirect target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum OutputCapture {
    Stdout,
    #[default]
    StdoutAppend,
    Stderr,
    StderrAppend,
    All,
    AllAppend,
}

impl OutputCapture {
    pub fn operator(&self) -> &'static str {
        match self {
            OutputCapture::Stdout => ">",
            OutputCapture::StdoutAppend => ">>",
            OutputCapture::Stderr => "2>",
            OutputCapture::StderrAppend => "2>>",
            OutputCapture::All => "&>",
            OutputCapture::AllAppend => "&>>",
        }
    }
}

/// An executable declared by an application, a workload, or inline in the
/// configuration's internals.
#[derive(Debug, Clone, Serialize)]
pub struct CommandExecutable {
    pub name: String,
    /// Command template parts, each emitted as its own line.
    pub template: Vec<String>,
    pub mpi: bool,
    pub redirect: Option<String>,
    pub output_capture: OutputCapture,
}

impl CommandExecutable {
    pub fn new(name: impl Into<String>, template: Vec<String>) -> Self {
        Self {
            name: name.into(),
            template,
            mpi: false,
            redirect: Some("{log_file}".to_string()),
            output_capture: OutputCapture::default(),
        }
    }

    pub fn with_mpi(mut self, mpi: bool) -> Self {
        self.mpi = mpi;
        self
    }

    pub fn with_redirect(mut self, redirect: Option<String>) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn with_output_capture(mut self, capture: OutputCapture) -> Self {
        self.output_capture = capture;
        self
    }
}

/// A workload: executable ordering plus the inputs it consumes.
#[derive(Debug, Clone, Default)]
pub struct WorkloadDefinition {
    pub executables: Vec<String>,
    pub inputs: Vec<String>,
}

/// An input archive or file used by a workload.
#[derive(Debug, Clone)]
pub struct InputDefinition {
    pub url: String,
    pub digest: Option<String>,
    pub target_dir: String,
    pub expand: bool,
    pub extension: Option<String>,
}

impl InputDefinition {
    pub fn new(url: impl Into<String>, target_dir: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            digest: None,
            target_dir: target_dir.into(),
            expand: true,
            extension: None,
        }
    }

    /// File name of the input with any archive extension removed.
    pub fn file_name(&self) -> String {
        let base = self.url.rsplit('/').next().unwrap_or(&self.url);
        let extension = self
            .extension
            .clone()
            .or_else(|| infer_extension(base));
        match extension {
            Some(ext) => base
                .strip_suffix(&format!(".{}", ext))
                .unwrap_or(base)
                .to_string(),
            None => base.to_string(),
        }
    }
}

/// Infer an archive extension from a file name.
pub fn infer_extension(file_name: &str) -> Option<String> {
    for ext in ["tar.gz", "tar.bz2", "tar.xz", "tgz", "tar", "zip", "gz", "bz2", "xz"] {
        if file_name.ends_with(&format!(".{}", ext)) {
            return Some(ext.to_string());
        }
    }
    None
}

/// A workload-level variable with its default and documentation.
#[derive(Debug, Clone)]
pub struct WorkloadVariable {
    pub default: Value,
    pub description: String,
    pub values: Option<Vec<Value>>,
}

/// A figure of merit extracted from a log file.
#[derive(Debug, Clone)]
pub struct FomDefinition {
    pub log_file: String,
    pub regex: String,
    pub group_name: String,
    pub units: String,
    pub contexts: Vec<String>,
}

/// A named context activated by a regex match on a log line.
#[derive(Debug, Clone)]
pub struct FomContextDefinition {
    pub regex: String,
    pub output_format: String,
}

/// A string-mode success criterion declared by an application or modifier.
#[derive(Debug, Clone)]
pub struct SuccessCriterionDefinition {
    pub name: String,
    pub match_regex: String,
    pub file: String,
}

/// Where a required builtin is injected into a workload's executable list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionMethod {
    Prepend,
    Append,
}

/// Context handed to builtin command generators.
pub struct BuiltinContext<'a> {
    pub experiment: &'a Experiment,
    pub definition: &'a ApplicationDefinition,
    pub workspace: &'a Workspace,
    pub modifiers: &'a [ModifierInstance],
}

/// A builtin command generator registered by an application.
pub type BuiltinGenerator = Arc<dyn Fn(&BuiltinContext) -> Result<Vec<String>> + Send + Sync>;

/// A builtin command generator registered by a modifier. The generator
/// also receives the modifier instance it belongs to.
pub type ModifierBuiltinGenerator =
    Arc<dyn Fn(&BuiltinContext, &ModifierInstance) -> Result<Vec<String>> + Send + Sync>;

/// A predicate over the extracted FOM table, for application-defined
/// success evaluation.
pub type SuccessFn = Arc<dyn Fn(&FomTable) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct BuiltinDefinition {
    pub required: bool,
    pub injection_method: InjectionMethod,
    pub generator: BuiltinGenerator,
}

impl fmt::Debug for BuiltinDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinDefinition")
            .field("required", &self.required)
            .field("injection_method", &self.injection_method)
            .finish()
    }
}

/// The full declaration of an application plugin.
#[derive(Clone)]
pub struct ApplicationDefinition {
    pub name: String,
    pub workloads: IndexMap<String, WorkloadDefinition>,
    pub executables: IndexMap<String, CommandExecutable>,
    pub inputs: IndexMap<String, InputDefinition>,
    /// Per-workload variable declarations.
    pub workload_variables: IndexMap<String, IndexMap<String, WorkloadVariable>>,
    pub figures_of_merit: IndexMap<String, FomDefinition>,
    pub figure_of_merit_contexts: IndexMap<String, FomContextDefinition>,
    pub success_criteria: Vec<SuccessCriterionDefinition>,
    /// Builtins keyed by their full `builtin::<func>` name.
    pub builtins: IndexMap<String, BuiltinDefinition>,
    pub archive_patterns: Vec<String>,
    pub required_packages: Vec<String>,
    /// Application-defined success predicate over the FOM table.
    pub evaluate_success: Option<SuccessFn>,
}

impl fmt::Debug for ApplicationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationDefinition")
            .field("name", &self.name)
            .field("workloads", &self.workloads.keys().collect::<Vec<_>>())
            .field("builtins", &self.builtins.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ApplicationDefinition {
    /// A new application declaration. The `env_vars` builtin is registered
    /// for every application; it emits the composed environment-variable
    /// command sequence.
    pub fn new(name: impl Into<String>) -> Self {
        let mut def = Self {
            name: name.into(),
            workloads: IndexMap::new(),
            executables: IndexMap::new(),
            inputs: IndexMap::new(),
            workload_variables: IndexMap::new(),
            figures_of_merit: IndexMap::new(),
            figure_of_merit_contexts: IndexMap::new(),
            success_criteria: Vec::new(),
            builtins: IndexMap::new(),
            archive_patterns: Vec::new(),
            required_packages: Vec::new(),
            evaluate_success: None,
        };
        def.register_builtin(
            "env_vars",
            true,
            InjectionMethod::Prepend,
            Arc::new(crate::application::composer::env_vars_builtin),
        );
        def
    }

    /// Register a builtin command generator under `builtin::<name>`.
    pub fn register_builtin(
        &mut self,
        name: &str,
        required: bool,
        injection_method: InjectionMethod,
        generator: BuiltinGenerator,
    ) {
        self.builtins.insert(
            format!("{}{}", BUILTIN_PREFIX, name),
            BuiltinDefinition {
                required,
                injection_method,
                generator,
            },
        );
    }

    pub fn workload(&self, name: &str) -> Option<&WorkloadDefinition> {
        self.workloads.get(name)
    }

    pub fn add_workload(&mut self, name: impl Into<String>, workload: WorkloadDefinition) {
        self.workloads.insert(name.into(), workload);
    }

    pub fn add_executable(&mut self, executable: CommandExecutable) {
        self.executables.insert(executable.name.clone(), executable);
    }

    pub fn add_input(&mut self, name: impl Into<String>, input: InputDefinition) {
        self.inputs.insert(name.into(), input);
    }

    pub fn add_workload_variable(
        &mut self,
        workload: impl Into<String>,
        name: impl Into<String>,
        variable: WorkloadVariable,
    ) {
        self.workload_variables
            .entry(workload.into())
            .or_default()
            .insert(name.into(), variable);
    }

    pub fn add_figure_of_merit(&mut self, name: impl Into<String>, fom: FomDefinition) {
        self.figures_of_merit.insert(name.into(), fom);
    }

    pub fn add_figure_of_merit_context(
        &mut self,
        name: impl Into<String>,
        context: FomContextDefinition,
    ) {
        self.figure_of_merit_contexts.insert(name.into(), context);
    }

    pub fn add_success_criterion(&mut self, criterion: SuccessCriterionDefinition) {
        self.success_criteria.push(criterion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_vars_builtin_registered() {
        let def = ApplicationDefinition::new("basic");
        let builtin = def.builtins.get("builtin::env_vars").unwrap();
        assert!(builtin.required);
        assert_eq!(builtin.injection_method, InjectionMethod::Prepend);
    }

    #[test]
    fn test_output_capture_operators() {
        assert_eq!(OutputCapture::Stdout.operator(), ">");
        assert_eq!(OutputCapture::StdoutAppend.operator(), ">>");
        assert_eq!(OutputCapture::Stderr.operator(), "2>");
        assert_eq!(OutputCapture::AllAppend.operator(), "&>>");
    }

    #[test]
    fn test_input_file_name() {
        let input = InputDefinition::new("https://example.com/data/input.tar.gz", "{input_name}");
        assert_eq!(input.file_name(), "input");

        let flat = InputDefinition::new("https://example.com/config.txt", ".");
        assert_eq!(flat.file_name(), "config.txt");
    }
}
