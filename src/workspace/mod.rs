//! Workspace Handle
//!
//! The explicit engine handle carrying configuration, filesystem root,
//! templates, and accumulated results. All directory creation and file
//! writes happen inside a coarse write transaction; the handle enforces
//! that before any write lands on disk.

pub mod inventory;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::analysis::results::ExperimentResult;
use crate::application::env_mods::{EnvVarSet, ShellKind};
use crate::application::types::SuccessCriterionDefinition;
use crate::error::{RambleError, Result};
use crate::value::VariableMap;

/// A workspace template: contents plus a content digest.
#[derive(Debug, Clone)]
pub struct TemplateDefinition {
    pub contents: String,
    pub digest: String,
}

pub struct Workspace {
    name: String,
    root: PathBuf,
    shell: ShellKind,
    variables: VariableMap,
    templates: IndexMap<String, TemplateDefinition>,
    /// License env-var modifications per application name, processed before
    /// experiment-scope sets.
    licenses: IndexMap<String, Vec<EnvVarSet>>,
    success_criteria: Vec<SuccessCriterionDefinition>,
    always_print_foms: bool,
    results: Vec<ExperimentResult>,
    transaction_active: bool,
    latest_archive_path: Option<PathBuf>,
}

impl Workspace {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            shell: ShellKind::default(),
            variables: VariableMap::new(),
            templates: IndexMap::new(),
            licenses: IndexMap::new(),
            success_criteria: Vec::new(),
            always_print_foms: false,
            results: Vec::new(),
            transaction_active: false,
            latest_archive_path: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_str(&self) -> &str {
        self.root.to_str().unwrap_or("")
    }

    pub fn shell(&self) -> ShellKind {
        self.shell
    }

    pub fn set_shell(&mut self, shell: ShellKind) {
        self.shell = shell;
    }

    pub fn variables(&self) -> &VariableMap {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableMap {
        &mut self.variables
    }

    /// Register a template; its digest is computed from the contents.
    pub fn add_template(&mut self, name: impl Into<String>, contents: impl Into<String>) {
        let contents = contents.into();
        let digest = inventory::hash_string(&contents);
        self.templates
            .insert(name.into(), TemplateDefinition { contents, digest });
    }

    pub fn all_templates(&self) -> impl Iterator<Item = (&String, &TemplateDefinition)> {
        self.templates.iter()
    }

    pub fn template_names(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    pub fn add_license_env_set(&mut self, application: impl Into<String>, set: EnvVarSet) {
        self.licenses.entry(application.into()).or_default().push(set);
    }

    pub fn licenses_for(&self, application: &str) -> &[EnvVarSet] {
        self.licenses
            .get(application)
            .map(|sets| sets.as_slice())
            .unwrap_or(&[])
    }

    pub fn add_success_criterion(&mut self, criterion: SuccessCriterionDefinition) {
        self.success_criteria.push(criterion);
    }

    pub fn success_criteria(&self) -> &[SuccessCriterionDefinition] {
        &self.success_criteria
    }

    pub fn always_print_foms(&self) -> bool {
        self.always_print_foms
    }

    pub fn set_always_print_foms(&mut self, value: bool) {
        self.always_print_foms = value;
    }

    // Write transaction handling. The core performs directory creation and
    // file writes only while a transaction is active.

    pub fn begin_write_transaction(&mut self) -> Result<()> {
        if self.transaction_active {
            return Err(RambleError::TransactionRequired {
                operation: "begin_write_transaction (already active)".to_string(),
            });
        }
        std::fs::create_dir_all(&self.root)?;
        self.transaction_active = true;
        Ok(())
    }

    pub fn commit_write_transaction(&mut self) {
        self.transaction_active = false;
    }

    pub fn abort_write_transaction(&mut self) {
        self.transaction_active = false;
    }

    pub fn require_transaction(&self, operation: &str) -> Result<()> {
        if self.transaction_active {
            Ok(())
        } else {
            Err(RambleError::TransactionRequired {
                operation: operation.to_string(),
            })
        }
    }

    /// The master experiments script collecting every batch submission.
    pub fn experiments_script_path(&self) -> PathBuf {
        self.root.join("all_experiments")
    }

    /// Append one line to the experiments script. Append-only within a
    /// transaction.
    pub fn append_experiment_script(&self, line: &str) -> Result<()> {
        self.require_transaction("append_experiment_script")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.experiments_script_path())?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Create (once per run) and return the archive directory.
    pub fn archive_path(&mut self) -> Result<PathBuf> {
        self.require_transaction("archive_path")?;
        if let Some(path) = &self.latest_archive_path {
            return Ok(path.clone());
        }
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H.%M.%S");
        let path = self.root.join("archive").join(format!("archive.{}", stamp));
        std::fs::create_dir_all(&path)?;
        self.latest_archive_path = Some(path.clone());
        Ok(path)
    }

    // Result accumulation for the analyze pipeline.

    pub fn append_result(&mut self, result: ExperimentResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[ExperimentResult] {
        &self.results
    }

    pub fn take_results(&mut self) -> Vec<ExperimentResult> {
        std::mem::take(&mut self.results)
    }
}
