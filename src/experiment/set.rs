//! Experiment Set
//!
//! Layers scope declarations (workspace, application, workload,
//! experiment), validates reserved and required identifiers, renders the
//! cross product of each experiment declaration, and owns the resulting
//! experiments. Chained experiments are registered separately from primary
//! ones.

use indexmap::IndexMap;

use crate::error::{RambleError, Result};
use crate::expander::Expander;
use crate::expr::CrossExperimentLookup;
use crate::keywords;
use crate::value::{Value, VariableMap};
use crate::workspace::Workspace;

use super::render::render_experiments;
use super::types::{ContextDecl, Exclusions, Experiment};

pub struct ExperimentSet {
    /// Workspace-scope variables, including the engine-seeded path layout.
    workspace_variables: VariableMap,
    application_context: Option<ContextDecl>,
    workload_context: Option<ContextDecl>,
    pub experiments: IndexMap<String, Experiment>,
    pub chained_experiments: IndexMap<String, Experiment>,
}

impl ExperimentSet {
    pub fn new(workspace: &Workspace) -> Result<Self> {
        Self::with_root(
            workspace.name(),
            workspace.root_str(),
            workspace.variables().clone(),
            &workspace.template_names(),
        )
    }

    /// Build a set over an explicit root path and workspace variable map.
    pub fn with_root(
        name: &str,
        root: &str,
        user_variables: VariableMap,
        template_names: &[String],
    ) -> Result<Self> {
        check_reserved("workspace", &user_variables)?;

        let mut vars = VariableMap::new();
        vars.insert(keywords::WORKSPACE_NAME.to_string(), Value::from(name));
        vars.insert(
            keywords::WORKSPACE_RUN_DIR.to_string(),
            Value::from(format!("{}/experiments", root)),
        );
        vars.insert(
            keywords::WORKSPACE_INPUT_DIR.to_string(),
            Value::from(format!("{}/inputs", root)),
        );
        vars.insert(
            keywords::LOG_DIR.to_string(),
            Value::from(format!("{}/logs", root)),
        );
        vars.insert(
            keywords::APPLICATION_RUN_DIR.to_string(),
            Value::from("{workspace_run_dir}/{application_name}"),
        );
        vars.insert(
            keywords::APPLICATION_INPUT_DIR.to_string(),
            Value::from("{workspace_input_dir}/{application_name}"),
        );
        vars.insert(
            keywords::WORKLOAD_RUN_DIR.to_string(),
            Value::from("{application_run_dir}/{workload_name}"),
        );
        vars.insert(
            keywords::WORKLOAD_INPUT_DIR.to_string(),
            Value::from("{application_input_dir}/{workload_name}"),
        );
        vars.insert(
            keywords::EXPERIMENT_RUN_DIR.to_string(),
            Value::from("{workload_run_dir}/{experiment_name}"),
        );
        vars.insert(
            "experiment_namespace".to_string(),
            Value::from("{application_name}.{workload_name}.{experiment_name}"),
        );
        vars.insert(
            "log_file".to_string(),
            Value::from("{experiment_run_dir}/{experiment_name}.out"),
        );
        vars.insert(keywords::ENV_NAME.to_string(), Value::from("{application_name}"));

        // Rendered workspace templates land in the run directory; their
        // paths are referenceable by name.
        for template in template_names {
            vars.insert(
                template.clone(),
                Value::from(format!("{{experiment_run_dir}}/{}", template)),
            );
        }

        for (key, value) in user_variables {
            vars.insert(key, value);
        }

        Ok(Self {
            workspace_variables: vars,
            application_context: None,
            workload_context: None,
            experiments: IndexMap::new(),
            chained_experiments: IndexMap::new(),
        })
    }

    pub fn set_application_context(&mut self, context: ContextDecl) -> Result<()> {
        check_reserved(&format!("application {}", context.name), &context.variables)?;
        self.workload_context = None;
        self.application_context = Some(context);
        Ok(())
    }

    pub fn set_workload_context(&mut self, context: ContextDecl) -> Result<()> {
        let app_name = self.application_name();
        check_reserved(
            &format!("workload {}.{}", app_name, context.name),
            &context.variables,
        )?;
        self.workload_context = Some(context);
        Ok(())
    }

    /// Materialize the experiments declared by one experiment context.
    pub fn set_experiment_context(
        &mut self,
        context: ContextDecl,
        zips: IndexMap<String, Vec<String>>,
        matrices: Vec<Vec<String>>,
        excludes: Exclusions,
    ) -> Result<()> {
        let app = self
            .application_context
            .as_ref()
            .ok_or_else(|| RambleError::UnknownApplication {
                name: "<unset>".to_string(),
            })?
            .clone();
        let workload = self
            .workload_context
            .as_ref()
            .ok_or_else(|| RambleError::UnknownWorkload {
                application: app.name.clone(),
                workload: "<unset>".to_string(),
            })?
            .clone();

        let template_namespace = format!("{}.{}.{}", app.name, workload.name, context.name);
        check_reserved(
            &format!("experiment {}", template_namespace),
            &context.variables,
        )?;

        // Merge the scope stack, inner scopes shadowing outer ones.
        let mut merged = self.workspace_variables.clone();
        for (k, v) in &app.variables {
            merged.insert(k.clone(), v.clone());
        }
        merged.insert(
            keywords::APPLICATION_NAME.to_string(),
            Value::from(app.name.clone()),
        );
        for (k, v) in &workload.variables {
            merged.insert(k.clone(), v.clone());
        }
        merged.insert(
            keywords::WORKLOAD_NAME.to_string(),
            Value::from(workload.name.clone()),
        );
        for (k, v) in &context.variables {
            merged.insert(k.clone(), v.clone());
        }

        // Every required key must be bound somewhere in the stack.
        for key in keywords::required_keys() {
            if !merged.contains_key(key) {
                return Err(RambleError::RequiredKeyMissing {
                    experiment: template_namespace,
                    key: key.to_string(),
                });
            }
        }

        let mut env_var_sets = app.env_var_sets.clone();
        env_var_sets.extend(workload.env_var_sets.clone());
        env_var_sets.extend(context.env_var_sets.clone());

        let mut internals = app.internals.clone();
        internals.merge(&workload.internals);
        internals.merge(&context.internals);

        let mut chained = app.chained_experiments.clone();
        chained.extend(workload.chained_experiments.clone());
        chained.extend(context.chained_experiments.clone());

        let mut modifiers = app.modifiers.clone();
        modifiers.extend(workload.modifiers.clone());
        modifiers.extend(context.modifiers.clone());

        let rendered = render_experiments(&context.name, &merged, &zips, &matrices, &excludes)?;

        for render in rendered {
            let namespace = format!("{}.{}.{}", app.name, workload.name, render.name);
            if self.experiments.contains_key(&namespace)
                || self.chained_experiments.contains_key(&namespace)
            {
                return Err(RambleError::DuplicateExperiment { name: namespace });
            }

            let mut variables = render.variables;
            variables.insert(
                keywords::EXPERIMENT_NAME.to_string(),
                Value::from(render.name.clone()),
            );

            let mut experiment = Experiment::new(
                namespace.clone(),
                app.name.clone(),
                workload.name.clone(),
                variables,
            );
            experiment.env_var_sets = env_var_sets.clone();
            experiment.internals = internals.clone();
            experiment.is_template = context.is_template;
            experiment.chained_experiments = chained.clone();
            experiment.modifiers = modifiers.clone();

            self.experiments.insert(namespace, experiment);
        }

        Ok(())
    }

    fn application_name(&self) -> String {
        self.application_context
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    pub fn get_experiment(&self, name: &str) -> Option<&Experiment> {
        self.experiments
            .get(name)
            .or_else(|| self.chained_experiments.get(name))
    }

    pub fn get_experiment_mut(&mut self, name: &str) -> Option<&mut Experiment> {
        if self.experiments.contains_key(name) {
            self.experiments.get_mut(name)
        } else {
            self.chained_experiments.get_mut(name)
        }
    }

    /// Primary experiment names matching a glob pattern, in insertion order.
    pub fn search_primary_experiments(&self, pattern: &str) -> Vec<String> {
        match glob::Pattern::new(pattern) {
            Ok(matcher) => self
                .experiments
                .keys()
                .filter(|name| matcher.matches(name))
                .cloned()
                .collect(),
            Err(_) => self
                .experiments
                .keys()
                .filter(|name| name.as_str() == pattern)
                .cloned()
                .collect(),
        }
    }

    pub fn add_chained_experiment(&mut self, name: String, experiment: Experiment) {
        self.chained_experiments.insert(name, experiment);
    }

    /// All experiments, primary first, then chained.
    pub fn all_experiments(&self) -> impl Iterator<Item = (&String, &Experiment)> {
        self.experiments.iter().chain(self.chained_experiments.iter())
    }

    /// Expand a template within the named experiment, for cross-experiment
    /// references.
    pub fn get_var_from_experiment(&self, namespace: &str, template: &str) -> Option<String> {
        let experiment = self.get_experiment(namespace)?;
        let expander = Expander::with_lookup(&experiment.variables, self);
        expander.expand_var(template, None, true).ok()
    }
}

impl CrossExperimentLookup for ExperimentSet {
    fn expand_in_experiment(&self, namespace: &str, template: &str) -> Option<String> {
        self.get_var_from_experiment(namespace, template)
    }
}

fn check_reserved(scope: &str, variables: &VariableMap) -> Result<()> {
    for name in variables.keys() {
        if keywords::is_reserved(name) {
            return Err(RambleError::ReservedVariable {
                scope: scope.to_string(),
                variable: name.clone(),
            });
        }
    }
    Ok(())
}
