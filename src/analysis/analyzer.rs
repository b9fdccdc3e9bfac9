//! Log Analyzer
//!
//! Streams each referenced log file line by line, activating named
//! contexts on regex matches and recording figures of merit under the
//! most recent context value. Missing files and capture groups are
//! warnings, never fatal; they only influence per-experiment success.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use indexmap::IndexMap;
use regex_lite::{Captures, Regex};

use crate::application::modifier::ModifierInstance;
use crate::application::types::{ApplicationDefinition, FomContextDefinition};
use crate::error::Result;
use crate::expander::Expander;
use crate::experiment::Experiment;
use crate::value::{Value, VariableMap};
use crate::workspace::Workspace;

use super::criteria::SuccessCriteriaList;
use super::results::{ContextFoms, ExperimentResult, ExperimentStatus, FomRecord};

/// The pseudo-context for figures of merit that declare no contexts.
pub const NULL_CONTEXT: &str = "null";

#[derive(Debug, Clone, Default)]
pub struct FomValue {
    pub value: String,
    pub units: String,
    pub origin: String,
    pub origin_type: String,
}

/// Maps context display value to FOM name to captured value.
pub type FomTable = IndexMap<String, IndexMap<String, FomValue>>;

#[derive(Default)]
struct FileEntry {
    success_criteria: Vec<String>,
    contexts: Vec<String>,
    foms: Vec<String>,
}

struct CompiledContext {
    regex: Regex,
    format: String,
}

struct CompiledFom {
    regex: Regex,
    group: String,
    units: String,
    origin: String,
    origin_type: String,
    contexts: Vec<String>,
}

/// Analyzes one experiment's logs against its application and modifier
/// declarations.
pub struct Analyzer<'a> {
    pub definition: &'a ApplicationDefinition,
    pub modifiers: &'a [ModifierInstance],
}

impl<'a> Analyzer<'a> {
    pub fn new(definition: &'a ApplicationDefinition, modifiers: &'a [ModifierInstance]) -> Self {
        Self {
            definition,
            modifiers,
        }
    }

    pub fn analyze(&self, experiment: &Experiment, workspace: &Workspace) -> Result<ExperimentResult> {
        let expander = experiment.expander();

        let mut criteria = self.build_criteria(workspace)?;
        let (files, contexts, foms) = self.analysis_tables(experiment, &mut criteria)?;

        let mut fom_values = FomTable::new();

        for (path, entry) in &files {
            log::debug!("Reading log file: {}", path);
            let file = match File::open(path) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("Could not open log file {}: {}", path, e);
                    continue;
                }
            };

            // Each file starts with no active contexts.
            let mut active_contexts: IndexMap<String, String> = IndexMap::new();

            for line in BufReader::new(file).lines() {
                let line = line?;

                criteria.check_line(&entry.success_criteria, &line);

                for context_name in &entry.contexts {
                    let context = &contexts[context_name];
                    if let Some(caps) = captures_at_start(&context.regex, &line) {
                        let display = format_context(&context.regex, &caps, &context.format);
                        log::debug!("Context match {} -- {}", context_name, display);
                        fom_values.entry(display.clone()).or_default();
                        active_contexts.insert(context_name.clone(), display);
                    }
                }

                for fom_name in &entry.foms {
                    let fom = &foms[fom_name];
                    let caps = match captures_at_start(&fom.regex, &line) {
                        Some(caps) => caps,
                        None => continue,
                    };
                    let value = match caps.name(&fom.group) {
                        Some(m) => m.as_str().to_string(),
                        None => continue,
                    };

                    // Named groups become expansion variables for the FOM
                    // name template.
                    let mut fom_vars = VariableMap::new();
                    for group in fom.regex.capture_names().flatten() {
                        if let Some(m) = caps.name(group) {
                            fom_vars.insert(
                                group.to_string(),
                                Value::from(m.as_str().to_string()),
                            );
                        }
                    }
                    let expanded_name =
                        expander.expand_var(fom_name, Some(&fom_vars), true)?;

                    let fom_contexts: Vec<String> = if fom.contexts.is_empty() {
                        vec![NULL_CONTEXT.to_string()]
                    } else {
                        fom.contexts
                            .iter()
                            .map(|c| {
                                active_contexts
                                    .get(c)
                                    .cloned()
                                    .unwrap_or_else(|| NULL_CONTEXT.to_string())
                            })
                            .collect()
                    };

                    for context in fom_contexts {
                        fom_values.entry(context).or_default().insert(
                            expanded_name.clone(),
                            FomValue {
                                value: value.clone(),
                                units: fom.units.clone(),
                                origin: fom.origin.clone(),
                                origin_type: fom.origin_type.clone(),
                            },
                        );
                    }
                }
            }
        }

        criteria.evaluate_functions(&fom_values);

        let success = !fom_values.is_empty() && criteria.passed();

        let mut result = ExperimentResult {
            name: experiment.namespace.clone(),
            experiment_chain: if experiment.chain_order.is_empty() {
                vec![experiment.namespace.clone()]
            } else {
                experiment.chain_order.clone()
            },
            status: if success {
                ExperimentStatus::Success
            } else {
                ExperimentStatus::Failed
            },
            variables: None,
            raw_variables: None,
            contexts: None,
        };

        if success || workspace.always_print_foms() {
            let mut variables = IndexMap::new();
            let mut raw_variables = IndexMap::new();
            for (name, value) in &experiment.variables {
                raw_variables.insert(name.clone(), value.clone());
                let rendered = value.render();
                let expanded = expander
                    .expand_var(&rendered, None, true)
                    .unwrap_or(rendered);
                variables.insert(name.clone(), expanded);
            }
            result.variables = Some(variables);
            result.raw_variables = Some(raw_variables);

            let mut context_list = Vec::new();
            for (context, fom_map) in &fom_values {
                let foms = fom_map
                    .iter()
                    .map(|(name, fom)| FomRecord {
                        name: name.clone(),
                        value: fom.value.clone(),
                        units: fom.units.clone(),
                        origin: fom.origin.clone(),
                        origin_type: fom.origin_type.clone(),
                    })
                    .collect();
                context_list.push(ContextFoms {
                    name: context.clone(),
                    foms,
                });
            }
            result.contexts = Some(context_list);
        }

        Ok(result)
    }

    fn build_criteria(&self, workspace: &Workspace) -> Result<SuccessCriteriaList> {
        let mut criteria = SuccessCriteriaList::new();

        for definition in workspace.success_criteria() {
            criteria.add_string_criterion(
                "workspace",
                &definition.name,
                &definition.match_regex,
                &definition.file,
            )?;
        }
        for definition in &self.definition.success_criteria {
            criteria.add_string_criterion(
                "application_definition",
                &definition.name,
                &definition.match_regex,
                &definition.file,
            )?;
        }
        for modifier in self.modifiers {
            for definition in &modifier.definition.success_criteria {
                criteria.add_string_criterion(
                    "modifier_definition",
                    &definition.name,
                    &definition.match_regex,
                    &definition.file,
                )?;
            }
        }

        if let Some(function) = &self.definition.evaluate_success {
            criteria.add_function_criterion(
                "application_definition",
                "_application_function",
                function.clone(),
            );
        }

        Ok(criteria)
    }

    /// Build the per-file work lists plus the compiled context and FOM
    /// tables.
    #[allow(clippy::type_complexity)]
    fn analysis_tables(
        &self,
        experiment: &Experiment,
        criteria: &mut SuccessCriteriaList,
    ) -> Result<(
        IndexMap<String, FileEntry>,
        IndexMap<String, CompiledContext>,
        IndexMap<String, CompiledFom>,
    )> {
        let expander = experiment.expander();

        let mut files: IndexMap<String, FileEntry> = IndexMap::new();
        let mut contexts: IndexMap<String, CompiledContext> = IndexMap::new();
        let mut foms: IndexMap<String, CompiledFom> = IndexMap::new();

        // Register criteria files first.
        let criterion_files: Vec<(String, String)> = criteria
            .all_criteria()
            .filter_map(|c| c.file().map(|f| (c.name.clone(), f.to_string())))
            .collect();
        for (name, file_template) in criterion_files {
            let path = expander.expand_var(&file_template, None, true)?;
            if !files.contains_key(&path) {
                if !Path::new(&path).exists() {
                    continue;
                }
                files.insert(path.clone(), FileEntry::default());
            }
            files[&path].success_criteria.push(name);
        }

        // Merge FOM definitions: application first, then modifiers with
        // their variable modifications applied.
        let mut fom_definitions: Vec<(String, crate::application::types::FomDefinition, String, String)> =
            Vec::new();
        for (name, fom) in &self.definition.figures_of_merit {
            fom_definitions.push((
                name.clone(),
                fom.clone(),
                self.definition.name.clone(),
                "application".to_string(),
            ));
        }

        let mut fom_contexts: IndexMap<String, FomContextDefinition> =
            self.definition.figure_of_merit_contexts.clone();
        for modifier in self.modifiers {
            for (name, context) in &modifier.definition.figure_of_merit_contexts {
                fom_contexts.insert(name.clone(), context.clone());
            }

            let mod_vars = modifier.modded_variables(experiment);
            for (name, fom) in &modifier.definition.figures_of_merit {
                let mut expanded = fom.clone();
                expanded.log_file =
                    expander.expand_var(&fom.log_file, Some(&mod_vars), true)?;
                expanded.units = expander.expand_var(&fom.units, Some(&mod_vars), true)?;
                fom_definitions.push((
                    name.clone(),
                    expanded,
                    modifier.name().to_string(),
                    "modifier".to_string(),
                ));
            }
        }

        for (name, fom, origin, origin_type) in fom_definitions {
            let regex = match Regex::new(&fom.regex) {
                Ok(regex) => regex,
                Err(e) => {
                    log::warn!("Skipping figure of merit {}: invalid regex ({})", name, e);
                    continue;
                }
            };
            // A FOM whose configured group is absent can never capture.
            if !regex.capture_names().flatten().any(|g| g == fom.group_name) {
                log::warn!(
                    "Skipping figure of merit {}: regex has no capture group \"{}\"",
                    name,
                    fom.group_name
                );
                continue;
            }

            let path = expander.expand_var(&fom.log_file, None, true)?;
            if !files.contains_key(&path) {
                if Path::new(&path).exists() {
                    files.insert(path.clone(), FileEntry::default());
                } else {
                    log::warn!("Log file {} for figure of merit {} is missing", path, name);
                }
            }

            if let Some(entry) = files.get_mut(&path) {
                for context in &fom.contexts {
                    if !entry.contexts.contains(context) {
                        entry.contexts.push(context.clone());
                    }
                }
                entry.foms.push(name.clone());
            }

            // Compile each referenced context once.
            for context_name in &fom.contexts {
                if contexts.contains_key(context_name) {
                    continue;
                }
                if let Some(definition) = fom_contexts.get(context_name) {
                    match Regex::new(&definition.regex) {
                        Ok(regex) => {
                            contexts.insert(
                                context_name.clone(),
                                CompiledContext {
                                    regex,
                                    format: definition.output_format.clone(),
                                },
                            );
                        }
                        Err(e) => {
                            log::warn!(
                                "Skipping context {}: invalid regex ({})",
                                context_name,
                                e
                            );
                        }
                    }
                }
            }

            foms.insert(
                name,
                CompiledFom {
                    regex,
                    group: fom.group_name.clone(),
                    units: fom.units.clone(),
                    origin,
                    origin_type,
                    contexts: fom.contexts.clone(),
                },
            );
        }

        // Drop context references that never compiled.
        for entry in files.values_mut() {
            entry.contexts.retain(|c| contexts.contains_key(c));
        }

        Ok((files, contexts, foms))
    }
}

/// Match a regex the way line scanners expect: the match must start at the
/// beginning of the line.
fn captures_at_start<'t>(regex: &Regex, line: &'t str) -> Option<Captures<'t>> {
    regex
        .captures(line)
        .filter(|caps| caps.get(0).map_or(false, |m| m.start() == 0))
}

/// A context's display value: the format string with braces stripped, an
/// equals sign, and the format rendered with the match's named groups.
fn format_context(regex: &Regex, caps: &Captures<'_>, format: &str) -> String {
    let stripped: String = format.chars().filter(|c| *c != '{' && *c != '}').collect();

    let mut vars = VariableMap::new();
    for name in regex.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            vars.insert(name.to_string(), Value::from(m.as_str().to_string()));
        }
    }
    let expander = Expander::new(&vars);
    let rendered = expander
        .expand_var(format, None, true)
        .unwrap_or_else(|_| format.to_string());

    format!("{} = {}", stripped, rendered)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indexmap::IndexMap;

    use super::*;
    use crate::application::types::{FomDefinition, SuccessCriterionDefinition};
    use crate::application::ApplicationDefinition;
    use crate::experiment::{ContextDecl, Exclusions, ExperimentSet};
    use crate::value::variable_map;

    fn test_definition() -> ApplicationDefinition {
        let mut def = ApplicationDefinition::new("basic");
        def.add_figure_of_merit_context(
            "iter",
            FomContextDefinition {
                regex: r".*Iteration (?P<iter>[0-9]+)".to_string(),
                output_format: "{iter}".to_string(),
            },
        );
        def.add_figure_of_merit(
            "rate",
            FomDefinition {
                log_file: "{log_file}".to_string(),
                regex: r".*Rate: (?P<rate>[0-9.]+) GF/s".to_string(),
                group_name: "rate".to_string(),
                units: "GF/s".to_string(),
                contexts: vec!["iter".to_string()],
            },
        );
        def
    }

    fn test_experiment(root: &str) -> Experiment {
        let mut set = ExperimentSet::with_root("test", root, VariableMap::new(), &[]).unwrap();
        set.set_application_context(ContextDecl::new("basic").with_variables(variable_map([
            ("mpi_command", Value::from("")),
            ("batch_submit", Value::from("")),
        ])))
        .unwrap();
        set.set_workload_context(ContextDecl::new("test_wl")).unwrap();
        set.set_experiment_context(
            ContextDecl::new("series1"),
            IndexMap::new(),
            Vec::new(),
            Exclusions::default(),
        )
        .unwrap();
        set.build_experiment_chains().unwrap();
        set.experiments.shift_remove("basic.test_wl.series1").unwrap()
    }

    fn write_log(experiment: &Experiment, contents: &str) -> String {
        let path = experiment
            .expander()
            .expand_var("{log_file}", None, true)
            .unwrap();
        let parent = std::path::Path::new(&path).parent().unwrap();
        std::fs::create_dir_all(parent).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_fom_capture_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = test_experiment(dir.path().to_str().unwrap());
        write_log(&experiment, "Iteration 3\nRate: 42.5 GF/s\n");

        let workspace = Workspace::new("test", dir.path());
        let definition = test_definition();
        let analyzer = Analyzer::new(&definition, &[]);
        let result = analyzer.analyze(&experiment, &workspace).unwrap();

        assert_eq!(result.status, ExperimentStatus::Success);
        let contexts = result.contexts.unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].name, "iter = 3");
        assert_eq!(contexts[0].foms.len(), 1);
        let fom = &contexts[0].foms[0];
        assert_eq!(fom.name, "rate");
        assert_eq!(fom.value, "42.5");
        assert_eq!(fom.units, "GF/s");
        assert_eq!(fom.origin, "basic");
        assert_eq!(fom.origin_type, "application");
    }

    #[test]
    fn test_context_reactivation() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = test_experiment(dir.path().to_str().unwrap());
        write_log(
            &experiment,
            "Iteration 1\nRate: 10.0 GF/s\nIteration 2\nRate: 20.0 GF/s\n",
        );

        let workspace = Workspace::new("test", dir.path());
        let definition = test_definition();
        let analyzer = Analyzer::new(&definition, &[]);
        let result = analyzer.analyze(&experiment, &workspace).unwrap();

        let contexts = result.contexts.unwrap();
        let names: Vec<&str> = contexts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["iter = 1", "iter = 2"]);
        assert_eq!(contexts[0].foms[0].value, "10.0");
        assert_eq!(contexts[1].foms[0].value, "20.0");
    }

    #[test]
    fn test_fom_without_context_uses_null() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = test_experiment(dir.path().to_str().unwrap());
        write_log(&experiment, "Rate: 5.0 GF/s\n");

        let mut definition = test_definition();
        definition.figures_of_merit.get_mut("rate").unwrap().contexts = Vec::new();
        let workspace = Workspace::new("test", dir.path());
        let analyzer = Analyzer::new(&definition, &[]);
        let result = analyzer.analyze(&experiment, &workspace).unwrap();

        let contexts = result.contexts.unwrap();
        assert_eq!(contexts[0].name, NULL_CONTEXT);
    }

    #[test]
    fn test_missing_log_file_fails_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = test_experiment(dir.path().to_str().unwrap());

        let workspace = Workspace::new("test", dir.path());
        let definition = test_definition();
        let analyzer = Analyzer::new(&definition, &[]);
        let result = analyzer.analyze(&experiment, &workspace).unwrap();

        assert_eq!(result.status, ExperimentStatus::Failed);
        assert!(result.contexts.is_none());
    }

    #[test]
    fn test_unsatisfied_criterion_fails_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = test_experiment(dir.path().to_str().unwrap());
        write_log(&experiment, "Iteration 3\nRate: 42.5 GF/s\n");

        let mut definition = test_definition();
        definition.add_success_criterion(SuccessCriterionDefinition {
            name: "finished".to_string(),
            match_regex: r".*Run complete".to_string(),
            file: "{log_file}".to_string(),
        });
        let workspace = Workspace::new("test", dir.path());
        let analyzer = Analyzer::new(&definition, &[]);
        let result = analyzer.analyze(&experiment, &workspace).unwrap();
        assert_eq!(result.status, ExperimentStatus::Failed);
    }

    #[test]
    fn test_satisfied_criterion_and_function() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = test_experiment(dir.path().to_str().unwrap());
        write_log(&experiment, "Iteration 3\nRate: 42.5 GF/s\nRun complete\n");

        let mut definition = test_definition();
        definition.add_success_criterion(SuccessCriterionDefinition {
            name: "finished".to_string(),
            match_regex: r".*Run complete".to_string(),
            file: "{log_file}".to_string(),
        });
        definition.evaluate_success = Some(Arc::new(|foms: &FomTable| {
            foms.values().any(|m| m.contains_key("rate"))
        }));
        let workspace = Workspace::new("test", dir.path());
        let analyzer = Analyzer::new(&definition, &[]);
        let result = analyzer.analyze(&experiment, &workspace).unwrap();
        assert_eq!(result.status, ExperimentStatus::Success);
    }

    #[test]
    fn test_fom_name_template_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = test_experiment(dir.path().to_str().unwrap());
        write_log(&experiment, "Time for phase warmup: 1.5s\n");

        let mut definition = ApplicationDefinition::new("basic");
        definition.add_figure_of_merit(
            "{phase} time",
            FomDefinition {
                log_file: "{log_file}".to_string(),
                regex: r"Time for phase (?P<phase>\w+): (?P<time>[0-9.]+)s".to_string(),
                group_name: "time".to_string(),
                units: "s".to_string(),
                contexts: Vec::new(),
            },
        );
        let workspace = Workspace::new("test", dir.path());
        let analyzer = Analyzer::new(&definition, &[]);
        let result = analyzer.analyze(&experiment, &workspace).unwrap();

        let contexts = result.contexts.unwrap();
        assert_eq!(contexts[0].foms[0].name, "warmup time");
        assert_eq!(contexts[0].foms[0].value, "1.5");
    }

    #[test]
    fn test_fom_with_missing_group_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = test_experiment(dir.path().to_str().unwrap());
        write_log(&experiment, "Rate: 5.0 GF/s\n");

        let mut definition = test_definition();
        definition.figures_of_merit.get_mut("rate").unwrap().group_name =
            "missing_group".to_string();
        let workspace = Workspace::new("test", dir.path());
        let analyzer = Analyzer::new(&definition, &[]);
        let result = analyzer.analyze(&experiment, &workspace).unwrap();
        // The only FOM was skipped, so nothing was captured.
        assert_eq!(result.status, ExperimentStatus::Failed);
    }
}
