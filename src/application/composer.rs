//! Command Composer
//!
//! Per-experiment setup phases: default variables, input paths, command
//! injection, template materialization, and inventory writing. Commands are
//! only ever emitted as text; execution belongs to an external batch
//! system.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex_lite::Regex;

use crate::error::{RambleError, Result};
use crate::experiment::Experiment;
use crate::keywords;
use crate::value::{Value, VariableMap};
use crate::workspace::inventory::{
    clean_hash_variables, hash_string, write_json_atomic, Inventory, DigestEntry,
    INVENTORY_FILE_NAME,
};
use crate::workspace::Workspace;

use super::env_mods::env_var_commands;
use super::modifier::{parse_modifier_builtin, ModifierInstance};
use super::registry::ObjectRegistry;
use super::types::{
    ApplicationDefinition, BuiltinContext, CommandExecutable, InjectionMethod, BUILTIN_PREFIX,
};

lazy_static! {
    static ref BUILTIN_RE: Regex = Regex::new(r"^builtin::(?P<func>.*)$").unwrap();
}

/// Setup phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    SetDefaultVariables,
    ResolveInputsAndPaths,
    InjectCommands,
    MakeExperiments,
    WriteInventory,
}

pub const SETUP_PHASES: [SetupPhase; 5] = [
    SetupPhase::SetDefaultVariables,
    SetupPhase::ResolveInputsAndPaths,
    SetupPhase::InjectCommands,
    SetupPhase::MakeExperiments,
    SetupPhase::WriteInventory,
];

/// Composes an experiment's on-disk artifacts from its application
/// definition and modifier instances.
pub struct Composer {
    pub definition: Arc<ApplicationDefinition>,
    pub modifiers: Vec<ModifierInstance>,
}

impl Composer {
    /// Resolve the experiment's application and modifier references through
    /// the registry.
    pub fn new(registry: &ObjectRegistry, experiment: &Experiment) -> Result<Self> {
        let definition = registry.application(&experiment.application)?;
        let mut modifiers = Vec::new();
        for reference in &experiment.modifiers {
            let def = registry.modifier(&reference.name)?;
            modifiers.push(ModifierInstance::new(
                def,
                reference.mode.clone(),
                reference.on_executables.clone(),
            )?);
        }
        Ok(Self {
            definition,
            modifiers,
        })
    }

    /// Run every setup phase. Template experiments are skipped entirely.
    pub fn run_setup(&self, experiment: &mut Experiment, workspace: &mut Workspace) -> Result<()> {
        if experiment.is_template {
            log::debug!("{} is a template. Skipping phases", experiment.namespace);
            return Ok(());
        }
        for phase in SETUP_PHASES {
            self.run_phase(phase, experiment, workspace)?;
        }
        Ok(())
    }

    pub fn run_phase(
        &self,
        phase: SetupPhase,
        experiment: &mut Experiment,
        workspace: &mut Workspace,
    ) -> Result<()> {
        match phase {
            SetupPhase::SetDefaultVariables => self.set_default_variables(experiment),
            SetupPhase::ResolveInputsAndPaths => self.resolve_inputs_and_paths(experiment),
            SetupPhase::InjectCommands => self.inject_commands(experiment, workspace),
            SetupPhase::MakeExperiments => self.make_experiments(experiment, workspace),
            SetupPhase::WriteInventory => self.write_inventory(experiment, workspace),
        }
    }

    fn workload_name(&self, experiment: &Experiment) -> Result<String> {
        let workload = experiment.workload.clone();
        if !self.definition.workloads.contains_key(&workload) {
            return Err(RambleError::UnknownWorkload {
                application: self.definition.name.clone(),
                workload,
            });
        }
        Ok(workload)
    }

    /// Bind workload-variable defaults that the merged scopes left unset.
    fn set_default_variables(&self, experiment: &mut Experiment) -> Result<()> {
        let workload = self.workload_name(experiment)?;
        if let Some(wl_vars) = self.definition.workload_variables.get(&workload) {
            for (var, conf) in wl_vars {
                if !experiment.variables.contains_key(var) {
                    experiment.variables.insert(var.clone(), conf.default.clone());
                }
            }
        }
        Ok(())
    }

    /// Bind each workload input's on-disk path to its input name.
    fn resolve_inputs_and_paths(&self, experiment: &mut Experiment) -> Result<()> {
        let workload = self.workload_name(experiment)?;
        let input_names = self.definition.workloads[&workload].inputs.clone();

        let mut bindings: Vec<(String, Value)> = Vec::new();
        {
            let expander = experiment.expander();
            let workload_input_dir = expander.workload_input_dir()?;

            for input_name in &input_names {
                let input = self.definition.inputs.get(input_name).ok_or_else(|| {
                    RambleError::UnknownInput {
                        application: self.definition.name.clone(),
                        input: input_name.clone(),
                    }
                })?;

                let file_name = input.file_name();
                let target_name = if input.expand {
                    input_name.clone()
                } else {
                    file_name
                };
                let mut extra = VariableMap::new();
                extra.insert(
                    keywords::INPUT_NAME.to_string(),
                    Value::from(target_name),
                );
                let target = expander.expand_var(&input.target_dir, Some(&extra), true)?;
                bindings.push((
                    input_name.clone(),
                    Value::from(format!("{}/{}", workload_input_dir, target)),
                ));
            }
        }

        for (name, value) in bindings {
            experiment.variables.insert(name, value);
        }
        Ok(())
    }

    /// The executables this experiment runs, with required builtins
    /// injected. An explicit ordering in internals wins untouched.
    fn resolved_executables(&self, experiment: &Experiment) -> Result<Vec<String>> {
        let workload = self.workload_name(experiment)?;

        if let Some(explicit) = &experiment.internals.executables {
            return Ok(explicit.clone());
        }

        let mut executables = self.definition.workloads[&workload].executables.clone();

        // Required application builtins, prepends in reverse so the first
        // registered lands first.
        let required: Vec<(&String, InjectionMethod)> = self
            .definition
            .builtins
            .iter()
            .filter(|(_, def)| def.required)
            .map(|(name, def)| (name, def.injection_method))
            .collect();
        for (name, method) in required.iter().rev() {
            if *method == InjectionMethod::Prepend && !executables.contains(*name) {
                executables.insert(0, (*name).clone());
            }
        }
        for (name, method) in &required {
            if *method == InjectionMethod::Append && !executables.contains(*name) {
                executables.push((*name).clone());
            }
        }

        // Required modifier builtins, same injection rules.
        let mut mod_prepend: Vec<String> = Vec::new();
        let mut mod_append: Vec<String> = Vec::new();
        for modifier in &self.modifiers {
            for (name, def) in &modifier.definition.builtins {
                if !def.required {
                    continue;
                }
                match def.injection_method {
                    InjectionMethod::Prepend => {
                        if !mod_prepend.contains(name) {
                            mod_prepend.push(name.clone());
                        }
                    }
                    InjectionMethod::Append => {
                        if !mod_append.contains(name) {
                            mod_append.push(name.clone());
                        }
                    }
                }
            }
        }
        for name in mod_prepend.iter().rev() {
            if !executables.contains(name) {
                executables.insert(0, name.clone());
            }
        }
        for name in mod_append {
            if !executables.contains(&name) {
                executables.push(name);
            }
        }

        Ok(executables)
    }

    /// Find a non-builtin executable: configuration-defined custom
    /// executables shadow application ones.
    fn find_executable(
        &self,
        experiment: &Experiment,
        name: &str,
    ) -> Result<CommandExecutable> {
        if let Some(custom) = experiment.internals.custom_executables.get(name) {
            return Ok(custom.clone());
        }
        self.definition
            .executables
            .get(name)
            .cloned()
            .ok_or_else(|| RambleError::UnknownExecutable {
                experiment: experiment.namespace.clone(),
                executable: name.to_string(),
            })
    }

    /// Compose the full command sequence and bind it to `command`.
    fn inject_commands(&self, experiment: &mut Experiment, workspace: &Workspace) -> Result<()> {
        let executables = self.resolved_executables(experiment)?;

        let command = {
            let expander = experiment.expander();
            let mut command: Vec<String> = Vec::new();

            // Chained experiments scheduled before the root.
            for chained in &experiment.chain_prepend {
                if let Some(cmd) = experiment.chain_commands.get(chained) {
                    command.push(cmd.clone());
                }
            }

            // Purge every redirect target so logs start empty.
            let mut logs: Vec<String> = Vec::new();
            for name in &executables {
                if BUILTIN_RE.is_match(name) || parse_modifier_builtin(name).is_some() {
                    continue;
                }
                let config = self.find_executable(experiment, name)?;
                if let Some(redirect) = &config.redirect {
                    if !logs.contains(redirect) {
                        logs.push(redirect.clone());
                    }
                }
            }
            for log in &logs {
                command.push(format!("rm -f \"{}\"", log));
                command.push(format!("touch \"{}\"", log));
            }

            for name in &executables {
                let mut exec_vars = VariableMap::new();
                exec_vars.insert("executable_name".to_string(), Value::from(name.clone()));
                for modifier in &self.modifiers {
                    if modifier.applies_to_executable(name) {
                        for (var, value) in modifier.modded_variables(experiment) {
                            exec_vars.insert(var, value);
                        }
                    }
                }

                let ctx = BuiltinContext {
                    experiment,
                    definition: &self.definition,
                    workspace,
                    modifiers: &self.modifiers,
                };

                if name.starts_with(BUILTIN_PREFIX) {
                    let builtin = self.definition.builtins.get(name).ok_or_else(|| {
                        RambleError::Builtin {
                            experiment: experiment.namespace.clone(),
                            builtin: name.clone(),
                            message: "builtin is not registered".to_string(),
                        }
                    })?;
                    let cmds =
                        (builtin.generator)(&ctx).map_err(|e| RambleError::Builtin {
                            experiment: experiment.namespace.clone(),
                            builtin: name.clone(),
                            message: e.to_string(),
                        })?;
                    for cmd in cmds {
                        command.push(expander.expand_var(&cmd, Some(&exec_vars), true)?);
                    }
                } else if let Some((mod_name, _)) = parse_modifier_builtin(name) {
                    let modifier = self
                        .modifiers
                        .iter()
                        .find(|m| m.name() == mod_name)
                        .ok_or_else(|| RambleError::Builtin {
                            experiment: experiment.namespace.clone(),
                            builtin: name.clone(),
                            message: format!("modifier {} is not attached", mod_name),
                        })?;
                    let builtin =
                        modifier.definition.builtins.get(name).ok_or_else(|| {
                            RambleError::Builtin {
                                experiment: experiment.namespace.clone(),
                                builtin: name.clone(),
                                message: "builtin is not registered".to_string(),
                            }
                        })?;
                    let cmds = (builtin.generator)(&ctx, modifier).map_err(|e| {
                        RambleError::Builtin {
                            experiment: experiment.namespace.clone(),
                            builtin: name.clone(),
                            message: e.to_string(),
                        }
                    })?;
                    for cmd in cmds {
                        command.push(expander.expand_var(&cmd, Some(&exec_vars), true)?);
                    }
                } else {
                    let base = self.find_executable(experiment, name)?;

                    let mut pre: Vec<CommandExecutable> = Vec::new();
                    let mut post: Vec<CommandExecutable> = Vec::new();
                    for modifier in &self.modifiers {
                        if modifier.applies_to_executable(name) {
                            let (p, q) = modifier.apply_executable_modifiers(name, &base, &ctx);
                            pre.extend(p);
                            post.extend(q);
                        }
                    }

                    let mut configs = pre;
                    configs.push(base);
                    configs.extend(post);

                    for config in configs {
                        let mpi_prefix = if config.mpi {
                            format!(
                                " {} ",
                                expander.expand_var("{mpi_command}", Some(&exec_vars), true)?
                            )
                        } else {
                            String::new()
                        };

                        let redirect = match &config.redirect {
                            Some(target) => {
                                let log =
                                    expander.expand_var(target, Some(&exec_vars), true)?;
                                format!(" {} \"{}\"", config.output_capture.operator(), log)
                            }
                            None => String::new(),
                        };

                        for part in &config.template {
                            let line = format!("{}{}{}", mpi_prefix, part, redirect);
                            command.push(expander.expand_var(&line, Some(&exec_vars), true)?);
                        }
                    }
                }
            }

            // Chained experiments scheduled after the root.
            for chained in &experiment.chain_append {
                if let Some(cmd) = experiment.chain_commands.get(chained) {
                    command.push(cmd.clone());
                }
            }

            command
        };

        experiment.set_variable(keywords::COMMAND, Value::from(command.join("\n")));
        Ok(())
    }

    /// Create the run directory, render every workspace template into it,
    /// and append the batch submission to the experiments script.
    fn make_experiments(&self, experiment: &mut Experiment, workspace: &mut Workspace) -> Result<()> {
        workspace.require_transaction("make_experiments")?;

        let expander = experiment.expander();
        let run_dir = expander.experiment_run_dir()?;
        std::fs::create_dir_all(&run_dir)?;

        for (template_name, template) in workspace.all_templates() {
            let rendered = expander.expand_var(&template.contents, None, true)?;
            let path = std::path::Path::new(&run_dir).join(template_name);
            std::fs::write(&path, rendered)?;
            set_executable_permissions(&path)?;
        }

        let batch_submit = expander.expand_var_name(keywords::BATCH_SUBMIT, None, true)?;
        workspace.append_experiment_script(&batch_submit)?;

        Ok(())
    }

    /// Build the inventory document, write it into the run directory, and
    /// record the experiment's content hash.
    fn write_inventory(&self, experiment: &mut Experiment, workspace: &mut Workspace) -> Result<()> {
        workspace.require_transaction("write_inventory")?;

        let mut inventory = Inventory::default();

        inventory.add_attribute(
            "variables",
            &clean_hash_variables(&experiment.variables, workspace.root_str()),
        );
        inventory.add_attribute("modifiers", &serde_json::to_value(&experiment.modifiers)?);
        inventory.add_attribute(
            "chained_experiments",
            &serde_json::to_value(&experiment.chained_experiments)?,
        );
        inventory.add_attribute("internals", &serde_json::to_value(&experiment.internals)?);
        inventory.add_attribute("env_vars", &serde_json::to_value(&experiment.env_var_sets)?);

        for (name, template) in workspace.all_templates() {
            inventory.templates.push(DigestEntry {
                name: name.clone(),
                digest: template.digest.clone(),
            });
        }

        let workload = self.workload_name(experiment)?;
        let expander = experiment.expander();
        for input_name in &self.definition.workloads[&workload].inputs {
            if let Some(input) = self.definition.inputs.get(input_name) {
                let digest = match &input.digest {
                    Some(digest) => digest.clone(),
                    None => hash_string(&expander.expand_var(&input.url, None, true)?),
                };
                inventory.inputs.push(DigestEntry {
                    name: input_name.clone(),
                    digest,
                });
            }
        }

        let run_dir = expander.experiment_run_dir()?;
        drop(expander);

        std::fs::create_dir_all(&run_dir)?;
        let path = std::path::Path::new(&run_dir).join(INVENTORY_FILE_NAME);
        let serialized = write_json_atomic(&path, &inventory)?;
        experiment.experiment_hash = Some(hash_string(&serialized));

        Ok(())
    }

    /// Analyze the experiment's logs and append the result document to the
    /// workspace.
    pub fn analyze_experiments(
        &self,
        experiment: &Experiment,
        workspace: &mut Workspace,
    ) -> Result<()> {
        if experiment.is_template {
            log::debug!("{} is a template. Skipping analysis", experiment.namespace);
            return Ok(());
        }
        let analyzer = crate::analysis::Analyzer::new(&self.definition, &self.modifiers);
        let result = analyzer.analyze(experiment, workspace)?;
        workspace.append_result(result);
        Ok(())
    }

    /// Copy rendered templates, figure-of-merit logs, and archive-pattern
    /// matches into the workspace archive directory.
    pub fn archive_experiments(
        &self,
        experiment: &Experiment,
        workspace: &mut Workspace,
    ) -> Result<()> {
        let archive_root = workspace.archive_path()?;

        let expander = experiment.expander();
        let run_dir = expander.experiment_run_dir()?;
        let archive_dir = archive_root.join(
            run_dir
                .strip_prefix(&format!("{}/", workspace.root_str()))
                .unwrap_or(&run_dir),
        );
        std::fs::create_dir_all(&archive_dir)?;

        for (template_name, _) in workspace.all_templates() {
            let source = std::path::Path::new(&run_dir).join(template_name);
            if source.exists() {
                std::fs::copy(&source, archive_dir.join(template_name))?;
            }
        }

        let mut log_files: Vec<String> = Vec::new();
        for fom in self.definition.figures_of_merit.values() {
            let path = expander.expand_var(&fom.log_file, None, true)?;
            if !log_files.contains(&path) {
                log_files.push(path);
            }
        }
        for path in &log_files {
            let source = std::path::Path::new(path);
            if source.exists() {
                if let Some(file_name) = source.file_name() {
                    std::fs::copy(source, archive_dir.join(file_name))?;
                }
            }
        }

        let mut patterns = self.definition.archive_patterns.clone();
        for modifier in &self.modifiers {
            patterns.extend(modifier.definition.archive_patterns.clone());
        }
        for pattern in patterns {
            let expanded = expander.expand_var(&pattern, None, true)?;
            if let Ok(matches) = glob::glob(&expanded) {
                for path in matches.flatten() {
                    if let Some(file_name) = path.file_name() {
                        std::fs::copy(&path, archive_dir.join(file_name))?;
                    }
                }
            }
        }

        Ok(())
    }
}

/// The `env_vars` builtin: license-scope modifications first, then the
/// experiment's env-var sets, then modifier contributions.
pub fn env_vars_builtin(ctx: &BuiltinContext) -> Result<Vec<String>> {
    let shell = ctx.workspace.shell();
    let mut commands = Vec::new();

    commands.extend(env_var_commands(
        ctx.workspace.licenses_for(&ctx.definition.name),
        shell,
    ));
    commands.extend(env_var_commands(&ctx.experiment.env_var_sets, shell));
    for modifier in ctx.modifiers {
        commands.extend(env_var_commands(modifier.env_var_modifications(), shell));
    }

    Ok(commands)
}

#[cfg(unix)]
fn set_executable_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(0o775);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable_permissions(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::application::types::{OutputCapture, WorkloadDefinition};
    use crate::experiment::{ContextDecl, Exclusions, ExperimentSet};
    use crate::value::variable_map;

    fn test_definition() -> ApplicationDefinition {
        let mut def = ApplicationDefinition::new("basic");
        def.add_executable(
            CommandExecutable::new("baseline", vec!["echo \"running {n_ranks} ranks\"".to_string()])
                .with_mpi(true),
        );
        def.add_workload(
            "test_wl",
            WorkloadDefinition {
                executables: vec!["baseline".to_string()],
                inputs: Vec::new(),
            },
        );
        def
    }

    fn test_experiment(workspace: &Workspace) -> Experiment {
        let mut set = ExperimentSet::with_root(
            workspace.name(),
            workspace.root_str(),
            VariableMap::new(),
            &workspace.template_names(),
        )
        .unwrap();
        set.set_application_context(ContextDecl::new("basic").with_variables(variable_map([
            ("n_ranks", Value::from("{processes_per_node}*{n_nodes}")),
            ("mpi_command", Value::from("mpirun -n {n_ranks}")),
            ("batch_submit", Value::from("sh {execute_experiment}")),
        ])))
        .unwrap();
        set.set_workload_context(ContextDecl::new("test_wl").with_variables(variable_map([
            ("processes_per_node", Value::from("2")),
        ])))
        .unwrap();
        set.set_experiment_context(
            ContextDecl::new("series1_{n_ranks}")
                .with_variables(variable_map([("n_nodes", Value::from("2"))])),
            IndexMap::new(),
            Vec::new(),
            Exclusions::default(),
        )
        .unwrap();
        set.build_experiment_chains().unwrap();
        set.experiments.shift_remove("basic.test_wl.series1_4").unwrap()
    }

    fn test_workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::new("test", dir.path().join("ws"));
        workspace.add_template("execute_experiment", "#!/bin/sh\n{command}\n");
        (dir, workspace)
    }

    #[test]
    fn test_inject_commands() {
        let (_dir, workspace) = test_workspace();
        let mut experiment = test_experiment(&workspace);
        let registry = {
            let mut r = ObjectRegistry::new();
            r.register_application(test_definition());
            r
        };
        let composer = Composer::new(&registry, &experiment).unwrap();
        composer.inject_commands(&mut experiment, &workspace).unwrap();

        let command = experiment.get_variable("command").unwrap().render();
        let lines: Vec<&str> = command.lines().collect();
        assert_eq!(lines[0], "rm -f \"{log_file}\"");
        assert_eq!(lines[1], "touch \"{log_file}\"");
        // The MPI prefix and redirect wrap the template line.
        let run_line = lines
            .iter()
            .find(|l| l.contains("echo"))
            .expect("missing run line");
        assert!(run_line.contains("mpirun -n 4"));
        assert!(run_line.contains("running 4 ranks"));
        // The redirect target expands at injection time; the purge lines
        // keep the raw template.
        assert!(run_line.contains(">> \""));
        assert!(run_line.ends_with("series1_4.out\""));
    }

    #[test]
    fn test_env_vars_builtin_prepended() {
        use crate::application::env_mods::EnvVarSet;

        let (_dir, workspace) = test_workspace();
        let mut experiment = test_experiment(&workspace);
        let mut vars = IndexMap::new();
        vars.insert("OMP_NUM_THREADS".to_string(), "4".to_string());
        experiment.env_var_sets.push(EnvVarSet::default().set(vars));

        let registry = {
            let mut r = ObjectRegistry::new();
            r.register_application(test_definition());
            r
        };
        let composer = Composer::new(&registry, &experiment).unwrap();
        composer.inject_commands(&mut experiment, &workspace).unwrap();

        let command = experiment.get_variable("command").unwrap().render();
        let lines: Vec<&str> = command.lines().collect();
        // Log purge first, then the required env_vars builtin, then the
        // executable.
        let env_idx = lines
            .iter()
            .position(|l| *l == "export OMP_NUM_THREADS=4")
            .expect("missing env command");
        let run_idx = lines.iter().position(|l| l.contains("echo")).unwrap();
        assert!(env_idx < run_idx);
    }

    #[test]
    fn test_internals_override_executables() {
        let (_dir, workspace) = test_workspace();
        let mut experiment = test_experiment(&workspace);
        experiment.internals.custom_executables.insert(
            "prepare".to_string(),
            CommandExecutable::new("prepare", vec!["mkdir -p scratch".to_string()])
                .with_redirect(None),
        );
        experiment.internals.executables =
            Some(vec!["prepare".to_string(), "baseline".to_string()]);

        let registry = {
            let mut r = ObjectRegistry::new();
            r.register_application(test_definition());
            r
        };
        let composer = Composer::new(&registry, &experiment).unwrap();
        composer.inject_commands(&mut experiment, &workspace).unwrap();

        let command = experiment.get_variable("command").unwrap().render();
        // Explicit ordering bypasses builtin injection.
        assert!(!command.contains("export"));
        let prepare_idx = command.find("mkdir -p scratch").unwrap();
        let run_idx = command.find("echo").unwrap();
        assert!(prepare_idx < run_idx);
    }

    #[test]
    fn test_output_capture_modes() {
        let mut def = test_definition();
        def.add_executable(
            CommandExecutable::new("errors", vec!["grep ERROR out.log".to_string()])
                .with_redirect(Some("{experiment_run_dir}/errors.log".to_string()))
                .with_output_capture(OutputCapture::Stderr),
        );
        def.workloads
            .get_mut("test_wl")
            .unwrap()
            .executables
            .push("errors".to_string());

        let (_dir, workspace) = test_workspace();
        let mut experiment = test_experiment(&workspace);
        let registry = {
            let mut r = ObjectRegistry::new();
            r.register_application(def);
            r
        };
        let composer = Composer::new(&registry, &experiment).unwrap();
        composer.inject_commands(&mut experiment, &workspace).unwrap();

        let command = experiment.get_variable("command").unwrap().render();
        let error_line = command
            .lines()
            .find(|l| l.contains("grep ERROR"))
            .unwrap();
        assert!(error_line.contains("2> \""));
        assert!(error_line.contains("/errors.log\""));
        // Both redirect targets are purged.
        assert!(command.contains("rm -f \"{log_file}\""));
        assert!(command.contains("rm -f \"{experiment_run_dir}/errors.log\""));
    }

    #[test]
    fn test_make_experiments_and_inventory() {
        let (_dir, mut workspace) = test_workspace();
        let mut experiment = test_experiment(&workspace);
        let registry = {
            let mut r = ObjectRegistry::new();
            r.register_application(test_definition());
            r
        };
        let composer = Composer::new(&registry, &experiment).unwrap();

        workspace.begin_write_transaction().unwrap();
        composer.run_setup(&mut experiment, &mut workspace).unwrap();
        workspace.commit_write_transaction();

        let run_dir = experiment.expander().experiment_run_dir().unwrap();
        let script = std::fs::read_to_string(
            std::path::Path::new(&run_dir).join("execute_experiment"),
        )
        .unwrap();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("mpirun -n 4"));
        // The rendered template no longer contains placeholders for bound
        // variables.
        assert!(!script.contains("{command}"));

        let inventory_path = std::path::Path::new(&run_dir).join(INVENTORY_FILE_NAME);
        assert!(inventory_path.exists());
        assert!(experiment.experiment_hash.is_some());

        let all_experiments =
            std::fs::read_to_string(workspace.experiments_script_path()).unwrap();
        assert!(all_experiments.contains("sh "));
        assert!(all_experiments.contains("/execute_experiment"));
    }

    #[test]
    fn test_unknown_workload_errors() {
        let (_dir, mut workspace) = test_workspace();
        let mut experiment = test_experiment(&workspace);
        experiment.workload = "missing_wl".to_string();
        let registry = {
            let mut r = ObjectRegistry::new();
            r.register_application(test_definition());
            r
        };
        let composer = Composer::new(&registry, &experiment).unwrap();
        workspace.begin_write_transaction().unwrap();
        let err = composer.run_setup(&mut experiment, &mut workspace).unwrap_err();
        assert!(matches!(err, RambleError::UnknownWorkload { .. }));
    }

    #[test]
    fn test_template_experiments_skip_phases() {
        let (_dir, mut workspace) = test_workspace();
        let mut experiment = test_experiment(&workspace);
        experiment.is_template = true;
        let registry = {
            let mut r = ObjectRegistry::new();
            r.register_application(test_definition());
            r
        };
        let composer = Composer::new(&registry, &experiment).unwrap();
        // No transaction needed: nothing should be written.
        composer.run_setup(&mut experiment, &mut workspace).unwrap();
        assert!(experiment.get_variable("command").is_none());
    }
}
