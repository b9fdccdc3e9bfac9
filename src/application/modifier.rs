//! Modifier Descriptors
//!
//! A modifier injects variable, environment, and command modifications into
//! experiments. Each modifier declares usage modes; the active mode selects
//! which modifications apply. Executable matching uses glob patterns plus
//! the modifier's own builtin namespace.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex_lite::Regex;

use crate::application::env_mods::EnvVarSet;
use crate::application::types::{
    BuiltinContext, CommandExecutable, FomContextDefinition, FomDefinition, InjectionMethod,
    ModifierBuiltinGenerator, SuccessCriterionDefinition, MODIFIER_BUILTIN_PREFIX,
};
use crate::error::{RambleError, Result};
use crate::experiment::Experiment;
use crate::value::Value;

lazy_static! {
    static ref MODIFIER_BUILTIN_RE: Regex =
        Regex::new(r"^modifier_builtin::(?P<modifier>[\w-]+)::(?P<func>.*)$").unwrap();
}

/// Split a `modifier_builtin::<modifier>::<func>` name into its parts.
pub fn parse_modifier_builtin(executable: &str) -> Option<(String, String)> {
    MODIFIER_BUILTIN_RE.captures(executable).map(|caps| {
        (
            caps.name("modifier").map(|m| m.as_str().to_string()).unwrap_or_default(),
            caps.name("func").map(|m| m.as_str().to_string()).unwrap_or_default(),
        )
    })
}

/// How one variable is modified by a mode.
#[derive(Debug, Clone)]
pub enum VariableModification {
    Set(Value),
    Append(String),
    Prepend(String),
}

/// Pre/post commands contributed around a matched executable.
pub type ExecutableModifierFn = Arc<
    dyn Fn(&str, &CommandExecutable, &BuiltinContext)
            -> (Vec<CommandExecutable>, Vec<CommandExecutable>)
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct ModifierBuiltinDefinition {
    pub required: bool,
    pub injection_method: InjectionMethod,
    pub generator: ModifierBuiltinGenerator,
}

impl fmt::Debug for ModifierBuiltinDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierBuiltinDefinition")
            .field("required", &self.required)
            .field("injection_method", &self.injection_method)
            .finish()
    }
}

/// The full declaration of a modifier plugin.
#[derive(Clone, Default)]
pub struct ModifierDefinition {
    pub name: String,
    /// Declared usage modes; mode names key the modification maps.
    pub modes: Vec<String>,
    pub variable_modifications: IndexMap<String, IndexMap<String, VariableModification>>,
    pub env_var_modifications: IndexMap<String, Vec<EnvVarSet>>,
    pub executable_modifiers: Vec<ExecutableModifierFn>,
    /// Builtins keyed by their full `modifier_builtin::<name>::<func>` name.
    pub builtins: IndexMap<String, ModifierBuiltinDefinition>,
    pub archive_patterns: Vec<String>,
    pub figures_of_merit: IndexMap<String, FomDefinition>,
    pub figure_of_merit_contexts: IndexMap<String, FomContextDefinition>,
    pub success_criteria: Vec<SuccessCriterionDefinition>,
    pub required_packages: Vec<String>,
}

impl fmt::Debug for ModifierDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierDefinition")
            .field("name", &self.name)
            .field("modes", &self.modes)
            .field("builtins", &self.builtins.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModifierDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_mode(&mut self, name: impl Into<String>) {
        self.modes.push(name.into());
    }

    pub fn add_variable_modification(
        &mut self,
        mode: impl Into<String>,
        variable: impl Into<String>,
        modification: VariableModification,
    ) {
        self.variable_modifications
            .entry(mode.into())
            .or_default()
            .insert(variable.into(), modification);
    }

    pub fn add_env_var_modifications(&mut self, mode: impl Into<String>, set: EnvVarSet) {
        self.env_var_modifications.entry(mode.into()).or_default().push(set);
    }

    /// Register a builtin under `modifier_builtin::<modifier>::<func>`.
    pub fn register_builtin(
        &mut self,
        func: &str,
        required: bool,
        injection_method: InjectionMethod,
        generator: ModifierBuiltinGenerator,
    ) {
        self.builtins.insert(
            format!("{}{}::{}", MODIFIER_BUILTIN_PREFIX, self.name, func),
            ModifierBuiltinDefinition {
                required,
                injection_method,
                generator,
            },
        );
    }
}

/// A modifier bound to one experiment: the definition plus the active mode
/// and the executable patterns it applies to.
#[derive(Debug, Clone)]
pub struct ModifierInstance {
    pub definition: Arc<ModifierDefinition>,
    pub usage_mode: String,
    pub on_executables: Vec<String>,
}

impl ModifierInstance {
    /// Bind a definition with an optional explicit mode. Without one, a
    /// modifier declaring exactly one mode uses it; anything else fails.
    pub fn new(
        definition: Arc<ModifierDefinition>,
        mode: Option<String>,
        on_executables: Option<Vec<String>>,
    ) -> Result<Self> {
        let usage_mode = match mode {
            Some(m) if !m.is_empty() => m,
            _ => {
                if definition.modes.len() == 1 {
                    let mode = definition.modes[0].clone();
                    log::debug!(
                        "Using default usage mode {} on modifier {}",
                        mode,
                        definition.name
                    );
                    mode
                } else {
                    return Err(RambleError::InvalidModifierMode {
                        modifier: definition.name.clone(),
                    });
                }
            }
        };

        let on_executables = match on_executables {
            Some(patterns) if !patterns.is_empty() => patterns,
            _ => vec!["*".to_string()],
        };

        Ok(Self {
            definition,
            usage_mode,
            on_executables,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Whether this modifier applies to the named executable: any glob
    /// pattern matches, or the executable is one of this modifier's own
    /// builtins.
    pub fn applies_to_executable(&self, executable: &str) -> bool {
        for pattern in &self.on_executables {
            if let Ok(matcher) = glob::Pattern::new(pattern) {
                if matcher.matches(executable) {
                    return true;
                }
            }
        }

        if let Some((modifier, _)) = parse_modifier_builtin(executable) {
            return modifier == self.definition.name;
        }

        false
    }

    /// The variable overrides this modifier contributes, given the
    /// experiment's current bindings.
    pub fn modded_variables(&self, experiment: &Experiment) -> IndexMap<String, Value> {
        let mut mods = IndexMap::new();

        let var_mods = match self.definition.variable_modifications.get(&self.usage_mode) {
            Some(mods) => mods,
            None => return mods,
        };

        for (var, modification) in var_mods {
            match modification {
                VariableModification::Set(value) => {
                    mods.insert(var.clone(), value.clone());
                }
                VariableModification::Append(suffix) => {
                    let prev = experiment
                        .get_variable(var)
                        .map(|v| v.render())
                        .unwrap_or_default();
                    mods.insert(var.clone(), Value::from(format!("{} {}", prev, suffix)));
                }
                VariableModification::Prepend(prefix) => {
                    let prev = experiment
                        .get_variable(var)
                        .map(|v| v.render())
                        .unwrap_or_default();
                    mods.insert(var.clone(), Value::from(format!("{} {}", prefix, prev)));
                }
            }
        }

        mods
    }

    /// The env-var modification sets for the active mode.
    pub fn env_var_modifications(&self) -> &[EnvVarSet] {
        self.definition
            .env_var_modifications
            .get(&self.usage_mode)
            .map(|sets| sets.as_slice())
            .unwrap_or(&[])
    }

    /// Collect pre/post commands from every executable modifier.
    pub fn apply_executable_modifiers(
        &self,
        executable_name: &str,
        executable: &CommandExecutable,
        ctx: &BuiltinContext,
    ) -> (Vec<CommandExecutable>, Vec<CommandExecutable>) {
        let mut pre = Vec::new();
        let mut post = Vec::new();
        for exec_mod in &self.definition.executable_modifiers {
            let (p, q) = exec_mod(executable_name, executable, ctx);
            pre.extend(p);
            post.extend(q);
        }
        (pre, post)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::variable_map;

    fn test_definition() -> ModifierDefinition {
        let mut def = ModifierDefinition::new("test_mod");
        def.add_mode("standard");
        def.add_variable_modification(
            "standard",
            "mpi_command",
            VariableModification::Append("--bind-to core".to_string()),
        );
        def.add_variable_modification(
            "standard",
            "extra_flag",
            VariableModification::Set(Value::from("-x")),
        );
        def
    }

    #[test]
    fn test_parse_modifier_builtin() {
        let (modifier, func) =
            parse_modifier_builtin("modifier_builtin::test_mod::setup").unwrap();
        assert_eq!(modifier, "test_mod");
        assert_eq!(func, "setup");
        assert!(parse_modifier_builtin("builtin::env_vars").is_none());
    }

    #[test]
    fn test_default_mode_selection() {
        let def = Arc::new(test_definition());
        let inst = ModifierInstance::new(def.clone(), None, None).unwrap();
        assert_eq!(inst.usage_mode, "standard");

        let mut multi = test_definition();
        multi.add_mode("other");
        let err = ModifierInstance::new(Arc::new(multi), None, None).unwrap_err();
        assert!(matches!(err, RambleError::InvalidModifierMode { .. }));
    }

    #[test]
    fn test_applies_to_executable() {
        let def = Arc::new(test_definition());
        let inst = ModifierInstance::new(def.clone(), None, None).unwrap();
        // Default pattern matches everything.
        assert!(inst.applies_to_executable("run"));

        let scoped = ModifierInstance::new(
            def,
            None,
            Some(vec!["builtin::*".to_string()]),
        )
        .unwrap();
        assert!(scoped.applies_to_executable("builtin::env_vars"));
        assert!(!scoped.applies_to_executable("run"));
        // A modifier always applies to its own builtins.
        assert!(scoped.applies_to_executable("modifier_builtin::test_mod::setup"));
        assert!(!scoped.applies_to_executable("modifier_builtin::other_mod::setup"));
    }

    #[test]
    fn test_modded_variables() {
        let def = Arc::new(test_definition());
        let inst = ModifierInstance::new(def, None, None).unwrap();
        let experiment = Experiment::new(
            "basic.test_wl.test1".to_string(),
            "basic".to_string(),
            "test_wl".to_string(),
            variable_map([("mpi_command", "mpirun -n 4")]),
        );
        let mods = inst.modded_variables(&experiment);
        assert_eq!(
            mods.get("mpi_command").unwrap().render(),
            "mpirun -n 4 --bind-to core"
        );
        assert_eq!(mods.get("extra_flag").unwrap().render(), "-x");
    }
}
