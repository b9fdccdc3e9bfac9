//! Application and modifier descriptors, the builtin registry, and the
//! per-experiment command composer.

pub mod composer;
pub mod env_mods;
pub mod modifier;
pub mod registry;
pub mod types;

pub use composer::{Composer, SetupPhase, SETUP_PHASES};
pub use env_mods::{env_var_commands, EnvAction, EnvModGroup, EnvVarSet, ShellKind};
pub use modifier::{ModifierDefinition, ModifierInstance, VariableModification};
pub use registry::ObjectRegistry;
pub use types::{
    ApplicationDefinition, BuiltinContext, BuiltinDefinition, BuiltinGenerator,
    CommandExecutable, FomContextDefinition, FomDefinition, InjectionMethod, InputDefinition,
    OutputCapture, SuccessCriterionDefinition, WorkloadDefinition, WorkloadVariable,
};
