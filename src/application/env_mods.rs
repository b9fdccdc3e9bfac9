//! Environment Variable Modifications
//!
//! Declared per scope as ordered actions (set, unset, append, prepend) and
//! emitted as shell commands for the workspace's configured shell.

use indexmap::IndexMap;
use serde::Serialize;

/// Shells the engine can emit environment commands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShellKind {
    #[default]
    Sh,
    Csh,
    Fish,
    Bat,
}

impl ShellKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sh" | "bash" => Some(ShellKind::Sh),
            "csh" => Some(ShellKind::Csh),
            "fish" => Some(ShellKind::Fish),
            "bat" => Some(ShellKind::Bat),
            _ => None,
        }
    }

    fn set_command(&self, var: &str, value: &str) -> String {
        match self {
            ShellKind::Sh => format!("export {}={}", var, value),
            ShellKind::Csh => format!("setenv {} {}", var, value),
            ShellKind::Fish => format!("set -gx {} {}", var, value),
            ShellKind::Bat => format!("set \"{}={}\"", var, value),
        }
    }

    fn unset_command(&self, var: &str) -> String {
        match self {
            ShellKind::Sh => format!("unset {}", var),
            ShellKind::Csh => format!("unsetenv {}", var),
            ShellKind::Fish => format!("set -e {}", var),
            ShellKind::Bat => format!("set \"{}=\"", var),
        }
    }

    fn self_reference(&self, var: &str) -> String {
        match self {
            ShellKind::Sh | ShellKind::Csh | ShellKind::Fish => format!("${{{}}}", var),
            ShellKind::Bat => format!("%{}%", var),
        }
    }
}

/// A group of variables modified together by an append or prepend action.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnvModGroup {
    /// Separator for `vars` entries; defaults to a space.
    pub var_separator: Option<String>,
    pub vars: IndexMap<String, String>,
    pub paths: IndexMap<String, String>,
}

/// One environment-modification action.
#[derive(Debug, Clone, Serialize)]
pub enum EnvAction {
    Set(IndexMap<String, String>),
    Unset(Vec<String>),
    Append(Vec<EnvModGroup>),
    Prepend(Vec<EnvModGroup>),
}

/// An ordered list of actions contributed by one scope.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnvVarSet {
    pub actions: Vec<EnvAction>,
}

impl EnvVarSet {
    pub fn set(mut self, vars: IndexMap<String, String>) -> Self {
        self.actions.push(EnvAction::Set(vars));
        self
    }

    pub fn unset(mut self, vars: Vec<String>) -> Self {
        self.actions.push(EnvAction::Unset(vars));
        self
    }

    pub fn append(mut self, groups: Vec<EnvModGroup>) -> Self {
        self.actions.push(EnvAction::Append(groups));
        self
    }

    pub fn prepend(mut self, groups: Vec<EnvModGroup>) -> Self {
        self.actions.push(EnvAction::Prepend(groups));
        self
    }
}

/// Emit the shell commands for a list of env-var sets, in declaration
/// order.
pub fn env_var_commands(sets: &[EnvVarSet], shell: ShellKind) -> Vec<String> {
    let mut commands = Vec::new();
    for set in sets {
        for action in &set.actions {
            emit_action(action, shell, &mut commands);
        }
    }
    commands
}

fn emit_action(action: &EnvAction, shell: ShellKind, commands: &mut Vec<String>) {
    match action {
        EnvAction::Set(vars) => {
            for (var, value) in vars {
                commands.push(shell.set_command(var, value));
            }
        }
        EnvAction::Unset(vars) => {
            for var in vars {
                commands.push(shell.unset_command(var));
            }
        }
        EnvAction::Append(groups) => {
            for group in groups {
                let sep = group.var_separator.as_deref().unwrap_or(" ");
                for (var, value) in &group.vars {
                    let current = shell.self_reference(var);
                    commands.push(shell.set_command(
                        var,
                        &format!("\"{}{}{}\"", current, sep, value),
                    ));
                }
                for (var, value) in &group.paths {
                    let current = shell.self_reference(var);
                    commands.push(shell.set_command(var, &format!("\"{}:{}\"", current, value)));
                }
            }
        }
        EnvAction::Prepend(groups) => {
            for group in groups {
                let sep = group.var_separator.as_deref().unwrap_or(" ");
                for (var, value) in &group.vars {
                    let current = shell.self_reference(var);
                    commands.push(shell.set_command(
                        var,
                        &format!("\"{}{}{}\"", value, sep, current),
                    ));
                }
                for (var, value) in &group.paths {
                    let current = shell.self_reference(var);
                    commands.push(shell.set_command(var, &format!("\"{}:{}\"", value, current)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_var(var: &str, value: &str) -> IndexMap<String, String> {
        let mut m = IndexMap::new();
        m.insert(var.to_string(), value.to_string());
        m
    }

    #[test]
    fn test_set_and_unset_sh() {
        let set = EnvVarSet::default()
            .set(one_var("OMP_NUM_THREADS", "4"))
            .unset(vec!["DEBUG".to_string()]);
        let commands = env_var_commands(&[set], ShellKind::Sh);
        assert_eq!(commands, vec!["export OMP_NUM_THREADS=4", "unset DEBUG"]);
    }

    #[test]
    fn test_set_and_unset_other_shells() {
        let set = EnvVarSet::default().set(one_var("A", "1")).unset(vec!["B".to_string()]);
        assert_eq!(
            env_var_commands(&[set.clone()], ShellKind::Csh),
            vec!["setenv A 1", "unsetenv B"]
        );
        assert_eq!(
            env_var_commands(&[set.clone()], ShellKind::Fish),
            vec!["set -gx A 1", "set -e B"]
        );
        assert_eq!(
            env_var_commands(&[set], ShellKind::Bat),
            vec!["set \"A=1\"", "set \"B=\""]
        );
    }

    #[test]
    fn test_append_vars_and_paths() {
        let group = EnvModGroup {
            var_separator: Some(",".to_string()),
            vars: one_var("CFLAGS", "-O2"),
            paths: one_var("PATH", "/opt/bin"),
        };
        let set = EnvVarSet::default().append(vec![group]);
        let commands = env_var_commands(&[set], ShellKind::Sh);
        assert_eq!(
            commands,
            vec![
                "export CFLAGS=\"${CFLAGS},-O2\"",
                "export PATH=\"${PATH}:/opt/bin\"",
            ]
        );
    }

    #[test]
    fn test_prepend_paths() {
        let group = EnvModGroup {
            var_separator: None,
            vars: IndexMap::new(),
            paths: one_var("LD_LIBRARY_PATH", "/opt/lib"),
        };
        let set = EnvVarSet::default().prepend(vec![group]);
        let commands = env_var_commands(&[set], ShellKind::Sh);
        assert_eq!(
            commands,
            vec!["export LD_LIBRARY_PATH=\"/opt/lib:${LD_LIBRARY_PATH}\""]
        );
    }

    #[test]
    fn test_action_ordering_preserved() {
        let set = EnvVarSet::default()
            .unset(vec!["FIRST".to_string()])
            .set(one_var("SECOND", "2"));
        let commands = env_var_commands(&[set], ShellKind::Sh);
        assert_eq!(commands, vec!["unset FIRST", "export SECOND=2"]);
    }

    #[test]
    fn test_shell_parse() {
        assert_eq!(ShellKind::parse("sh"), Some(ShellKind::Sh));
        assert_eq!(ShellKind::parse("fish"), Some(ShellKind::Fish));
        assert_eq!(ShellKind::parse("zsh"), None);
    }
}
