//! Variable Expansion
//!
//! Recursive string-template rendering over a variable binding. `{name}`
//! placeholders are substituted depth-first; once a value is free of
//! placeholders it is offered to the expression evaluator, so templates can
//! defer arithmetic until all symbolic inputs have landed. Unresolved
//! placeholders either pass through verbatim or fail, depending on the
//! caller.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::{RambleError, Result};
use crate::expr::{eval_expression, CrossExperimentLookup, ExprValue};
use crate::keywords;
use crate::value::{Scalar, Value, VariableMap};

/// Recursion guard for self-referential variable definitions.
const MAX_EXPANSION_DEPTH: usize = 64;

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq)]
enum Fragment {
    Literal(String),
    Placeholder(String),
    /// A positional `{}` placeholder, preserved verbatim.
    Positional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FragmentError {
    /// Unbalanced braces or a placeholder that is not an identifier at
    /// all (e.g. a regex quantifier). The whole string passes through
    /// unchanged when passthrough is allowed.
    Lenient,
    /// A dotted placeholder name. Always fatal.
    InvalidName,
}

/// Split a template into literal and placeholder fragments. `{{` and `}}`
/// are brace escapes.
fn parse_fragments(input: &str) -> std::result::Result<Vec<Fragment>, FragmentError> {
    let chars: Vec<char> = input.chars().collect();
    let mut fragments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '{' => {
                let mut name = String::new();
                let mut j = i + 1;
                while j < chars.len() && chars[j] != '}' {
                    name.push(chars[j]);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(FragmentError::Lenient);
                }
                if !literal.is_empty() {
                    fragments.push(Fragment::Literal(std::mem::take(&mut literal)));
                }
                if name.is_empty() {
                    fragments.push(Fragment::Positional);
                } else if is_valid_placeholder(&name) {
                    fragments.push(Fragment::Placeholder(name));
                } else if name.contains('.') && is_valid_placeholder(name.split('.').next().unwrap_or(""))
                {
                    // Attribute access on a variable cannot be expanded.
                    return Err(FragmentError::InvalidName);
                } else {
                    return Err(FragmentError::Lenient);
                }
                i = j + 1;
            }
            '}' => return Err(FragmentError::Lenient),
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        fragments.push(Fragment::Literal(literal));
    }

    Ok(fragments)
}

fn is_valid_placeholder(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Test if a string contains no named placeholders. Positional `{}` does
/// not count; a malformed template is treated as having none.
fn fully_expanded(input: &str) -> bool {
    match parse_fragments(input) {
        Ok(fragments) => !fragments
            .iter()
            .any(|f| matches!(f, Fragment::Placeholder(_))),
        Err(_) => true,
    }
}

/// Expands templates against a variable binding, with an optional hook back
/// into the experiment set for cross-experiment references.
pub struct Expander<'a> {
    variables: &'a VariableMap,
    lookup: Option<&'a dyn CrossExperimentLookup>,
    cache: RefCell<HashMap<&'static str, String>>,
}

impl<'a> Expander<'a> {
    pub fn new(variables: &'a VariableMap) -> Self {
        Self {
            variables,
            lookup: None,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_lookup(variables: &'a VariableMap, lookup: &'a dyn CrossExperimentLookup) -> Self {
        Self {
            variables,
            lookup: Some(lookup),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Wrap a variable name in braces, producing its expansion string.
    pub fn expansion_str(name: &str) -> String {
        format!("{{{}}}", name)
    }

    /// Expand a variable by name.
    pub fn expand_var_name(
        &self,
        name: &str,
        extra_vars: Option<&VariableMap>,
        allow_passthrough: bool,
    ) -> Result<String> {
        self.expand_var(&Self::expansion_str(name), extra_vars, allow_passthrough)
    }

    /// Expand a template string. With `allow_passthrough`, unresolved
    /// placeholders are emitted verbatim; otherwise they fail.
    pub fn expand_var(
        &self,
        template: &str,
        extra_vars: Option<&VariableMap>,
        allow_passthrough: bool,
    ) -> Result<String> {
        let merged;
        let vars: &VariableMap = match extra_vars {
            Some(extra) => {
                let mut m = self.variables.clone();
                for (k, v) in extra {
                    m.insert(k.clone(), v.clone());
                }
                merged = m;
                &merged
            }
            None => self.variables,
        };

        let mut expanded = self.partial_expand(vars, template, allow_passthrough, 0)?;

        if fully_expanded(&expanded) {
            match eval_expression(&expanded, self.lookup) {
                Ok(value) => expanded = value.to_string(),
                Err(e) if e.is_eval_error() => {
                    log::debug!("Expression left unevaluated: {}", e);
                }
                Err(e) => return Err(e),
            }
        } else if !allow_passthrough {
            log::debug!("Passthrough expansion not allowed for \"{}\"", template);
            return Err(RambleError::PassthroughDisallowed {
                template: template.to_string(),
            });
        }

        Ok(expanded.trim_start().to_string())
    }

    fn partial_expand(
        &self,
        vars: &VariableMap,
        input: &str,
        allow_passthrough: bool,
        depth: usize,
    ) -> Result<String> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(RambleError::syntax(format!(
                "Expansion exceeded maximum depth on \"{}\"",
                input
            )));
        }

        let fragments = match parse_fragments(input) {
            Ok(f) => f,
            Err(FragmentError::Lenient) => {
                if allow_passthrough {
                    return Ok(input.to_string());
                }
                return Err(RambleError::syntax(format!(
                    "Error occurred while parsing an expansion string:\n{}",
                    input
                )));
            }
            Err(FragmentError::InvalidName) => {
                return Err(RambleError::syntax(format!(
                    "Expansion failed on:\n{}\nWhich contains an invalid variable name",
                    input
                )));
            }
        };

        let mut out = String::new();
        for fragment in fragments {
            match fragment {
                Fragment::Literal(text) => out.push_str(&text),
                Fragment::Positional => out.push_str("{}"),
                Fragment::Placeholder(name) => match vars.get(&name) {
                    Some(value) => {
                        let rendered = value.render();
                        let mut nested =
                            self.partial_expand(vars, &rendered, allow_passthrough, depth + 1)?;
                        if fully_expanded(&nested) {
                            match eval_expression(&nested, self.lookup) {
                                Ok(value) => nested = value.to_string(),
                                Err(e) if e.is_eval_error() => {
                                    log::debug!("Expression left unevaluated: {}", e);
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        out.push_str(&nested);
                    }
                    // Unbound placeholders stay verbatim; the caller decides
                    // whether that is an error.
                    None => {
                        out.push('{');
                        out.push_str(&name);
                        out.push('}');
                    }
                },
            }
        }

        Ok(out)
    }

    /// Expand a value into a sequence if possible. Values that already are
    /// sequences pass through; template strings that evaluate to a list
    /// (e.g. `range(...)`) become sequences; anything else is returned
    /// unchanged. Cross-experiment references are not available here, as
    /// list discovery runs before experiments are rendered.
    pub fn expand_lists(value: &Value) -> Value {
        if value.is_sequence() {
            return value.clone();
        }

        let rendered = value.render();
        match eval_expression(&rendered, None) {
            Ok(ExprValue::List(items)) => Value::Sequence(
                items
                    .into_iter()
                    .map(|item| match item {
                        ExprValue::Int(i) => Value::int(i),
                        ExprValue::Float(x) => Value::float(x),
                        ExprValue::Bool(b) => Value::bool(b),
                        ExprValue::Str(s) => Value::Scalar(Scalar::Str(s)),
                        ExprValue::List(_) => Value::from_string(item.to_string()),
                    })
                    .collect(),
            ),
            _ => value.clone(),
        }
    }

    fn cached(&self, key: &'static str, produce: impl FnOnce() -> Result<String>) -> Result<String> {
        if let Some(hit) = self.cache.borrow().get(key) {
            return Ok(hit.clone());
        }
        let value = produce()?;
        self.cache.borrow_mut().insert(key, value.clone());
        Ok(value)
    }

    pub fn application_name(&self) -> Result<String> {
        self.cached("application_name", || {
            self.expand_var_name(keywords::APPLICATION_NAME, None, true)
        })
    }

    pub fn workload_name(&self) -> Result<String> {
        self.cached("workload_name", || {
            self.expand_var_name(keywords::WORKLOAD_NAME, None, true)
        })
    }

    pub fn experiment_name(&self) -> Result<String> {
        self.cached("experiment_name", || {
            self.expand_var_name(keywords::EXPERIMENT_NAME, None, true)
        })
    }

    pub fn application_namespace(&self) -> Result<String> {
        self.cached("application_namespace", || self.application_name())
    }

    pub fn workload_namespace(&self) -> Result<String> {
        self.cached("workload_namespace", || {
            Ok(format!("{}.{}", self.application_name()?, self.workload_name()?))
        })
    }

    pub fn experiment_namespace(&self) -> Result<String> {
        self.cached("experiment_namespace", || {
            Ok(format!(
                "{}.{}.{}",
                self.application_name()?,
                self.workload_name()?,
                self.experiment_name()?
            ))
        })
    }

    /// The software environment namespace: `{env_name}.{workload_name}`.
    pub fn env_namespace(&self) -> Result<String> {
        self.cached("env_namespace", || {
            let template = format!(
                "{}.{}",
                Self::expansion_str(keywords::ENV_NAME),
                Self::expansion_str(keywords::WORKLOAD_NAME)
            );
            self.expand_var(&template, None, true)
        })
    }

    pub fn application_run_dir(&self) -> Result<String> {
        self.cached("application_run_dir", || {
            self.expand_var_name(keywords::APPLICATION_RUN_DIR, None, true)
        })
    }

    pub fn application_input_dir(&self) -> Result<String> {
        self.cached("application_input_dir", || {
            self.expand_var_name(keywords::APPLICATION_INPUT_DIR, None, true)
        })
    }

    pub fn workload_run_dir(&self) -> Result<String> {
        self.cached("workload_run_dir", || {
            self.expand_var_name(keywords::WORKLOAD_RUN_DIR, None, true)
        })
    }

    pub fn workload_input_dir(&self) -> Result<String> {
        self.cached("workload_input_dir", || {
            self.expand_var_name(keywords::WORKLOAD_INPUT_DIR, None, true)
        })
    }

    pub fn experiment_run_dir(&self) -> Result<String> {
        self.cached("experiment_run_dir", || {
            self.expand_var_name(keywords::EXPERIMENT_RUN_DIR, None, true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::variable_map;

    fn vars() -> VariableMap {
        variable_map([
            ("processes_per_node", Value::from("2")),
            ("n_nodes", Value::from("2")),
            ("n_ranks", Value::from("{processes_per_node}*{n_nodes}")),
            ("greeting", Value::from("hello")),
        ])
    }

    #[test]
    fn test_simple_substitution() {
        let vars = vars();
        let expander = Expander::new(&vars);
        assert_eq!(
            expander.expand_var("{greeting} world", None, true).unwrap(),
            "hello world"
        );
    }

    #[test]
    fn test_deferred_arithmetic() {
        let vars = vars();
        let expander = Expander::new(&vars);
        assert_eq!(expander.expand_var("{n_ranks}", None, true).unwrap(), "4");
        assert_eq!(
            expander
                .expand_var("series1_{n_ranks}", None, true)
                .unwrap(),
            "series1_4"
        );
    }

    #[test]
    fn test_idempotence_of_expanded_strings() {
        let vars = vars();
        let expander = Expander::new(&vars);
        for input in ["series1_4", "hello world", "4", "basic.test_wl.series1_4"] {
            assert_eq!(expander.expand_var(input, None, true).unwrap(), input);
        }
    }

    #[test]
    fn test_passthrough() {
        let vars = vars();
        let expander = Expander::new(&vars);
        assert_eq!(
            expander.expand_var("{undefined}_x", None, true).unwrap(),
            "{undefined}_x"
        );
        let err = expander.expand_var("{undefined}_x", None, false).unwrap_err();
        assert!(matches!(err, RambleError::PassthroughDisallowed { .. }));
    }

    #[test]
    fn test_extra_vars_take_precedence() {
        let vars = vars();
        let expander = Expander::new(&vars);
        let extra = variable_map([("greeting", Value::from("goodbye"))]);
        assert_eq!(
            expander.expand_var("{greeting}", Some(&extra), true).unwrap(),
            "goodbye"
        );
    }

    #[test]
    fn test_positional_and_escaped_braces() {
        let vars = vars();
        let expander = Expander::new(&vars);
        assert_eq!(expander.expand_var("a{}b", None, true).unwrap(), "a{}b");
        assert_eq!(expander.expand_var("a{{b}}c", None, true).unwrap(), "a{b}c");
    }

    #[test]
    fn test_unbalanced_braces() {
        let vars = vars();
        let expander = Expander::new(&vars);
        assert_eq!(expander.expand_var("a{b", None, true).unwrap(), "a{b");
        assert!(expander.expand_var("a{b", None, false).is_err());
    }

    #[test]
    fn test_invalid_placeholder_name() {
        let vars = vars();
        let expander = Expander::new(&vars);
        assert!(expander.expand_var("{bad.name}", None, true).is_err());
    }

    #[test]
    fn test_non_identifier_placeholders_pass_through() {
        let vars = vars();
        let expander = Expander::new(&vars);
        // Regex quantifiers and positional indices are not variable names;
        // the string survives untouched.
        assert_eq!(
            expander.expand_var(r"(?P<x>\d{2})", None, true).unwrap(),
            r"(?P<x>\d{2})"
        );
        assert_eq!(expander.expand_var("{2}", None, true).unwrap(), "{2}");
        assert!(expander.expand_var("{2}", None, false).is_err());
    }

    #[test]
    fn test_self_reference_is_bounded() {
        let vars = variable_map([("a", Value::from("{a}x"))]);
        let expander = Expander::new(&vars);
        assert!(expander.expand_var("{a}", None, true).is_err());
    }

    #[test]
    fn test_expand_lists() {
        let range = Value::from("range(0, 3)");
        match Expander::expand_lists(&range) {
            Value::Sequence(items) => {
                assert_eq!(items, vec![Value::int(0), Value::int(1), Value::int(2)]);
            }
            other => panic!("Expected sequence, got {:?}", other),
        }

        let scalar = Value::from("4");
        assert_eq!(Expander::expand_lists(&scalar), scalar);

        let seq = Value::sequence(["2", "4"]);
        assert_eq!(Expander::expand_lists(&seq), seq);
    }

    #[test]
    fn test_namespace_accessors() {
        let vars = variable_map([
            ("application_name", Value::from("basic")),
            ("workload_name", Value::from("test_wl")),
            ("experiment_name", Value::from("series1_4")),
            ("env_name", Value::from("{application_name}")),
        ]);
        let expander = Expander::new(&vars);
        assert_eq!(expander.application_namespace().unwrap(), "basic");
        assert_eq!(expander.workload_namespace().unwrap(), "basic.test_wl");
        assert_eq!(
            expander.experiment_namespace().unwrap(),
            "basic.test_wl.series1_4"
        );
        assert_eq!(expander.env_namespace().unwrap(), "basic.test_wl");
    }
}
