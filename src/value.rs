//! Variable Values
//!
//! A variable binds to a scalar, a template string (containing `{name}`
//! placeholders), or an ordered sequence of values. Scopes layer these
//! bindings; expansion renders them to strings.

use std::fmt;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

/// A literal scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Str(s) => write!(f, "{}", s),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", format_float(*x)),
            Scalar::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
        }
    }
}

/// Format a float the way rendered experiment names expect: whole values
/// keep a trailing `.0`.
pub fn format_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

/// A variable value: scalar, template string, or sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Template(String),
    Sequence(Vec<Value>),
}

impl Value {
    /// Classify a string as a template (contains placeholders) or a plain
    /// string scalar.
    pub fn from_string(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.contains('{') || s.contains('}') {
            Value::Template(s)
        } else {
            Value::Scalar(Scalar::Str(s))
        }
    }

    pub fn int(i: i64) -> Self {
        Value::Scalar(Scalar::Int(i))
    }

    pub fn float(x: f64) -> Self {
        Value::Scalar(Scalar::Float(x))
    }

    pub fn bool(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }

    pub fn sequence<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Sequence(items.into_iter().map(Into::into).collect())
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::Sequence(_))
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Render the value as the string form fed to the expander. Sequences
    /// render like a list literal; scalars and templates render verbatim.
    pub fn render(&self) -> String {
        match self {
            Value::Scalar(s) => s.to_string(),
            Value::Template(t) => t.clone(),
            Value::Sequence(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.render()).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }

    /// Convert into a JSON value for inventory hashing and result output.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Scalar(Scalar::Str(s)) => serde_json::Value::String(s.clone()),
            Value::Scalar(Scalar::Int(i)) => serde_json::Value::from(*i),
            Value::Scalar(Scalar::Float(x)) => serde_json::Value::from(*x),
            Value::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(*b),
            Value::Template(t) => serde_json::Value::String(t.clone()),
            Value::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::from_string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::from_string(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::int(i)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// An ordered map of variable bindings. Insertion order is preserved so
/// rendering and inventory output are deterministic.
pub type VariableMap = IndexMap<String, Value>;

/// Build a `VariableMap` from (name, value) pairs.
pub fn variable_map<I, K, V>(pairs: I) -> VariableMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
