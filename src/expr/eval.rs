//! Expression Evaluation
//!
//! Evaluates the restricted expression AST over literal operands. Names
//! evaluate to their identifier text, which is what lets a bare word pass
//! through expansion unchanged. The evaluator is pure: it never mutates
//! any variable binding.

use crate::error::{RambleError, Result};

use super::parser::parse_expression;
use super::types::{BinaryOp, BoolOp, CompareOp, ExprNode, ExprValue, UnaryOp};

/// Resolves `ident in a.b.c` membership expressions against the set of
/// materialized experiments.
pub trait CrossExperimentLookup {
    /// Expand `template` within the named experiment. Returns `None` when
    /// the experiment does not exist.
    fn expand_in_experiment(&self, namespace: &str, template: &str) -> Option<String>;
}

/// Parse and evaluate an expression string.
pub fn eval_expression(input: &str, lookup: Option<&dyn CrossExperimentLookup>) -> Result<ExprValue> {
    let node = parse_expression(input)?;
    eval_node(&node, lookup)
}

pub fn eval_node(node: &ExprNode, lookup: Option<&dyn CrossExperimentLookup>) -> Result<ExprValue> {
    match node {
        ExprNode::Int(i) => Ok(ExprValue::Int(*i)),
        ExprNode::Float(x) => Ok(ExprValue::Float(*x)),
        ExprNode::Bool(b) => Ok(ExprValue::Bool(*b)),
        ExprNode::Str(s) => Ok(ExprValue::Str(s.clone())),
        ExprNode::Name(name) => Ok(ExprValue::Str(name.clone())),
        ExprNode::Attribute(parts) => Ok(ExprValue::Str(parts.join("."))),
        ExprNode::Unary { op, operand } => eval_unary(*op, operand, lookup),
        ExprNode::Binary { op, left, right } => eval_binary(*op, left, right, lookup),
        ExprNode::Compare { left, ops, comparators } => {
            eval_comparison(left, ops, comparators, lookup)
        }
        ExprNode::BoolChain { op, values } => eval_bool_chain(*op, values, lookup),
        ExprNode::In { ident, namespace } => eval_in(ident, namespace, lookup),
        ExprNode::Range { args } => eval_range(args, lookup),
    }
}

fn eval_unary(
    op: UnaryOp,
    operand: &ExprNode,
    lookup: Option<&dyn CrossExperimentLookup>,
) -> Result<ExprValue> {
    let value = eval_node(operand, lookup)?;
    match (op, value) {
        (UnaryOp::Neg, ExprValue::Int(i)) => Ok(ExprValue::Int(-i)),
        (UnaryOp::Neg, ExprValue::Float(x)) => Ok(ExprValue::Float(-x)),
        (UnaryOp::Neg, ExprValue::Bool(b)) => Ok(ExprValue::Int(-(b as i64))),
        _ => Err(RambleError::expr_syntax(
            "Unsupported operand type in unary operator",
        )),
    }
}

/// Coerce a value to an integer operand, treating booleans as 0/1.
fn as_int(value: &ExprValue) -> Option<i64> {
    match value {
        ExprValue::Int(i) => Some(*i),
        ExprValue::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn as_float(value: &ExprValue) -> Option<f64> {
    match value {
        ExprValue::Int(i) => Some(*i as f64),
        ExprValue::Float(x) => Some(*x),
        ExprValue::Bool(b) => Some(*b as i64 as f64),
        _ => None,
    }
}

fn eval_binary(
    op: BinaryOp,
    left: &ExprNode,
    right: &ExprNode,
    lookup: Option<&dyn CrossExperimentLookup>,
) -> Result<ExprValue> {
    let l = eval_node(left, lookup)?;
    let r = eval_node(right, lookup)?;

    let type_error = || RambleError::expr_syntax("Unsupported operand type in binary operator");

    // Integer arithmetic stays integral, except true division.
    if let (Some(li), Some(ri)) = (as_int(&l), as_int(&r)) {
        return match op {
            BinaryOp::Add => Ok(ExprValue::Int(li + ri)),
            BinaryOp::Sub => Ok(ExprValue::Int(li - ri)),
            BinaryOp::Mul => Ok(ExprValue::Int(li * ri)),
            BinaryOp::Div => {
                if ri == 0 {
                    Err(RambleError::math("Division by zero in expression"))
                } else {
                    Ok(ExprValue::Float(li as f64 / ri as f64))
                }
            }
            BinaryOp::Pow => {
                if ri >= 0 {
                    match li.checked_pow(ri.min(u32::MAX as i64) as u32) {
                        Some(v) => Ok(ExprValue::Int(v)),
                        None => Ok(ExprValue::Float((li as f64).powf(ri as f64))),
                    }
                } else {
                    Ok(ExprValue::Float((li as f64).powi(ri as i32)))
                }
            }
            BinaryOp::Xor => Ok(ExprValue::Int(li ^ ri)),
        };
    }

    let lf = as_float(&l).ok_or_else(type_error)?;
    let rf = as_float(&r).ok_or_else(type_error)?;
    match op {
        BinaryOp::Add => Ok(ExprValue::Float(lf + rf)),
        BinaryOp::Sub => Ok(ExprValue::Float(lf - rf)),
        BinaryOp::Mul => Ok(ExprValue::Float(lf * rf)),
        BinaryOp::Div => {
            if rf == 0.0 {
                Err(RambleError::math("Division by zero in expression"))
            } else {
                Ok(ExprValue::Float(lf / rf))
            }
        }
        BinaryOp::Pow => Ok(ExprValue::Float(lf.powf(rf))),
        BinaryOp::Xor => Err(type_error()),
    }
}

/// Equality across values. Numeric values compare numerically regardless of
/// int/float representation; values of different kinds are unequal.
fn values_equal(l: &ExprValue, r: &ExprValue) -> bool {
    if let (Some(lf), Some(rf)) = (as_float(l), as_float(r)) {
        return lf == rf;
    }
    match (l, r) {
        (ExprValue::Str(a), ExprValue::Str(b)) => a == b,
        (ExprValue::List(a), ExprValue::List(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        _ => false,
    }
}

fn compare_pair(op: CompareOp, l: &ExprValue, r: &ExprValue) -> Result<bool> {
    match op {
        CompareOp::Eq => Ok(values_equal(l, r)),
        CompareOp::Ne => Ok(!values_equal(l, r)),
        _ => {
            let ordering = if let (Some(lf), Some(rf)) = (as_float(l), as_float(r)) {
                lf.partial_cmp(&rf)
            } else if let (ExprValue::Str(a), ExprValue::Str(b)) = (l, r) {
                Some(a.cmp(b))
            } else {
                return Err(RambleError::expr_syntax(
                    "Unsupported operand type in binary comparison operator",
                ));
            };
            let ordering = ordering.ok_or_else(|| {
                RambleError::math("Unordered operands in comparison operator")
            })?;
            Ok(match op {
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Eq | CompareOp::Ne => unreachable!(),
            })
        }
    }
}

fn eval_comparison(
    left: &ExprNode,
    ops: &[CompareOp],
    comparators: &[ExprNode],
    lookup: Option<&dyn CrossExperimentLookup>,
) -> Result<ExprValue> {
    let mut current = eval_node(left, lookup)?;

    // Chained comparisons short-circuit left to right.
    for (op, right) in ops.iter().zip(comparators.iter()) {
        let next = eval_node(right, lookup)?;
        if !compare_pair(*op, &current, &next)? {
            return Ok(ExprValue::Bool(false));
        }
        current = next;
    }

    Ok(ExprValue::Bool(true))
}

fn eval_bool_chain(
    op: BoolOp,
    values: &[ExprNode],
    lookup: Option<&dyn CrossExperimentLookup>,
) -> Result<ExprValue> {
    let mut result = eval_node(&values[0], lookup)?;

    for value in &values[1..] {
        // Short-circuit on a decided boolean.
        match (op, &result) {
            (BoolOp::And, ExprValue::Bool(false)) => return Ok(ExprValue::Bool(false)),
            (BoolOp::Or, ExprValue::Bool(true)) => return Ok(ExprValue::Bool(true)),
            _ => {}
        }

        let next = eval_node(value, lookup)?;
        result = match (&result, &next) {
            (ExprValue::Bool(a), ExprValue::Bool(b)) => match op {
                BoolOp::And => ExprValue::Bool(*a && *b),
                BoolOp::Or => ExprValue::Bool(*a || *b),
            },
            _ => match (as_int(&result), as_int(&next)) {
                (Some(a), Some(b)) => match op {
                    BoolOp::And => ExprValue::Int(a & b),
                    BoolOp::Or => ExprValue::Int(a | b),
                },
                _ => {
                    return Err(RambleError::expr_syntax(
                        "Unsupported operand type in boolean operator",
                    ))
                }
            },
        };
    }

    Ok(result)
}

fn eval_in(
    ident: &str,
    namespace: &[String],
    lookup: Option<&dyn CrossExperimentLookup>,
) -> Result<ExprValue> {
    let namespace = namespace.join(".");
    let template = format!("{{{}}}", ident);

    let value = lookup.and_then(|l| l.expand_in_experiment(&namespace, &template));
    match value {
        Some(v) if !v.is_empty() => Ok(ExprValue::Str(v)),
        _ => Err(RambleError::syntax(format!(
            "{} does not exist in: \"{} in {}\"",
            namespace, ident, namespace
        ))),
    }
}

fn eval_range(args: &[ExprNode], lookup: Option<&dyn CrossExperimentLookup>) -> Result<ExprValue> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        let v = eval_node(arg, lookup)?;
        let i = as_int(&v)
            .ok_or_else(|| RambleError::math("range() arguments must be integers"))?;
        values.push(i);
    }

    let (start, stop, step) = match values.len() {
        1 => (0, values[0], 1),
        2 => (values[0], values[1], 1),
        3 => (values[0], values[1], values[2]),
        n => {
            return Err(RambleError::math(format!(
                "range() takes 1 to 3 arguments, got {}",
                n
            )))
        }
    };

    if step == 0 {
        return Err(RambleError::math("range() step argument must not be zero"));
    }

    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(ExprValue::Int(current));
        current += step;
    }

    Ok(ExprValue::List(items))
}
