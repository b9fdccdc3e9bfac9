//! Expression Parser
//!
//! Recursive-descent parser for the restricted expression language used in
//! variable expansion:
//! - arithmetic: `1 + 2`, `{a}*{b}`, `2**10`, true division
//! - comparisons: `==` `!=` `<` `<=` `>` `>=`, chained
//! - boolean connectives: `and`, `or`
//! - `range(...)` calls
//! - cross-experiment membership: `var in app.workload.experiment`
//!
//! Anything outside this grammar is a syntax error; the expander treats
//! those leniently and keeps the input string unchanged.

use crate::error::{RambleError, Result};

use super::types::{BinaryOp, BoolOp, CompareOp, ExprNode, UnaryOp};

/// Parse a complete expression string. The whole input must be consumed.
pub fn parse_expression(input: &str) -> Result<ExprNode> {
    let chars: Vec<char> = input.chars().collect();
    let (expr, pos) = parse_or(&chars, 0)?;
    let pos = skip_whitespace(&chars, pos);
    if pos < chars.len() {
        let remaining: String = chars[pos..].iter().collect();
        return Err(RambleError::expr_syntax(format!(
            "Syntax error: unexpected token \"{}\"",
            remaining.trim()
        )));
    }
    Ok(expr)
}

fn skip_whitespace(chars: &[char], mut pos: usize) -> usize {
    while pos < chars.len() && chars[pos].is_whitespace() {
        pos += 1;
    }
    pos
}

/// Check whether the keyword `word` starts at `pos` with a word boundary
/// after it.
fn at_keyword(chars: &[char], pos: usize, word: &str) -> bool {
    let word_chars: Vec<char> = word.chars().collect();
    if pos + word_chars.len() > chars.len() {
        return false;
    }
    for (i, wc) in word_chars.iter().enumerate() {
        if chars[pos + i] != *wc {
            return false;
        }
    }
    match chars.get(pos + word_chars.len()) {
        Some(c) => !(c.is_ascii_alphanumeric() || *c == '_'),
        None => true,
    }
}

fn parse_or(chars: &[char], pos: usize) -> Result<(ExprNode, usize)> {
    let (first, mut pos) = parse_and(chars, pos)?;
    let mut values = vec![first];

    loop {
        let next = skip_whitespace(chars, pos);
        if at_keyword(chars, next, "or") {
            let (right, p2) = parse_and(chars, next + 2)?;
            values.push(right);
            pos = p2;
        } else {
            break;
        }
    }

    if values.len() > 1 {
        Ok((ExprNode::BoolChain { op: BoolOp::Or, values }, pos))
    } else {
        Ok((values.pop().unwrap(), pos))
    }
}

fn parse_and(chars: &[char], pos: usize) -> Result<(ExprNode, usize)> {
    let (first, mut pos) = parse_comparison(chars, pos)?;
    let mut values = vec![first];

    loop {
        let next = skip_whitespace(chars, pos);
        if at_keyword(chars, next, "and") {
            let (right, p2) = parse_comparison(chars, next + 3)?;
            values.push(right);
            pos = p2;
        } else {
            break;
        }
    }

    if values.len() > 1 {
        Ok((ExprNode::BoolChain { op: BoolOp::And, values }, pos))
    } else {
        Ok((values.pop().unwrap(), pos))
    }
}

fn comparison_op(chars: &[char], pos: usize) -> Option<(CompareOp, usize)> {
    let rest: String = chars[pos..].iter().take(2).collect();
    if rest.starts_with("==") {
        Some((CompareOp::Eq, 2))
    } else if rest.starts_with("!=") {
        Some((CompareOp::Ne, 2))
    } else if rest.starts_with("<=") {
        Some((CompareOp::Le, 2))
    } else if rest.starts_with(">=") {
        Some((CompareOp::Ge, 2))
    } else if rest.starts_with('<') {
        Some((CompareOp::Lt, 1))
    } else if rest.starts_with('>') {
        Some((CompareOp::Gt, 1))
    } else {
        None
    }
}

fn parse_comparison(chars: &[char], pos: usize) -> Result<(ExprNode, usize)> {
    let (left, mut pos) = parse_additive(chars, pos)?;

    // `ident in a.b.c` is its own node; it cannot be chained.
    let next = skip_whitespace(chars, pos);
    if at_keyword(chars, next, "in") {
        let ident = match &left {
            ExprNode::Name(name) => name.clone(),
            _ => {
                return Err(RambleError::expr_syntax(
                    "Syntax error: left side of \"in\" must be a variable name",
                ))
            }
        };
        let (right, p2) = parse_additive(chars, next + 2)?;
        let namespace = match right {
            ExprNode::Attribute(parts) => parts,
            _ => {
                return Err(RambleError::expr_syntax(
                    "Syntax error: right side of \"in\" must be a dotted experiment name",
                ))
            }
        };
        return Ok((ExprNode::In { ident, namespace }, p2));
    }

    let mut ops = Vec::new();
    let mut comparators = Vec::new();
    loop {
        let next = skip_whitespace(chars, pos);
        match comparison_op(chars, next) {
            Some((op, len)) => {
                let (right, p2) = parse_additive(chars, next + len)?;
                ops.push(op);
                comparators.push(right);
                pos = p2;
            }
            None => break,
        }
    }

    if ops.is_empty() {
        Ok((left, pos))
    } else {
        Ok((
            ExprNode::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            pos,
        ))
    }
}

fn parse_additive(chars: &[char], pos: usize) -> Result<(ExprNode, usize)> {
    let (mut left, mut pos) = parse_term(chars, pos)?;

    loop {
        let next = skip_whitespace(chars, pos);
        match chars.get(next) {
            Some('+') => {
                let (right, p2) = parse_term(chars, next + 1)?;
                left = binary(BinaryOp::Add, left, right);
                pos = p2;
            }
            Some('-') => {
                let (right, p2) = parse_term(chars, next + 1)?;
                left = binary(BinaryOp::Sub, left, right);
                pos = p2;
            }
            _ => break,
        }
    }

    Ok((left, pos))
}

fn parse_term(chars: &[char], pos: usize) -> Result<(ExprNode, usize)> {
    let (mut left, mut pos) = parse_unary(chars, pos)?;

    loop {
        let next = skip_whitespace(chars, pos);
        match chars.get(next) {
            Some('*') if chars.get(next + 1) != Some(&'*') => {
                let (right, p2) = parse_unary(chars, next + 1)?;
                left = binary(BinaryOp::Mul, left, right);
                pos = p2;
            }
            Some('/') => {
                let (right, p2) = parse_unary(chars, next + 1)?;
                left = binary(BinaryOp::Div, left, right);
                pos = p2;
            }
            Some('^') => {
                let (right, p2) = parse_unary(chars, next + 1)?;
                left = binary(BinaryOp::Xor, left, right);
                pos = p2;
            }
            _ => break,
        }
    }

    Ok((left, pos))
}

fn parse_unary(chars: &[char], pos: usize) -> Result<(ExprNode, usize)> {
    let next = skip_whitespace(chars, pos);
    if chars.get(next) == Some(&'-') {
        let (operand, p2) = parse_unary(chars, next + 1)?;
        return Ok((
            ExprNode::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            },
            p2,
        ));
    }
    parse_power(chars, next)
}

fn parse_power(chars: &[char], pos: usize) -> Result<(ExprNode, usize)> {
    let (base, pos) = parse_atom(chars, pos)?;

    let next = skip_whitespace(chars, pos);
    if chars.get(next) == Some(&'*') && chars.get(next + 1) == Some(&'*') {
        // Right associative
        let (exponent, p2) = parse_unary(chars, next + 2)?;
        return Ok((binary(BinaryOp::Pow, base, exponent), p2));
    }

    Ok((base, pos))
}

fn binary(op: BinaryOp, left: ExprNode, right: ExprNode) -> ExprNode {
    ExprNode::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn parse_atom(chars: &[char], pos: usize) -> Result<(ExprNode, usize)> {
    let pos = skip_whitespace(chars, pos);

    let c = match chars.get(pos) {
        Some(c) => *c,
        None => return Err(RambleError::expr_syntax("Syntax error: operand expected")),
    };

    // Grouped expression
    if c == '(' {
        let (expr, p2) = parse_or(chars, pos + 1)?;
        let p2 = skip_whitespace(chars, p2);
        if chars.get(p2) != Some(&')') {
            return Err(RambleError::expr_syntax("Syntax error: expected \")\""));
        }
        return Ok((expr, p2 + 1));
    }

    // Quoted string literal
    if c == '\'' || c == '"' {
        let quote = c;
        let mut content = String::new();
        let mut p = pos + 1;
        while p < chars.len() && chars[p] != quote {
            content.push(chars[p]);
            p += 1;
        }
        if p >= chars.len() {
            return Err(RambleError::expr_syntax("Syntax error: unterminated string literal"));
        }
        return Ok((ExprNode::Str(content), p + 1));
    }

    // Number
    if c.is_ascii_digit() {
        return parse_number(chars, pos);
    }

    // Identifier, keyword constant, call, or dotted attribute
    if c.is_ascii_alphabetic() || c == '_' {
        return parse_name(chars, pos);
    }

    Err(RambleError::expr_syntax(format!(
        "Syntax error: unexpected character \"{}\"",
        c
    )))
}

fn parse_number(chars: &[char], pos: usize) -> Result<(ExprNode, usize)> {
    let mut p = pos;
    let mut text = String::new();
    let mut is_float = false;

    while p < chars.len() && chars[p].is_ascii_digit() {
        text.push(chars[p]);
        p += 1;
    }
    if chars.get(p) == Some(&'.') && chars.get(p + 1).map_or(false, |c| c.is_ascii_digit()) {
        is_float = true;
        text.push('.');
        p += 1;
        while p < chars.len() && chars[p].is_ascii_digit() {
            text.push(chars[p]);
            p += 1;
        }
    }

    // A number running into letters is not a valid literal, and neither is
    // a leading zero ("04" must survive expansion unchanged).
    if chars.get(p).map_or(false, |c| c.is_ascii_alphabetic() || *c == '_') {
        return Err(RambleError::expr_syntax(format!(
            "Syntax error: invalid numeric literal \"{}\"",
            text
        )));
    }
    let int_part = text.split('.').next().unwrap_or("");
    if int_part.len() > 1 && int_part.starts_with('0') {
        return Err(RambleError::expr_syntax(format!(
            "Syntax error: invalid numeric literal \"{}\"",
            text
        )));
    }

    if is_float {
        let value: f64 = text
            .parse()
            .map_err(|_| RambleError::expr_syntax(format!("Syntax error: invalid float \"{}\"", text)))?;
        Ok((ExprNode::Float(value), p))
    } else {
        let value: i64 = text
            .parse()
            .map_err(|_| RambleError::expr_syntax(format!("Syntax error: invalid integer \"{}\"", text)))?;
        Ok((ExprNode::Int(value), p))
    }
}

fn parse_identifier(chars: &[char], pos: usize) -> (String, usize) {
    let mut name = String::new();
    let mut p = pos;
    while p < chars.len() && (chars[p].is_ascii_alphanumeric() || chars[p] == '_') {
        name.push(chars[p]);
        p += 1;
    }
    (name, p)
}

fn parse_name(chars: &[char], pos: usize) -> Result<(ExprNode, usize)> {
    let (name, mut p) = parse_identifier(chars, pos);

    match name.as_str() {
        "True" => return Ok((ExprNode::Bool(true), p)),
        "False" => return Ok((ExprNode::Bool(false), p)),
        // Connective keywords never start an operand.
        "and" | "or" | "in" => {
            return Err(RambleError::expr_syntax(format!(
                "Syntax error: operand expected before \"{}\"",
                name
            )))
        }
        _ => {}
    }

    // range(...) is the only supported call.
    if name == "range" && chars.get(p) == Some(&'(') {
        p += 1;
        let mut args = Vec::new();
        loop {
            let (arg, p2) = parse_or(chars, p)?;
            args.push(arg);
            let p2 = skip_whitespace(chars, p2);
            match chars.get(p2) {
                Some(',') => p = p2 + 1,
                Some(')') => {
                    p = p2 + 1;
                    break;
                }
                _ => return Err(RambleError::expr_syntax("Syntax error: expected \",\" or \")\"")),
            }
        }
        return Ok((ExprNode::Range { args }, p));
    }

    // Any other call target is outside the grammar.
    if chars.get(p) == Some(&'(') {
        return Err(RambleError::expr_syntax(format!(
            "Syntax error: unsupported function call \"{}\"",
            name
        )));
    }

    // Dotted attribute path
    let mut parts = vec![name];
    while chars.get(p) == Some(&'.') {
        let next = p + 1;
        if !chars
            .get(next)
            .map_or(false, |c| c.is_ascii_alphabetic() || *c == '_')
        {
            return Err(RambleError::expr_syntax(
                "Syntax error: expected identifier after \".\"",
            ));
        }
        let (part, p2) = parse_identifier(chars, next);
        parts.push(part);
        p = p2;
    }

    if parts.len() == 1 {
        Ok((ExprNode::Name(parts.pop().unwrap()), p))
    } else {
        Ok((ExprNode::Attribute(parts), p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number() {
        assert_eq!(parse_expression("42").unwrap(), ExprNode::Int(42));
        assert_eq!(parse_expression("2.5").unwrap(), ExprNode::Float(2.5));
    }

    #[test]
    fn test_binary_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        match expr {
            ExprNode::Binary { op: BinaryOp::Add, right, .. } => {
                assert!(matches!(*right, ExprNode::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("Expected add at top, got {:?}", other),
        }
    }

    #[test]
    fn test_power_right_associative() {
        let expr = parse_expression("2 ** 3 ** 2").unwrap();
        match expr {
            ExprNode::Binary { op: BinaryOp::Pow, right, .. } => {
                assert!(matches!(*right, ExprNode::Binary { op: BinaryOp::Pow, .. }));
            }
            other => panic!("Expected pow at top, got {:?}", other),
        }
    }

    #[test]
    fn test_name_and_attribute() {
        assert_eq!(
            parse_expression("series1_4").unwrap(),
            ExprNode::Name("series1_4".to_string())
        );
        assert_eq!(
            parse_expression("basic.test_wl.series1_4").unwrap(),
            ExprNode::Attribute(vec![
                "basic".to_string(),
                "test_wl".to_string(),
                "series1_4".to_string()
            ])
        );
    }

    #[test]
    fn test_in_expression() {
        let expr = parse_expression("test_var in basic.test_wl.series1_4").unwrap();
        match expr {
            ExprNode::In { ident, namespace } => {
                assert_eq!(ident, "test_var");
                assert_eq!(namespace, vec!["basic", "test_wl", "series1_4"]);
            }
            other => panic!("Expected in-node, got {:?}", other),
        }
    }

    #[test]
    fn test_bool_chain() {
        let expr = parse_expression("3 > 2 and 3 < 5").unwrap();
        match expr {
            ExprNode::BoolChain { op: BoolOp::And, values } => assert_eq!(values.len(), 2),
            other => panic!("Expected and-chain, got {:?}", other),
        }
    }

    #[test]
    fn test_chained_comparison() {
        let expr = parse_expression("1 < 2 < 3").unwrap();
        match expr {
            ExprNode::Compare { ops, comparators, .. } => {
                assert_eq!(ops.len(), 2);
                assert_eq!(comparators.len(), 2);
            }
            other => panic!("Expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_range_call() {
        let expr = parse_expression("range(0, 4)").unwrap();
        match expr {
            ExprNode::Range { args } => assert_eq!(args.len(), 2),
            other => panic!("Expected range, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_plain_text() {
        assert!(parse_expression("hello world").is_err());
        assert!(parse_expression("4_2").is_err());
        assert!(parse_expression("04").is_err());
        assert!(parse_expression("").is_err());
        assert!(parse_expression("foo()").is_err());
    }
}
