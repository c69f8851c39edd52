//! Evaluates a compiled matcher tree against a decoded message.

use crate::ast::{CmpOp, Literal, Node, Var};
use crate::pattern::{glob_matches, literal_matches};
use heka_wire::{FieldValue, Message};

/// The runtime value a `var` resolves to, ready for comparison.
enum Resolved<'a> {
    Str(&'a [u8]),
    Num(f64),
    Bool(bool),
    /// Explicitly absent (only reachable for string-valued headers and
    /// missing `Fields` entries — numeric-sentineled headers always
    /// resolve to a concrete value).
    Nil,
}

fn resolve<'a>(var: &Var, m: &Message<'a>) -> Resolved<'a> {
    match var {
        Var::Uuid => Resolved::Str(m.uuid),
        Var::Timestamp => Resolved::Num(m.timestamp as f64),
        Var::Type => resolve_optional_str(m.r#type),
        Var::Logger => resolve_optional_str(m.logger),
        Var::Payload => resolve_optional_str(m.payload),
        Var::EnvVersion => resolve_optional_str(m.env_version),
        Var::Hostname => resolve_optional_str(m.hostname),
        Var::Severity => Resolved::Num(m.severity as f64),
        Var::Pid => Resolved::Num(m.pid as f64),
        Var::Field { name, field_index, array_index } => {
            match m.read_field(name, *field_index as usize, *array_index as usize) {
                FieldValue::Nil => Resolved::Nil,
                FieldValue::String(s) => Resolved::Str(s),
                FieldValue::Numeric(n) => Resolved::Num(n),
                FieldValue::Bool(b) => Resolved::Bool(b),
            }
        }
    }
}

fn resolve_optional_str(s: Option<&[u8]>) -> Resolved<'_> {
    match s {
        Some(s) => Resolved::Str(s),
        None => Resolved::Nil,
    }
}

/// `Severity`/`Pid`/`Timestamp` always carry a concrete (possibly
/// sentinel) value, so they never compare equal to `NIL`.
fn is_never_nil(var: &Var) -> bool {
    matches!(var, Var::Severity | Var::Pid | Var::Timestamp)
}

fn compare(resolved: &Resolved<'_>, op: CmpOp, value: &Literal, never_nil: bool) -> bool {
    match value {
        Literal::Nil => {
            let is_nil = !never_nil && matches!(resolved, Resolved::Nil);
            match op {
                CmpOp::Eq => is_nil,
                CmpOp::Ne => !is_nil,
                _ => false,
            }
        }
        Literal::Bool(b) => match resolved {
            Resolved::Bool(rb) => match op {
                CmpOp::Eq => rb == b,
                CmpOp::Ne => rb != b,
                _ => false,
            },
            _ => false,
        },
        Literal::Number(n) => match resolved {
            Resolved::Num(rn) => cmp_f64(*rn, *n, op),
            Resolved::Nil if !never_nil => false,
            _ => false,
        },
        Literal::Str(s) => match resolved {
            Resolved::Str(rs) => cmp_bytes(rs, s, op),
            // An absent string header compares as the empty string.
            Resolved::Nil if !never_nil => cmp_bytes(&[], s, op),
            _ => false,
        },
    }
}

fn cmp_f64(a: f64, b: f64, op: CmpOp) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

fn cmp_bytes(a: &[u8], b: &[u8], op: CmpOp) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

/// Evaluates `node` against `message`, short-circuiting `&&`/`||`.
pub fn eval(node: &Node, message: &Message<'_>) -> bool {
    match node {
        Node::True => true,
        Node::And(l, r) => eval(l, message) && eval(r, message),
        Node::Or(l, r) => eval(l, message) || eval(r, message),
        Node::Compare { var, op, value } => {
            let resolved = resolve(var, message);
            compare(&resolved, *op, value, is_never_nil(var))
        }
        Node::Match { var, pattern, literal, negate } => {
            let resolved = resolve(var, message);
            let subject: &[u8] = match &resolved {
                Resolved::Str(s) => s,
                Resolved::Nil => &[],
                _ => return false,
            };
            let matched =
                if *literal { literal_matches(pattern, subject) } else { glob_matches(pattern, subject) };
            matched != *negate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use heka_wire::{encode, FieldInput, FieldValueInput, MessageInput};

    fn sample() -> Vec<u8> {
        encode(&MessageInput {
            uuid: Some(vec![0u8; 16]),
            timestamp: Some(1_428_773_426_113_040_228),
            r#type: Some(b"TEST".to_vec()),
            logger: Some(b"GoSpec".to_vec()),
            severity: Some(6),
            payload: Some(b"Test Payload with a unique-item".to_vec()),
            env_version: Some(b"0.8".to_vec()),
            pid: Some(32157),
            hostname: Some(b"trink-x230".to_vec()),
            fields: vec![
                FieldInput { name: b"foo".to_vec(), representation: None, value: FieldValueInput::String(vec![b"bar".to_vec()]) },
                FieldInput { name: b"foo".to_vec(), representation: None, value: FieldValueInput::String(vec![b"alternate".to_vec()]) },
                FieldInput { name: b"number".to_vec(), representation: None, value: FieldValueInput::Integer(vec![64]) },
                FieldInput { name: b"int".to_vec(), representation: None, value: FieldValueInput::Integer(vec![999, 1024]) },
                FieldInput { name: b"bool".to_vec(), representation: None, value: FieldValueInput::Bool(vec![true]) },
            ],
            ..Default::default()
        })
    }

    fn matches(expr: &str) -> bool {
        let bytes = sample();
        let msg = Message::decode(&bytes).unwrap();
        let node = compile(expr).unwrap_or_else(|| panic!("failed to compile {expr}"));
        eval(&node, &msg)
    }

    #[test]
    fn scenario_true_matchers() {
        for expr in [
            "TRUE",
            "(Severity == 7 || Logger == 'GoSpec') && Type == 'TEST'",
            "EnvVersion == \"0.8\"",
            "Pid != NIL",
            "Pid == 32157",
            "Fields[foo] == 'bar'",
            "Fields[foo][1] == 'alternate'",
            "Fields[int] != NIL",
            "Fields[int][0][1] == 1024",
            "Fields[missing] == NIL",
            "Type =~ 'TEST'",
            "Type !~ 'bogus'",
            "Fields[foo][1] =~ 'alt'",
            "Type =~ '^TE'",
            "Type =~ 'ST$'",
            "Payload =~ 'unique-item'%",
            "Fields[bool] == TRUE",
        ] {
            assert!(matches(expr), "expected match: {expr}");
        }
    }

    #[test]
    fn scenario_false_matchers() {
        for expr in ["Type != 'TEST'", "Fields[foo] == 'nope'", "Type =~ '^xyz'", "Severity == 1"] {
            assert!(!matches(expr), "expected no match: {expr}");
        }
    }

    #[test]
    fn absent_string_header_is_nil_and_empty() {
        let bytes = encode(&MessageInput { uuid: Some(vec![1u8; 16]), timestamp: Some(1), ..Default::default() });
        let msg = Message::decode(&bytes).unwrap();
        assert!(eval(&compile("Type == NIL").unwrap(), &msg));
        assert!(eval(&compile("Type == ''").unwrap(), &msg));
        assert!(eval(&compile("Type != 'TEST'").unwrap(), &msg));
    }

    #[test]
    fn out_of_range_field_index_is_nil() {
        let bytes = sample();
        let msg = Message::decode(&bytes).unwrap();
        assert!(eval(&compile("Fields[foo][255] == NIL").unwrap(), &msg));
    }
}
