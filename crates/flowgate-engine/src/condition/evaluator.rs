//! Evaluation of parsed conditions against an execution context.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::parser::{parse, CompareOp, Expr};
use crate::error::{EngineError, EngineResult};

/// Evaluates restricted boolean expressions over an execution context.
///
/// The language has no function calls and no side effects. Paths that do
/// not exist in the context resolve to `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `expression` against `context`.
    ///
    /// Malformed expressions fail with `ConditionSyntax`; ordering
    /// comparisons between incompatible types fail with `ConditionEvaluation`.
    pub fn evaluate(&self, expression: &str, context: &Map<String, Value>) -> EngineResult<bool> {
        let expr = parse(expression)?;
        let value = eval(&expr, context)?;
        Ok(truthy(&value))
    }

    /// Syntax-only check, usable at design time without a context.
    pub fn validate(&self, expression: &str) -> EngineResult<()> {
        parse(expression).map(|_| ())
    }
}

fn eval(expr: &Expr, context: &Map<String, Value>) -> EngineResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => Ok(lookup(context, segments).cloned().unwrap_or(Value::Null)),
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, context)?))),
        Expr::And(left, right) => {
            if !truthy(&eval(left, context)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(right, context)?)))
        }
        Expr::Or(left, right) => {
            if truthy(&eval(left, context)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(right, context)?)))
        }
        Expr::Compare { op, left, right } => {
            let l = eval(left, context)?;
            let r = eval(right, context)?;
            compare(*op, &l, &r).map(Value::Bool)
        }
    }
}

/// Resolve a dotted path. Numeric segments index into arrays.
pub fn lookup<'a, S: AsRef<str>>(context: &'a Map<String, Value>, segments: &[S]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = context.get(first.as_ref())?;

    for segment in rest {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> EngineResult<bool> {
    match op {
        CompareOp::Eq => Ok(values_equal(left, right)),
        CompareOp::Ne => Ok(!values_equal(left, right)),
        _ => {
            let ordering = match (left, right) {
                (Value::Null, _) | (_, Value::Null) => return Ok(false),
                (Value::Number(a), Value::Number(b)) => {
                    let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                    match a.partial_cmp(&b) {
                        Some(ordering) => ordering,
                        None => return Ok(false),
                    }
                }
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    return Err(EngineError::ConditionEvaluation(format!(
                        "cannot apply '{}' to {} and {}",
                        op,
                        type_name(left),
                        type_name(right)
                    )))
                }
            };

            Ok(match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::Ne => ordering != Ordering::Equal,
            })
        }
    }
}

/// Strict equality; numbers compare by value so `1 == 1.0`.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Truthiness used by `!`, `&&`, `||` and the final result.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
