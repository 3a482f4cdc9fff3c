//! Eligibility rules evaluated against a registrant's form answers.
//!
//! Form values are loosely typed (text inputs arrive as strings, multi-selects as arrays),
//! so evaluation works over [`serde_json::Value`]. The operator set is closed: anything the
//! evaluator does not recognise deserializes to [`ConditionOperator::Unknown`] and evaluates
//! to `false`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Registrant form answers keyed by field id.
pub type FormData = HashMap<String, Value>;

/// Comparison applied between a form answer and a rule value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Loose equality
    Equals,
    /// Negated loose equality
    NotEquals,
    /// Substring match on text answers
    Contains,
    /// Numeric `>`
    GreaterThan,
    /// Numeric `<`
    LessThan,
    /// Membership in an array rule value
    In,
    /// Non-membership in an array rule value
    NotIn,
    /// Unrecognised operator; never matches
    #[serde(other)]
    Unknown,
}

/// How a list of conditions combines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionLogic {
    /// Every condition must hold
    #[default]
    And,
    /// At least one condition must hold
    Or,
}

/// A single eligibility rule: `form[field_id] <operator> value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Form field the rule reads
    pub field_id: String,
    /// Comparison
    pub operator: ConditionOperator,
    /// Right-hand side
    pub value: Value,
}

impl Condition {
    /// Creates a condition
    #[must_use]
    pub fn new(field_id: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field_id: field_id.into(),
            operator,
            value,
        }
    }
}

/// Evaluate one condition against the form answers.
///
/// A missing answer is treated as `null`.
#[must_use]
pub fn evaluate(condition: &Condition, form_data: &FormData) -> bool {
    let answer = form_data.get(&condition.field_id).unwrap_or(&Value::Null);
    apply(condition.operator, answer, &condition.value)
}

/// Evaluate a list of conditions under `logic`. An empty list is eligible.
#[must_use]
pub fn evaluate_conditions(
    conditions: &[Condition],
    logic: ConditionLogic,
    form_data: &FormData,
) -> bool {
    if conditions.is_empty() {
        return true;
    }
    match logic {
        ConditionLogic::And => conditions.iter().all(|c| evaluate(c, form_data)),
        ConditionLogic::Or => conditions.iter().any(|c| evaluate(c, form_data)),
    }
}

/// Operator dispatcher.
#[must_use]
pub fn apply(operator: ConditionOperator, answer: &Value, rule: &Value) -> bool {
    match operator {
        ConditionOperator::Equals => loosely_equal(answer, rule),
        ConditionOperator::NotEquals => !loosely_equal(answer, rule),
        ConditionOperator::Contains => contains(answer, rule),
        ConditionOperator::GreaterThan => compare_numeric(answer, rule, |a, b| a > b),
        ConditionOperator::LessThan => compare_numeric(answer, rule, |a, b| a < b),
        ConditionOperator::In => membership(answer, rule).unwrap_or(false),
        ConditionOperator::NotIn => membership(answer, rule).is_some_and(|found| !found),
        ConditionOperator::Unknown => false,
    }
}

/// Numeric view of a value: numbers, and strings that parse as numbers.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), Value::Number(_) | Value::String(_))
        | (Value::String(_), Value::Number(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if (x - y).abs() < f64::EPSILON)
        }
        (Value::Bool(flag), Value::String(s)) | (Value::String(s), Value::Bool(flag)) => {
            s.eq_ignore_ascii_case(if *flag { "true" } else { "false" })
        }
        _ => false,
    }
}

fn contains(answer: &Value, rule: &Value) -> bool {
    match (answer, rule) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(values), _) => values.iter().any(|v| {
            loosely_equal(v, rule)
                || matches!((v, rule), (Value::String(h), Value::String(n)) if h.contains(n.as_str()))
        }),
        _ => false,
    }
}

fn compare_numeric(answer: &Value, rule: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(answer), as_number(rule)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// `Some(found)` when the rule value is an array, `None` otherwise.
fn membership(answer: &Value, rule: &Value) -> Option<bool> {
    let Value::Array(allowed) = rule else {
        return None;
    };
    let found = match answer {
        Value::Array(values) => values
            .iter()
            .any(|v| allowed.iter().any(|a| loosely_equal(v, a))),
        other => allowed.iter().any(|a| loosely_equal(other, a)),
    };
    Some(found)
}
