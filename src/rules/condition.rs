//! Condition trees and their evaluation
//!
//! A deliberately closed grammar: leaf comparisons on dot-path fields, joined
//! by AND/OR groups. Evaluation never fails; malformed leaves evaluate to
//! false and are reported so one bad rule cannot break the others.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Comparison operators understood by the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl ConditionOperator {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "equals" => Some(Self::Equals),
            "not_equals" => Some(Self::NotEquals),
            "greater_than" => Some(Self::GreaterThan),
            "less_than" => Some(Self::LessThan),
            "in" => Some(Self::In),
            "not_in" => Some(Self::NotIn),
            "is_null" => Some(Self::IsNull),
            "is_not_null" => Some(Self::IsNotNull),
            _ => None,
        }
    }

    fn needs_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

/// A single comparison against a payload field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-path into the payload (e.g., "customer.tier", "items.0.sku")
    pub field: String,
    /// Operator name, kept as text so unknown operators survive loading
    pub operator: String,
    /// Comparison value; ignored by is_null / is_not_null
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: &str, operator: &str, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, "equals", value)
    }

    pub fn not_equals(field: &str, value: Value) -> Self {
        Self::new(field, "not_equals", value)
    }

    pub fn greater_than(field: &str, value: Value) -> Self {
        Self::new(field, "greater_than", value)
    }

    pub fn less_than(field: &str, value: Value) -> Self {
        Self::new(field, "less_than", value)
    }

    pub fn in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, "in", Value::Array(values))
    }

    pub fn not_in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, "not_in", Value::Array(values))
    }

    pub fn is_null(field: &str) -> Self {
        Self::new(field, "is_null", Value::Null)
    }

    pub fn is_not_null(field: &str) -> Self {
        Self::new(field, "is_not_null", Value::Null)
    }
}

/// Boolean connective for composite conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// AND/OR group of nested conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeCondition {
    pub operator: LogicalOperator,
    pub conditions: Vec<ConditionNode>,
}

/// Node of a condition tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Composite(CompositeCondition),
    Leaf(Condition),
}

impl ConditionNode {
    pub fn and(conditions: Vec<ConditionNode>) -> Self {
        Self::Composite(CompositeCondition {
            operator: LogicalOperator::And,
            conditions,
        })
    }

    pub fn or(conditions: Vec<ConditionNode>) -> Self {
        Self::Composite(CompositeCondition {
            operator: LogicalOperator::Or,
            conditions,
        })
    }

    /// Tree that always matches (empty AND)
    pub fn always() -> Self {
        Self::and(Vec::new())
    }
}

impl From<Condition> for ConditionNode {
    fn from(condition: Condition) -> Self {
        Self::Leaf(condition)
    }
}

impl Default for ConditionNode {
    fn default() -> Self {
        Self::always()
    }
}

/// Resolve a dot-path; missing keys, out-of-range indexes and non-container
/// intermediates all resolve to null
pub fn resolve_path<'a>(payload: &'a Value, path: &str) -> &'a Value {
    if path.is_empty() {
        return payload;
    }

    let mut current = payload;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part).unwrap_or(&Value::Null),
            Value::Array(items) => part
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
    }
    current
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b) == Some(Ordering::Equal),
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Integers compare exactly; f64 only once a float is involved
fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    match (integer(a), integer(b)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Evaluates condition trees against JSON payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `tree` against `payload`; never fails
    pub fn evaluate(&self, tree: &ConditionNode, payload: &Value) -> bool {
        match tree {
            ConditionNode::Composite(group) => match group.operator {
                LogicalOperator::And => group.conditions.iter().all(|c| self.evaluate(c, payload)),
                LogicalOperator::Or => group.conditions.iter().any(|c| self.evaluate(c, payload)),
            },
            ConditionNode::Leaf(condition) => self.evaluate_leaf(condition, payload),
        }
    }

    fn evaluate_leaf(&self, condition: &Condition, payload: &Value) -> bool {
        let Some(operator) = ConditionOperator::parse(&condition.operator) else {
            tracing::warn!(
                "⚠️ Unknown condition operator '{}' on field '{}', evaluating as false",
                condition.operator,
                condition.field
            );
            return false;
        };

        let actual = resolve_path(payload, &condition.field);
        let expected = &condition.value;

        let result = match operator {
            ConditionOperator::Equals => values_equal(actual, expected),
            ConditionOperator::NotEquals => !values_equal(actual, expected),
            ConditionOperator::GreaterThan => compare(actual, expected) == Some(Ordering::Greater),
            ConditionOperator::LessThan => compare(actual, expected) == Some(Ordering::Less),
            ConditionOperator::In | ConditionOperator::NotIn => {
                let Value::Array(options) = expected else {
                    tracing::warn!(
                        "⚠️ Operator '{}' on field '{}' needs a list value, evaluating as false",
                        condition.operator,
                        condition.field
                    );
                    return false;
                };
                let found = options.iter().any(|option| values_equal(actual, option));
                if operator == ConditionOperator::In {
                    found
                } else {
                    !found
                }
            }
            ConditionOperator::IsNull => actual.is_null(),
            ConditionOperator::IsNotNull => !actual.is_null(),
        };

        tracing::debug!(
            "🔍 Condition {} {} {} → {}",
            condition.field,
            condition.operator,
            expected,
            result
        );
        result
    }

    /// Shape problems in a tree, one message per offending leaf
    pub fn validate(&self, tree: &ConditionNode) -> Vec<String> {
        let mut problems = Vec::new();
        collect_problems(tree, &mut problems);
        problems
    }
}

fn collect_problems(tree: &ConditionNode, problems: &mut Vec<String>) {
    match tree {
        ConditionNode::Composite(group) => {
            for child in &group.conditions {
                collect_problems(child, problems);
            }
        }
        ConditionNode::Leaf(condition) => {
            if condition.field.trim().is_empty() {
                problems.push("condition field must not be empty".to_string());
            }
            match ConditionOperator::parse(&condition.operator) {
                None => problems.push(format!(
                    "unknown operator '{}' on field '{}'",
                    condition.operator, condition.field
                )),
                Some(op) if op.needs_list() && !condition.value.is_array() => problems.push(format!(
                    "operator '{}' on field '{}' requires a list value",
                    condition.operator, condition.field
                )),
                Some(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(tree: &ConditionNode, payload: Value) -> bool {
        ConditionEvaluator::new().evaluate(tree, &payload)
    }

    #[test]
    fn test_missing_intermediate_is_null() {
        let payload = json!({"customer": {"tier": "gold"}});
        assert_eq!(resolve_path(&payload, "customer.tier"), &json!("gold"));
        assert!(resolve_path(&payload, "customer.address.city").is_null());
        assert!(resolve_path(&payload, "customer.tier.length").is_null());

        assert!(eval(&Condition::is_null("shipping.carrier").into(), payload.clone()));
        assert!(!eval(&Condition::is_not_null("shipping.carrier").into(), payload));
    }

    #[test]
    fn test_array_index_path() {
        let payload = json!({"items": [{"sku": "A-1"}, {"sku": "B-2"}]});
        assert!(eval(&Condition::equals("items.1.sku", json!("B-2")).into(), payload.clone()));
        assert!(eval(&Condition::is_null("items.5.sku").into(), payload));
    }

    #[test]
    fn test_comparisons() {
        let payload = json!({"total": 1500, "status": "PENDING", "created": "2026-01-02"});

        assert!(eval(&Condition::greater_than("total", json!(1000)).into(), payload.clone()));
        assert!(!eval(&Condition::less_than("total", json!(1000)).into(), payload.clone()));
        assert!(eval(&Condition::equals("total", json!(1500.0)).into(), payload.clone()));
        assert!(eval(&Condition::not_equals("status", json!("SHIPPED")).into(), payload.clone()));
        assert!(eval(&Condition::less_than("created", json!("2026-02-01")).into(), payload.clone()));
        // Mixed types never compare
        assert!(!eval(&Condition::greater_than("status", json!(1)).into(), payload.clone()));
        assert!(!eval(&Condition::greater_than("missing", json!(0)).into(), payload));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        // 2^53 and 2^53 + 1 collapse to the same f64
        let payload = json!({"id": 9007199254740992u64, "balance": -9007199254740993i64});

        assert!(!eval(&Condition::equals("id", json!(9007199254740993u64)).into(), payload.clone()));
        assert!(eval(&Condition::equals("id", json!(9007199254740992u64)).into(), payload.clone()));
        assert!(eval(&Condition::less_than("id", json!(9007199254740993u64)).into(), payload.clone()));
        assert!(!eval(&Condition::greater_than("id", json!(9007199254740993u64)).into(), payload.clone()));
        assert!(!eval(
            &Condition::in_list("id", vec![json!(9007199254740991u64), json!(9007199254740993u64)]).into(),
            payload.clone()
        ));
        assert!(eval(&Condition::less_than("balance", json!(-9007199254740992i64)).into(), payload.clone()));
        assert!(!eval(&Condition::greater_than("id", json!(u64::MAX)).into(), json!({"id": -1})));
        assert!(eval(&Condition::less_than("id", json!(u64::MAX)).into(), json!({"id": -1})));
        // Floats still compare against integers
        assert!(eval(&Condition::greater_than("id", json!(1.5)).into(), payload));
    }

    #[test]
    fn test_in_and_not_in() {
        let payload = json!({"priority": "high"});
        let priorities = vec![json!("critical"), json!("high")];

        assert!(eval(&Condition::in_list("priority", priorities.clone()).into(), payload.clone()));
        assert!(!eval(&Condition::not_in_list("priority", priorities).into(), payload.clone()));
        // Non-list value is malformed, both operators evaluate false
        assert!(!eval(&Condition::new("priority", "in", json!("high")).into(), payload.clone()));
        assert!(!eval(&Condition::new("priority", "not_in", json!("low")).into(), payload));
    }

    #[test]
    fn test_unknown_operator_is_false() {
        let tree = ConditionNode::or(vec![
            Condition::new("total", "roughly", json!(10)).into(),
            Condition::equals("total", json!(10)).into(),
        ]);
        assert!(eval(&tree, json!({"total": 10})));
        assert!(!eval(&Condition::new("total", "roughly", json!(10)).into(), json!({"total": 10})));
    }

    #[test]
    fn test_nested_truth_table() {
        // OR[AND[a, b], AND[c, d]]
        let tree = ConditionNode::or(vec![
            ConditionNode::and(vec![
                Condition::equals("a", json!(true)).into(),
                Condition::equals("b", json!(true)).into(),
            ]),
            ConditionNode::and(vec![
                Condition::equals("c", json!(true)).into(),
                Condition::equals("d", json!(true)).into(),
            ]),
        ]);

        for bits in 0u8..16 {
            let (a, b, c, d) = (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0);
            let payload = json!({"a": a, "b": b, "c": c, "d": d});
            assert_eq!(eval(&tree, payload), (a && b) || (c && d), "bits={:04b}", bits);
        }
    }

    #[test]
    fn test_empty_groups() {
        assert!(eval(&ConditionNode::and(vec![]), json!({})));
        assert!(!eval(&ConditionNode::or(vec![]), json!({})));
    }

    #[test]
    fn test_tree_from_json() {
        let tree: ConditionNode = serde_json::from_value(json!({
            "operator": "OR",
            "conditions": [
                {"field": "total", "operator": "greater_than", "value": 1000},
                {"operator": "and", "conditions": [
                    {"field": "customer.vip", "operator": "equals", "value": true},
                    {"field": "coupon", "operator": "is_null"}
                ]}
            ]
        }))
        .unwrap();

        assert!(eval(&tree, json!({"total": 5, "customer": {"vip": true}})));
        assert!(!eval(&tree, json!({"total": 5, "customer": {"vip": true}, "coupon": "X"})));
    }

    #[test]
    fn test_validate_reports_problems() {
        let tree = ConditionNode::and(vec![
            Condition::new("total", "between", json!([1, 2])).into(),
            Condition::new("status", "in", json!("PENDING")).into(),
            Condition::equals("status", json!("PENDING")).into(),
        ]);

        let problems = ConditionEvaluator::new().validate(&tree);
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("between"));
        assert!(problems[1].contains("requires a list"));
    }
}
