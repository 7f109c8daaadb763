//! Turn-scoped approval rules.
//!
//! A rule is a declarative predicate over tool input that auto-resolves
//! future or currently-pending approvals within one turn. Rules apply only
//! to the exact tool path they name; registration order breaks ties.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Decision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    Includes,
    NotIncludes,
}

/// What a caller submits; the registry assigns the id and turn scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub tool_path: String,
    /// Dot-path into the tool input, e.g. `owner` or `event.title`.
    pub field: String,
    pub operator: RuleOperator,
    pub value: String,
    pub decision: Decision,
}

/// A registered rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: u64,
    pub turn_id: String,
    pub tool_path: String,
    pub field: String,
    pub operator: RuleOperator,
    pub value: String,
    pub decision: Decision,
}

impl ApprovalRule {
    pub fn from_spec(id: u64, turn_id: &str, spec: RuleSpec) -> Self {
        Self {
            id,
            turn_id: turn_id.to_string(),
            tool_path: spec.tool_path,
            field: spec.field,
            operator: spec.operator,
            value: spec.value,
            decision: spec.decision,
        }
    }

    /// Whether this rule matches the given tool input.
    ///
    /// The field value is extracted by dot-path and coerced to a string;
    /// a missing field coerces to the empty string.
    pub fn matches(&self, input: &Value) -> bool {
        let field_value = get_by_dot_path(input, &self.field)
            .map(value_as_string)
            .unwrap_or_default();
        match self.operator {
            RuleOperator::Equals => field_value == self.value,
            RuleOperator::NotEquals => field_value != self.value,
            RuleOperator::Includes => field_value.contains(&self.value),
            RuleOperator::NotIncludes => !field_value.contains(&self.value),
        }
    }
}

/// Traverse a JSON value by a `.`-separated path of object keys.
pub fn get_by_dot_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
