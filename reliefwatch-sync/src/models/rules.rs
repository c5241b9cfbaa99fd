use super::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

wire_enum! {
    pub enum RuleOperator {
        Equals => "EQUALS",
        GreaterThan => "GREATER_THAN",
        Contains => "CONTAINS",
        InArray => "IN_ARRAY",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    /// Dot-separated path into the item view (`severity`, `location.latitude`, `action`)
    pub field: String,
    pub operator: RuleOperator,
    pub value: Value,
}

/// Operator-defined priority adjustment
///
/// A rule matches when every condition matches; an empty condition list
/// always matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityRule {
    pub id: String,
    pub name: String,
    pub entity_type: EntityKind,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    pub priority_modifier: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}
