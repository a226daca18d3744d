// Dynamic rule model
//
// Mirrors the JSON shape the host rule engine accepts for rules added at
// runtime. This crate only ever writes one of them: the configuration cell
// stored under the reserved CONFIG_RULE_ID.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// ============================================================================
// Rule identity
// ============================================================================

/// Identifier of a dynamic rule in the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(u32);

/// Id of the rule that holds the persisted ruleset configuration.
///
/// Generated rules must never use it; see [`RuleId::claim`].
pub const CONFIG_RULE_ID: RuleId = RuleId(1);

impl RuleId {
    pub const fn new(id: u32) -> Self {
        RuleId(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// True for ids set aside for this crate's own bookkeeping rules.
    pub fn is_reserved(&self) -> bool {
        *self == CONFIG_RULE_ID
    }

    /// Validates an id a rule generator wants to use.
    pub fn claim(id: u32) -> Result<Self, StoreError> {
        let id = RuleId(id);
        if id.is_reserved() {
            return Err(StoreError::ReservedRuleId(id));
        }
        Ok(id)
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Rule body
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleActionType {
    Allow,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: RuleActionType,
}

/// Matching condition. Only the fields this system reads or writes are modelled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_filter: Option<String>,
}

fn default_priority() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRule {
    pub id: RuleId,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

impl DynamicRule {
    /// Builds the configuration cell carrying `url_filter`.
    pub fn config_cell(url_filter: impl Into<String>) -> Self {
        Self {
            id: CONFIG_RULE_ID,
            priority: default_priority(),
            action: RuleAction {
                action_type: RuleActionType::Allow,
            },
            condition: RuleCondition {
                url_filter: Some(url_filter.into()),
                regex_filter: None,
            },
        }
    }

    /// Builds a blocking regex rule, as produced by a ruleset compiler.
    pub fn regex_block(id: RuleId, pattern: impl Into<String>) -> Self {
        Self {
            id,
            priority: default_priority(),
            action: RuleAction {
                action_type: RuleActionType::Block,
            },
            condition: RuleCondition {
                url_filter: None,
                regex_filter: Some(pattern.into()),
            },
        }
    }

    pub fn url_filter(&self) -> Option<&str> {
        self.condition.url_filter.as_deref()
    }
}

/// One batched change to the engine's dynamic rules.
///
/// Removals are applied before additions, so removing and re-adding the same
/// id within one update replaces the rule in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRuleUpdate {
    #[serde(default)]
    pub add_rules: Vec<DynamicRule>,
    #[serde(default)]
    pub remove_rule_ids: Vec<RuleId>,
}

impl DynamicRuleUpdate {
    /// Remove-then-add of a single rule.
    pub fn replace(rule: DynamicRule) -> Self {
        Self {
            remove_rule_ids: vec![rule.id],
            add_rules: vec![rule],
        }
    }
}
