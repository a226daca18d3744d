use thiserror::Error;

use crate::dynamic_rule::RuleId;

/// Errors raised while building rules for the dynamic rule store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Rule id {0} is reserved for configuration storage")]
    ReservedRuleId(RuleId),

    #[error("Rule id {0} is not the configuration cell")]
    UnreservedRuleId(RuleId),
}
