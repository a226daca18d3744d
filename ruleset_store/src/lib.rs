pub mod codec;
pub mod dynamic_rule;
pub mod error;
pub mod ruleset_config;

pub use codec::{ConfigCodec, DEFAULT_AUTHORITY};

pub use dynamic_rule::{
    DynamicRule,            // Rule as stored by the host engine
    DynamicRuleUpdate,      // Batched remove-then-add change
    RuleAction,             // Rule action wrapper
    RuleActionType,         // Allow / block / ...
    RuleCondition,          // URL or regex condition
    RuleId,                 // Dynamic rule identifier
    CONFIG_RULE_ID,         // Reserved id of the configuration cell
};

pub use error::StoreError;

pub use ruleset_config::RulesetConfig;
