//! Broker configuration: compiled-in defaults with environment overrides.

use ruleset_store::DEFAULT_AUTHORITY;
use std::env;

/// Environment variable overriding [`BrokerConfig::app_version`].
pub const ENV_VERSION: &str = "RULESET_BROKER_VERSION";
/// Environment variable overriding [`BrokerConfig::config_authority`].
pub const ENV_AUTHORITY: &str = "RULESET_BROKER_AUTHORITY";
/// Environment variable overriding [`BrokerConfig::display_count_as_badge`].
pub const ENV_BADGE: &str = "RULESET_BROKER_BADGE";
/// Environment variable overriding [`BrokerConfig::language`].
pub const ENV_LANGUAGE: &str = "RULESET_BROKER_LANGUAGE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Version of the running application; compared verbatim against the
    /// persisted one to decide whether rules must be regenerated.
    pub app_version: String,
    /// Authority used in the configuration cell's URL filter.
    pub config_authority: String,
    /// Whether the host shows the per-tab blocked count as a badge.
    pub display_count_as_badge: bool,
    /// UI language used to pick default rulesets on first run.
    pub language: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            config_authority: DEFAULT_AUTHORITY.to_string(),
            display_count_as_badge: true,
            language: "en".to_string(),
        }
    }
}

impl BrokerConfig {
    /// Defaults, overridden by any `RULESET_BROKER_*` variables that are set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        // An empty version would look like a first run that was never migrated.
        if let Some(version) = lookup(ENV_VERSION).filter(|value| !value.is_empty()) {
            config.app_version = version;
        }
        if let Some(authority) = lookup(ENV_AUTHORITY).filter(|value| !value.is_empty()) {
            config.config_authority = authority;
        }
        if let Some(badge) = lookup(ENV_BADGE).and_then(|value| parse_bool(&value)) {
            config.display_count_as_badge = badge;
        }
        if let Some(language) = lookup(ENV_LANGUAGE).filter(|value| !value.is_empty()) {
            config.language = language;
        }
        config
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
