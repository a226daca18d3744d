// In-memory configuration record
//
// The single piece of durable state this system owns: which rulesets are
// enabled and which application version produced the rules currently
// installed in the engine.

use serde::{Deserialize, Serialize};

/// Enabled rulesets plus the version that compiled them.
///
/// An empty `version` means nothing has been persisted yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetConfig {
    pub version: String,
    pub enabled_rulesets: Vec<String>,
}

impl RulesetConfig {
    pub fn new(version: impl Into<String>, enabled_rulesets: Vec<String>) -> Self {
        Self {
            version: version.into(),
            enabled_rulesets,
        }
    }

    /// First-run record: the given defaults, never persisted.
    pub fn first_run(defaults: Vec<String>) -> Self {
        Self::new(String::new(), defaults)
    }

    /// Exact string comparison; versions carry no ordering.
    pub fn matches_version(&self, running_version: &str) -> bool {
        self.version == running_version
    }
}
