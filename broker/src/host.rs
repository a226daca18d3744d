//! # Host Facilities
//!
//! Async interfaces to everything this crate does not own: the rule engine,
//! the permission store, the ruleset manager, the injectable registrar and the
//! trusted-site directive store. All calls may suspend; none are retried here.

use std::sync::Arc;

use async_trait::async_trait;
use ruleset_store::{DynamicRule, DynamicRuleUpdate};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::HostError;
use crate::permissions::OriginPattern;

pub type HostResult<T> = Result<T, HostError>;

// ================================================================================================
// SHARED DATA TYPES
// ================================================================================================

/// Catalogue entry for one ruleset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetDetails {
    pub id: String,
    pub name: String,
    /// Space-separated language codes this ruleset targets, if any.
    #[serde(default)]
    pub lang: Option<String>,
    /// Enabled on first run regardless of language.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub filter_count: usize,
    #[serde(default)]
    pub rule_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOptions {
    pub display_action_count_as_badge_text: bool,
}

/// Notification emitted by the permission host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionChange {
    Added(Vec<OriginPattern>),
    Removed(Vec<OriginPattern>),
}

/// Payload understood by the trusted-site directive store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedSiteRequest {
    pub origin: String,
    /// Requested directive state when toggling.
    #[serde(default)]
    pub state: bool,
}

// ================================================================================================
// FACILITY TRAITS
// ================================================================================================

#[async_trait]
pub trait RuleEngine: Send + Sync {
    async fn available_static_rule_count(&self) -> HostResult<u32>;

    async fn enabled_rulesets(&self) -> HostResult<Vec<String>>;

    async fn dynamic_rules(&self) -> HostResult<Vec<DynamicRule>>;

    /// Applies removals then additions as one transaction.
    async fn update_dynamic_rules(&self, update: DynamicRuleUpdate) -> HostResult<()>;

    async fn set_action_options(&self, options: ActionOptions) -> HostResult<()>;
}

#[async_trait]
pub trait PermissionHost: Send + Sync {
    async fn contains(&self, pattern: &OriginPattern) -> HostResult<bool>;

    /// Asks for the permission. `Ok(false)` means the user or policy declined.
    async fn request(&self, pattern: &OriginPattern) -> HostResult<bool>;

    /// `Ok(false)` when nothing was granted for `pattern`.
    async fn remove(&self, pattern: &OriginPattern) -> HostResult<bool>;

    fn subscribe(&self) -> broadcast::Receiver<PermissionChange>;
}

#[async_trait]
pub trait RulesetManager: Send + Sync {
    async fn ruleset_details(&self) -> HostResult<Vec<RulesetDetails>>;

    /// Makes `ids` the exact set of enabled rulesets.
    async fn enable_rulesets(&self, ids: &[String]) -> HostResult<()>;

    async fn default_rulesets_from_language(&self) -> HostResult<Vec<String>>;

    async fn enabled_rulesets_stats(&self) -> HostResult<Vec<RulesetDetails>>;

    /// Regenerates rules whose validity depends on the engine's regex support.
    async fn update_regex_rules(&self) -> HostResult<()>;
}

#[async_trait]
pub trait InjectableRegistrar: Send + Sync {
    async fn injectable_count(&self, origin: &str) -> HostResult<usize>;

    async fn register_injectables(&self) -> HostResult<()>;
}

#[async_trait]
pub trait TrustedSites: Send + Sync {
    async fn matches_trusted_site_directive(
        &self,
        request: &TrustedSiteRequest,
    ) -> HostResult<bool>;

    /// Returns the directive state after the toggle.
    async fn toggle_trusted_site_directive(
        &self,
        request: &TrustedSiteRequest,
    ) -> HostResult<bool>;
}

/// One handle to each host facility.
#[derive(Clone)]
pub struct HostFacilities {
    pub rule_engine: Arc<dyn RuleEngine>,
    pub permissions: Arc<dyn PermissionHost>,
    pub rulesets: Arc<dyn RulesetManager>,
    pub injectables: Arc<dyn InjectableRegistrar>,
    pub trusted_sites: Arc<dyn TrustedSites>,
}
