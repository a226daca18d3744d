//! In-memory host facilities.
//!
//! Used by the `broker-server` binary and by tests. Each facility keeps call
//! counters so callers can observe what the broker asked of the host.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use ruleset_store::{DynamicRule, DynamicRuleUpdate, RuleId};
use tokio::sync::broadcast;

use crate::error::HostError;
use crate::host::{
    ActionOptions, HostFacilities, HostResult, InjectableRegistrar, PermissionChange,
    PermissionHost, RuleEngine, RulesetDetails, RulesetManager, TrustedSiteRequest, TrustedSites,
};
use crate::permissions::{hostname_of, OriginPattern};

/// First id handed out to generated regex rules.
pub const FIRST_REGEX_RULE_ID: u32 = 1000;

/// Static rule budget reported by [`InMemoryHost::new`]'s engine.
pub const DEFAULT_STATIC_RULE_BUDGET: u32 = 30_000;

const PERMISSION_EVENT_CAPACITY: usize = 64;

// ================================================================================================
// RULE ENGINE
// ================================================================================================

pub struct InMemoryRuleEngine {
    static_rule_budget: u32,
    enabled: RwLock<Vec<String>>,
    dynamic: Mutex<BTreeMap<RuleId, DynamicRule>>,
    action_options: Mutex<Option<ActionOptions>>,
    dynamic_writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl InMemoryRuleEngine {
    pub fn new(static_rule_budget: u32) -> Self {
        Self {
            static_rule_budget,
            enabled: RwLock::new(Vec::new()),
            dynamic: Mutex::new(BTreeMap::new()),
            action_options: Mutex::new(None),
            dynamic_writes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_enabled_rulesets(&self, ids: Vec<String>) {
        *self.enabled.write() = ids;
    }

    /// Seeds a rule without counting it as a write.
    pub fn insert_dynamic_rule(&self, rule: DynamicRule) {
        self.dynamic.lock().insert(rule.id, rule);
    }

    pub fn dynamic_rule(&self, id: RuleId) -> Option<DynamicRule> {
        self.dynamic.lock().get(&id).cloned()
    }

    /// Number of successful `update_dynamic_rules` calls.
    pub fn dynamic_write_count(&self) -> usize {
        self.dynamic_writes.load(Ordering::SeqCst)
    }

    pub fn action_options(&self) -> Option<ActionOptions> {
        *self.action_options.lock()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleEngine for InMemoryRuleEngine {
    async fn available_static_rule_count(&self) -> HostResult<u32> {
        Ok(self.static_rule_budget)
    }

    async fn enabled_rulesets(&self) -> HostResult<Vec<String>> {
        Ok(self.enabled.read().clone())
    }

    async fn dynamic_rules(&self) -> HostResult<Vec<DynamicRule>> {
        Ok(self.dynamic.lock().values().cloned().collect())
    }

    async fn update_dynamic_rules(&self, update: DynamicRuleUpdate) -> HostResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("dynamic rule storage".to_string()));
        }

        // Stage on a copy so a rejected update leaves nothing behind.
        let mut rules = self.dynamic.lock();
        let mut staged = rules.clone();
        for id in &update.remove_rule_ids {
            staged.remove(id);
        }
        for rule in update.add_rules {
            let id = rule.id;
            if staged.insert(id, rule).is_some() {
                return Err(HostError::Rejected(format!("Duplicate rule id {}", id)));
            }
        }
        *rules = staged;
        self.dynamic_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_action_options(&self, options: ActionOptions) -> HostResult<()> {
        *self.action_options.lock() = Some(options);
        Ok(())
    }
}

// ================================================================================================
// PERMISSIONS
// ================================================================================================

pub struct InMemoryPermissionHost {
    granted: Mutex<HashSet<OriginPattern>>,
    declined: Mutex<HashSet<OriginPattern>>,
    events: broadcast::Sender<PermissionChange>,
}

impl InMemoryPermissionHost {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(PERMISSION_EVENT_CAPACITY);
        Self {
            granted: Mutex::new(HashSet::new()),
            declined: Mutex::new(HashSet::new()),
            events,
        }
    }

    /// Future requests for `origin` are refused, as if the user said no.
    pub fn decline(&self, origin: &str) {
        if let Some(pattern) = OriginPattern::for_origin(origin) {
            self.declined.lock().insert(pattern);
        }
    }

    /// Grants from outside the broker (browser settings, policy).
    pub fn grant_externally(&self, origin: &str) {
        if let Some(pattern) = OriginPattern::for_origin(origin) {
            if self.granted.lock().insert(pattern.clone()) {
                self.notify(PermissionChange::Added(vec![pattern]));
            }
        }
    }

    /// Revokes from outside the broker.
    pub fn revoke_externally(&self, origin: &str) {
        if let Some(pattern) = OriginPattern::for_origin(origin) {
            if self.granted.lock().remove(&pattern) {
                self.notify(PermissionChange::Removed(vec![pattern]));
            }
        }
    }

    fn notify(&self, change: PermissionChange) {
        // No subscribers is fine.
        let _ = self.events.send(change);
    }
}

impl Default for InMemoryPermissionHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionHost for InMemoryPermissionHost {
    async fn contains(&self, pattern: &OriginPattern) -> HostResult<bool> {
        Ok(self.granted.lock().contains(pattern))
    }

    async fn request(&self, pattern: &OriginPattern) -> HostResult<bool> {
        if self.declined.lock().contains(pattern) {
            return Ok(false);
        }
        let added = self.granted.lock().insert(pattern.clone());
        if added {
            self.notify(PermissionChange::Added(vec![pattern.clone()]));
        }
        Ok(true)
    }

    async fn remove(&self, pattern: &OriginPattern) -> HostResult<bool> {
        let removed = self.granted.lock().remove(pattern);
        if removed {
            self.notify(PermissionChange::Removed(vec![pattern.clone()]));
        }
        Ok(removed)
    }

    fn subscribe(&self) -> broadcast::Receiver<PermissionChange> {
        self.events.subscribe()
    }
}

// ================================================================================================
// RULESET MANAGER
// ================================================================================================

pub struct InMemoryRulesetManager {
    engine: Arc<InMemoryRuleEngine>,
    catalogue: Vec<RulesetDetails>,
    language: String,
    regex_filters: HashMap<String, Vec<String>>,
    regex_updates: AtomicUsize,
    fail_regex_updates: AtomicBool,
}

impl InMemoryRulesetManager {
    pub fn new(
        engine: Arc<InMemoryRuleEngine>,
        catalogue: Vec<RulesetDetails>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            catalogue,
            language: language.into(),
            regex_filters: HashMap::new(),
            regex_updates: AtomicUsize::new(0),
            fail_regex_updates: AtomicBool::new(false),
        }
    }

    /// Regex filters compiled into `ruleset`; installed as dynamic rules by
    /// `update_regex_rules` while the ruleset is enabled.
    pub fn with_regex_filters(mut self, ruleset: &str, filters: &[&str]) -> Self {
        self.regex_filters.insert(
            ruleset.to_string(),
            filters.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    pub fn regex_update_count(&self) -> usize {
        self.regex_updates.load(Ordering::SeqCst)
    }

    pub fn set_fail_regex_updates(&self, fail: bool) {
        self.fail_regex_updates.store(fail, Ordering::SeqCst);
    }

    fn details(&self, id: &str) -> Option<&RulesetDetails> {
        self.catalogue.iter().find(|details| details.id == id)
    }
}

#[async_trait]
impl RulesetManager for InMemoryRulesetManager {
    async fn ruleset_details(&self) -> HostResult<Vec<RulesetDetails>> {
        Ok(self.catalogue.clone())
    }

    async fn enable_rulesets(&self, ids: &[String]) -> HostResult<()> {
        if let Some(unknown) = ids.iter().find(|id| self.details(id).is_none()) {
            return Err(HostError::UnknownRuleset(unknown.clone()));
        }
        self.engine.set_enabled_rulesets(ids.to_vec());
        Ok(())
    }

    async fn default_rulesets_from_language(&self) -> HostResult<Vec<String>> {
        let language = self.language.as_str();
        Ok(self
            .catalogue
            .iter()
            .filter(|details| {
                details.enabled
                    || details
                        .lang
                        .as_deref()
                        .map_or(false, |langs| langs.split(' ').any(|lang| lang == language))
            })
            .map(|details| details.id.clone())
            .collect())
    }

    async fn enabled_rulesets_stats(&self) -> HostResult<Vec<RulesetDetails>> {
        let enabled = self.engine.enabled_rulesets().await?;
        Ok(enabled
            .iter()
            .filter_map(|id| self.details(id).cloned())
            .collect())
    }

    async fn update_regex_rules(&self) -> HostResult<()> {
        if self.fail_regex_updates.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("regex rule compiler".to_string()));
        }

        let stale: Vec<RuleId> = self
            .engine
            .dynamic_rules()
            .await?
            .into_iter()
            .filter(|rule| !rule.id.is_reserved() && rule.condition.regex_filter.is_some())
            .map(|rule| rule.id)
            .collect();

        let mut add_rules = Vec::new();
        let mut next_id = FIRST_REGEX_RULE_ID;
        for ruleset in self.engine.enabled_rulesets().await? {
            for filter in self.regex_filters.get(&ruleset).into_iter().flatten() {
                let id = RuleId::claim(next_id)
                    .map_err(|e| HostError::Rejected(e.to_string()))?;
                add_rules.push(DynamicRule::regex_block(id, filter.clone()));
                next_id += 1;
            }
        }

        self.engine
            .update_dynamic_rules(DynamicRuleUpdate {
                add_rules,
                remove_rule_ids: stale,
            })
            .await?;
        self.regex_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ================================================================================================
// INJECTABLES
// ================================================================================================

#[derive(Default)]
pub struct InMemoryInjectables {
    counts: Mutex<HashMap<String, usize>>,
    registrations: AtomicUsize,
}

impl InMemoryInjectables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_count(&self, hostname: &str, count: usize) {
        self.counts.lock().insert(hostname.to_string(), count);
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InjectableRegistrar for InMemoryInjectables {
    async fn injectable_count(&self, origin: &str) -> HostResult<usize> {
        Ok(self
            .counts
            .lock()
            .get(hostname_of(origin))
            .copied()
            .unwrap_or(0))
    }

    async fn register_injectables(&self) -> HostResult<()> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ================================================================================================
// TRUSTED SITES
// ================================================================================================

#[derive(Default)]
pub struct InMemoryTrustedSites {
    trusted: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
}

impl InMemoryTrustedSites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> HostResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("trusted-site directives".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TrustedSites for InMemoryTrustedSites {
    async fn matches_trusted_site_directive(
        &self,
        request: &TrustedSiteRequest,
    ) -> HostResult<bool> {
        self.check_available()?;
        Ok(self.trusted.lock().contains(hostname_of(&request.origin)))
    }

    async fn toggle_trusted_site_directive(
        &self,
        request: &TrustedSiteRequest,
    ) -> HostResult<bool> {
        self.check_available()?;
        let hostname = hostname_of(&request.origin);
        if hostname.is_empty() {
            return Err(HostError::Rejected(
                "Trusted-site directive without a host".to_string(),
            ));
        }
        let mut trusted = self.trusted.lock();
        if request.state {
            trusted.insert(hostname.to_string());
        } else {
            trusted.remove(hostname);
        }
        Ok(trusted.contains(hostname))
    }
}

// ================================================================================================
// BUNDLE
// ================================================================================================

/// All in-memory facilities, with concrete handles kept for inspection.
pub struct InMemoryHost {
    pub rule_engine: Arc<InMemoryRuleEngine>,
    pub permissions: Arc<InMemoryPermissionHost>,
    pub rulesets: Arc<InMemoryRulesetManager>,
    pub injectables: Arc<InMemoryInjectables>,
    pub trusted_sites: Arc<InMemoryTrustedSites>,
}

impl InMemoryHost {
    pub fn new(catalogue: Vec<RulesetDetails>, language: &str) -> Self {
        let rule_engine = Arc::new(InMemoryRuleEngine::new(DEFAULT_STATIC_RULE_BUDGET));
        let rulesets = InMemoryRulesetManager::new(Arc::clone(&rule_engine), catalogue, language);
        Self::with_rulesets(rule_engine, rulesets)
    }

    /// Builds around a preconfigured ruleset manager sharing `rule_engine`.
    pub fn with_rulesets(
        rule_engine: Arc<InMemoryRuleEngine>,
        rulesets: InMemoryRulesetManager,
    ) -> Self {
        Self {
            rule_engine,
            permissions: Arc::new(InMemoryPermissionHost::new()),
            rulesets: Arc::new(rulesets),
            injectables: Arc::new(InMemoryInjectables::new()),
            trusted_sites: Arc::new(InMemoryTrustedSites::new()),
        }
    }

    pub fn facilities(&self) -> HostFacilities {
        HostFacilities {
            rule_engine: self.rule_engine.clone(),
            permissions: self.permissions.clone(),
            rulesets: self.rulesets.clone(),
            injectables: self.injectables.clone(),
            trusted_sites: self.trusted_sites.clone(),
        }
    }
}
