//! Version migration.
//!
//! Rules whose validity depends on the engine's regex support are regenerated
//! whenever the persisted version differs from the running one, first run
//! (persisted version `""`) included. No progress is recorded: an interrupted
//! migration is simply run again in full on the next start.

use std::sync::Arc;

use log::{error, info};
use tokio::task::JoinHandle;

use crate::error::BrokerError;
use crate::host::RulesetManager;
use crate::store::{ConfigStore, SharedConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    UpToDate,
    Migrating,
}

pub struct VersionMigrator {
    rulesets: Arc<dyn RulesetManager>,
    store: Arc<ConfigStore>,
    config: SharedConfig,
    running_version: String,
}

impl VersionMigrator {
    pub fn new(
        rulesets: Arc<dyn RulesetManager>,
        store: Arc<ConfigStore>,
        config: SharedConfig,
        running_version: impl Into<String>,
    ) -> Self {
        Self {
            rulesets,
            store,
            config,
            running_version: running_version.into(),
        }
    }

    pub fn state(&self) -> MigrationState {
        if self.config.read().matches_version(&self.running_version) {
            MigrationState::UpToDate
        } else {
            MigrationState::Migrating
        }
    }

    /// Regenerates regex rules and records the running version.
    ///
    /// Returns `Ok(false)` when already up to date. On failure the persisted
    /// version is left alone so the next start tries again.
    pub async fn migrate(&self) -> Result<bool, BrokerError> {
        let previous = self.config.read().version.clone();
        if previous == self.running_version {
            return Ok(false);
        }
        info!("Version change: {} => {}", previous, self.running_version);

        self.rulesets.update_regex_rules().await?;

        // Only the version field belongs to the migration.
        self.config.write().version = self.running_version.clone();
        self.store.save(&self.config).await?;
        Ok(true)
    }

    /// Runs [`VersionMigrator::migrate`] in the background when needed.
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if self.state() == MigrationState::UpToDate {
            return None;
        }
        Some(tokio::spawn(async move {
            if let Err(e) = self.migrate().await {
                error!("Version migration failed: {}", e);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ActionOptions, HostResult, RuleEngine, RulesetDetails};
    use crate::memory::{InMemoryRuleEngine, InMemoryRulesetManager};
    use async_trait::async_trait;
    use parking_lot::RwLock;
    use ruleset_store::{
        ConfigCodec, DynamicRule, DynamicRuleUpdate, RulesetConfig, CONFIG_RULE_ID,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    struct Fixture {
        engine: Arc<InMemoryRuleEngine>,
        rulesets: Arc<InMemoryRulesetManager>,
        store: Arc<ConfigStore>,
    }

    fn fixture() -> Fixture {
        let engine = Arc::new(InMemoryRuleEngine::new(100));
        let catalogue = vec![RulesetDetails {
            id: "default".to_string(),
            name: "Default".to_string(),
            lang: None,
            enabled: true,
            filter_count: 1,
            rule_count: 1,
        }];
        let rulesets = Arc::new(InMemoryRulesetManager::new(engine.clone(), catalogue, "en"));
        let store = Arc::new(ConfigStore::new(engine.clone(), ConfigCodec::default()));
        Fixture {
            engine,
            rulesets,
            store,
        }
    }

    fn migrator(fixture: &Fixture, config: SharedConfig, running: &str) -> VersionMigrator {
        VersionMigrator::new(
            fixture.rulesets.clone(),
            fixture.store.clone(),
            config,
            running,
        )
    }

    fn shared(version: &str) -> SharedConfig {
        Arc::new(RwLock::new(RulesetConfig::new(
            version,
            vec!["default".to_string()],
        )))
    }

    #[tokio::test]
    async fn test_same_version_is_up_to_date() {
        let fixture = fixture();
        let migrator = migrator(&fixture, shared("1.0"), "1.0");

        assert_eq!(migrator.state(), MigrationState::UpToDate);
        assert!(!migrator.migrate().await.unwrap());
        assert_eq!(fixture.rulesets.regex_update_count(), 0);
        assert_eq!(fixture.engine.dynamic_write_count(), 0);
        assert!(migrator.spawn().is_none());
    }

    #[tokio::test]
    async fn test_version_change_regenerates_once() {
        let fixture = fixture();
        let config = shared("1.0");
        let migrator = migrator(&fixture, config.clone(), "1.1");

        assert_eq!(migrator.state(), MigrationState::Migrating);
        migrator.spawn().unwrap().await.unwrap();

        assert_eq!(fixture.rulesets.regex_update_count(), 1);
        assert_eq!(config.read().version, "1.1");
        assert_eq!(fixture.store.load().await.unwrap().unwrap().version, "1.1");
    }

    #[tokio::test]
    async fn test_versions_compare_as_plain_strings() {
        let fixture = fixture();
        let migrator = migrator(&fixture, shared("1.10"), "1.1");
        assert_eq!(migrator.state(), MigrationState::Migrating);
    }

    #[tokio::test]
    async fn test_failed_regeneration_keeps_old_version() {
        let fixture = fixture();
        fixture.rulesets.set_fail_regex_updates(true);
        let config = shared("1.0");
        let migrator = migrator(&fixture, config.clone(), "1.1");

        assert!(migrator.migrate().await.is_err());
        assert_eq!(config.read().version, "1.0");
        assert_eq!(fixture.engine.dynamic_write_count(), 0);
    }

    #[tokio::test]
    async fn test_rerun_after_interruption_is_idempotent() {
        let fixture = fixture();
        let config = shared("1.0");
        migrator(&fixture, config.clone(), "1.1").migrate().await.unwrap();
        let writes = fixture.engine.dynamic_write_count();

        // Simulates a restart that lost the in-memory version update.
        config.write().version = "1.0".to_string();
        migrator(&fixture, config.clone(), "1.1").migrate().await.unwrap();

        assert_eq!(fixture.rulesets.regex_update_count(), 2);
        assert_eq!(config.read().version, "1.1");
        // Regeneration writes again; the config cell is already current.
        assert_eq!(fixture.engine.dynamic_write_count(), writes + 1);
    }

    /// Engine whose next `dynamic_rules` call waits until released.
    struct GatedEngine {
        inner: Arc<InMemoryRuleEngine>,
        armed: AtomicBool,
        parked: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RuleEngine for GatedEngine {
        async fn available_static_rule_count(&self) -> HostResult<u32> {
            self.inner.available_static_rule_count().await
        }

        async fn enabled_rulesets(&self) -> HostResult<Vec<String>> {
            self.inner.enabled_rulesets().await
        }

        async fn dynamic_rules(&self) -> HostResult<Vec<DynamicRule>> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.parked.notify_one();
                self.release.notified().await;
            }
            self.inner.dynamic_rules().await
        }

        async fn update_dynamic_rules(&self, update: DynamicRuleUpdate) -> HostResult<()> {
            self.inner.update_dynamic_rules(update).await
        }

        async fn set_action_options(&self, options: ActionOptions) -> HostResult<()> {
            self.inner.set_action_options(options).await
        }
    }

    #[tokio::test]
    async fn test_migration_keeps_rulesets_applied_while_saving() {
        let fixture = fixture();
        let gated = Arc::new(GatedEngine {
            inner: fixture.engine.clone(),
            armed: AtomicBool::new(true),
            parked: Notify::new(),
            release: Notify::new(),
        });
        let store = Arc::new(ConfigStore::new(gated.clone(), ConfigCodec::default()));
        let config = shared("1.0");
        let migrator =
            VersionMigrator::new(fixture.rulesets.clone(), store.clone(), config.clone(), "1.1");

        let migration = tokio::spawn(async move { migrator.migrate().await });
        gated.parked.notified().await;

        // A new ruleset choice is applied while the migration waits on the engine.
        config.write().enabled_rulesets = vec!["A".to_string()];
        assert!(store.save(&config).await.unwrap());

        gated.release.notify_one();
        assert!(migration.await.unwrap().unwrap());

        assert_eq!(
            fixture.engine.dynamic_rule(CONFIG_RULE_ID).unwrap().url_filter(),
            Some("||example.invalid/1.1/A/")
        );
        assert_eq!(
            *config.read(),
            RulesetConfig::new("1.1", vec!["A".to_string()])
        );
    }
}
