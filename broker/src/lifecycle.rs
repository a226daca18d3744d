//! Startup sequencing and runtime event subscriptions.

use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;
use ruleset_store::{ConfigCodec, RulesetConfig};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::BrokerConfig;
use crate::dispatcher::Dispatcher;
use crate::host::{ActionOptions, HostFacilities};
use crate::migration::VersionMigrator;
use crate::store::{ConfigStore, SharedConfig};

/// Owns the configuration record and brings the service up.
pub struct Broker {
    host: HostFacilities,
    settings: BrokerConfig,
    store: Arc<ConfigStore>,
    config: SharedConfig,
}

/// Handles to a started broker.
pub struct Running {
    pub dispatcher: Arc<Dispatcher>,
    pub config: SharedConfig,
    /// Background version migration, if one was needed.
    pub migration: Option<JoinHandle<()>>,
    pub permission_watch: JoinHandle<()>,
}

impl Running {
    pub fn ruleset_config(&self) -> RulesetConfig {
        self.config.read().clone()
    }

    pub fn shutdown(self) {
        self.permission_watch.abort();
    }
}

impl Broker {
    pub fn new(host: HostFacilities, settings: BrokerConfig) -> Self {
        let codec = ConfigCodec::new(settings.config_authority.clone());
        let store = Arc::new(ConfigStore::new(Arc::clone(&host.rule_engine), codec));
        Self {
            host,
            settings,
            store,
            config: Arc::new(RwLock::new(RulesetConfig::default())),
        }
    }

    pub fn ruleset_config(&self) -> RulesetConfig {
        self.config.read().clone()
    }

    /// Loads the persisted record into memory, falling back to the
    /// language-derived defaults with an empty version.
    pub async fn load_ruleset_config(&self) -> RulesetConfig {
        let persisted = match self.store.load().await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Failed to read persisted ruleset config: {}", e);
                None
            }
        };

        let loaded = match persisted {
            Some(config) => config,
            None => {
                let defaults = match self.host.rulesets.default_rulesets_from_language().await {
                    Ok(defaults) => defaults,
                    Err(e) => {
                        warn!("Failed to compute default rulesets: {}", e);
                        Vec::new()
                    }
                };
                RulesetConfig::first_run(defaults)
            }
        };

        *self.config.write() = loaded.clone();
        loaded
    }

    /// Brings the service up. No step is fatal: failures are logged and
    /// startup carries on.
    pub async fn start(self) -> Running {
        let config = self.load_ruleset_config().await;

        if let Err(e) = self
            .host
            .rulesets
            .enable_rulesets(&config.enabled_rulesets)
            .await
        {
            warn!("Failed to enable rulesets {:?}: {}", config.enabled_rulesets, e);
        }

        let migration = VersionMigrator::new(
            Arc::clone(&self.host.rulesets),
            Arc::clone(&self.store),
            Arc::clone(&self.config),
            self.settings.app_version.clone(),
        )
        .spawn();

        // Registrations are not trusted to survive a restart.
        if let Err(e) = self.host.injectables.register_injectables().await {
            warn!("Failed to register injectables: {}", e);
        }

        match self.host.rule_engine.enabled_rulesets().await {
            Ok(enabled) => info!("Enabled rulesets: {}", enabled.join(",")),
            Err(e) => warn!("Failed to read enabled rulesets: {}", e),
        }
        match self.host.rule_engine.available_static_rule_count().await {
            Ok(count) => info!("Available static rule count: {}", count),
            Err(e) => warn!("Failed to read available static rule count: {}", e),
        }

        let options = ActionOptions {
            display_action_count_as_badge_text: self.settings.display_count_as_badge,
        };
        if let Err(e) = self.host.rule_engine.set_action_options(options).await {
            warn!("Failed to set action options: {}", e);
        }

        let dispatcher = Arc::new(Dispatcher::new(
            self.host.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.config),
        ));
        let permission_watch = watch_permission_changes(self.host.clone());

        Running {
            dispatcher,
            config: self.config,
            migration,
            permission_watch,
        }
    }
}

/// Re-registers injectables on every permission change, since elevation
/// affects which pages they may run on.
fn watch_permission_changes(host: HostFacilities) -> JoinHandle<()> {
    let mut changes = host.permissions.subscribe();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => debug!("Permissions changed: {:?}", change),
                Err(RecvError::Lagged(missed)) => {
                    debug!("Missed {} permission notifications", missed)
                }
                Err(RecvError::Closed) => break,
            }
            if let Err(e) = host.injectables.register_injectables().await {
                warn!("Failed to register injectables: {}", e);
            }
        }
    })
}
