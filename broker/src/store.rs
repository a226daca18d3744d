//! Persisted config store: the configuration record's durable home is one
//! dynamic rule in the host engine, under the reserved config id.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use parking_lot::RwLock;
use ruleset_store::{
    ConfigCodec, DynamicRule, DynamicRuleUpdate, RuleId, RulesetConfig, StoreError,
    CONFIG_RULE_ID,
};

use crate::error::BrokerError;
use crate::host::RuleEngine;

/// Process-wide configuration record, owned by the lifecycle and lent to the
/// dispatcher. Never hold the lock across an `.await`.
pub type SharedConfig = Arc<RwLock<RulesetConfig>>;

pub struct ConfigStore {
    engine: Arc<dyn RuleEngine>,
    codec: ConfigCodec,
}

impl ConfigStore {
    pub fn new(engine: Arc<dyn RuleEngine>, codec: ConfigCodec) -> Self {
        Self { engine, codec }
    }

    /// All dynamic rules currently installed, keyed by id.
    pub async fn read_all(&self) -> Result<HashMap<RuleId, DynamicRule>, BrokerError> {
        let rules = self.engine.dynamic_rules().await?;
        Ok(rules.into_iter().map(|rule| (rule.id, rule)).collect())
    }

    /// Replaces the config cell in a single engine update.
    pub async fn upsert(&self, rule: DynamicRule) -> Result<(), BrokerError> {
        if rule.id != CONFIG_RULE_ID {
            return Err(StoreError::UnreservedRuleId(rule.id).into());
        }
        self.engine
            .update_dynamic_rules(DynamicRuleUpdate::replace(rule))
            .await?;
        Ok(())
    }

    /// Reads back the persisted record. Missing and undecodable cells both
    /// come back as `None`.
    pub async fn load(&self) -> Result<Option<RulesetConfig>, BrokerError> {
        let rules = self.read_all().await?;
        let Some(cell) = rules.get(&CONFIG_RULE_ID) else {
            return Ok(None);
        };
        let decoded = cell.url_filter().and_then(|filter| self.codec.decode(filter));
        if decoded.is_none() {
            warn!(
                "Ignoring undecodable config rule {:?}",
                cell.url_filter().unwrap_or_default()
            );
        }
        Ok(decoded)
    }

    /// Persists the current contents of `config`. Returns `false` when the
    /// stored cell already holds the same encoding and no write was issued.
    ///
    /// The record is read only after the engine read completes, so changes
    /// made by other tasks while this one was suspended are not overwritten
    /// with an older copy.
    pub async fn save(&self, config: &SharedConfig) -> Result<bool, BrokerError> {
        let mut rules = self.read_all().await?;
        let url_filter = self.codec.encode(&config.read());

        let mut cell = match rules.remove(&CONFIG_RULE_ID) {
            Some(cell) if cell.url_filter() == Some(url_filter.as_str()) => return Ok(false),
            Some(cell) => cell,
            None => DynamicRule::config_cell(String::new()),
        };
        cell.condition.url_filter = Some(url_filter);

        self.upsert(cell).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRuleEngine;

    fn store() -> (Arc<InMemoryRuleEngine>, ConfigStore) {
        let engine = Arc::new(InMemoryRuleEngine::new(100));
        let store = ConfigStore::new(engine.clone(), ConfigCodec::default());
        (engine, store)
    }

    fn shared(config: RulesetConfig) -> SharedConfig {
        Arc::new(RwLock::new(config))
    }

    #[tokio::test]
    async fn test_load_without_cell_is_none() {
        let (_, store) = store();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let (engine, store) = store();
        let config = RulesetConfig::new("1.0", vec!["A".to_string(), "B".to_string()]);

        assert!(store.save(&shared(config.clone())).await.unwrap());
        assert_eq!(
            engine.dynamic_rule(CONFIG_RULE_ID).unwrap().url_filter(),
            Some("||example.invalid/1.0/A%20B/")
        );
        assert_eq!(store.load().await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn test_identical_save_is_skipped() {
        let (engine, store) = store();
        let config = shared(RulesetConfig::new("1.0", vec!["A".to_string()]));

        assert!(store.save(&config).await.unwrap());
        assert!(!store.save(&config).await.unwrap());
        assert_eq!(engine.dynamic_write_count(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_cell_loads_as_none() {
        let (engine, store) = store();
        engine.insert_dynamic_rule(DynamicRule::config_cell("||ads.example.com^"));
        assert_eq!(store.load().await.unwrap(), None);

        let mut bare = DynamicRule::config_cell("");
        bare.condition.url_filter = None;
        engine.insert_dynamic_rule(bare);
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_only_accepts_config_cell() {
        let (engine, store) = store();
        let result = store
            .upsert(DynamicRule::regex_block(RuleId::new(5), "^x"))
            .await;
        assert!(matches!(
            result,
            Err(BrokerError::Store(StoreError::UnreservedRuleId(_)))
        ));
        assert_eq!(engine.dynamic_write_count(), 0);
    }

    #[tokio::test]
    async fn test_save_preserves_other_rules() {
        let (engine, store) = store();
        engine.insert_dynamic_rule(DynamicRule::regex_block(RuleId::new(1000), "^x"));
        store
            .save(&shared(RulesetConfig::new("1.0", vec![])))
            .await
            .unwrap();
        assert_eq!(store.read_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_failure_is_reported() {
        let (engine, store) = store();
        engine.set_fail_writes(true);
        let result = store
            .save(&shared(RulesetConfig::new("1.0", vec![])))
            .await;
        assert!(matches!(result, Err(BrokerError::Host(_))));
    }
}
