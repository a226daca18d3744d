#![allow(dead_code)]

use std::time::Duration;

use broker::{Broker, BrokerConfig, InMemoryHost, Reply, RulesetDetails, Running};
use ruleset_store::{DynamicRule, CONFIG_RULE_ID};
use serde_json::Value;

pub const RUNNING_VERSION: &str = "9.9.9";

pub fn catalogue() -> Vec<RulesetDetails> {
    let ruleset = |id: &str, lang: Option<&str>, enabled: bool| RulesetDetails {
        id: id.to_string(),
        name: format!("Ruleset {}", id),
        lang: lang.map(str::to_string),
        enabled,
        filter_count: 10,
        rule_count: 9,
    };
    vec![
        ruleset("default", None, true),
        ruleset("A", None, false),
        ruleset("B", None, false),
        ruleset("fra-0", Some("fr"), false),
    ]
}

pub fn host() -> InMemoryHost {
    InMemoryHost::new(catalogue(), "en")
}

pub fn settings(version: &str) -> BrokerConfig {
    BrokerConfig {
        app_version: version.to_string(),
        ..BrokerConfig::default()
    }
}

/// Stores a config cell as a previous run would have left it.
pub fn seed_config_cell(host: &InMemoryHost, url_filter: &str) {
    host.rule_engine
        .insert_dynamic_rule(DynamicRule::config_cell(url_filter));
}

pub fn stored_filter(host: &InMemoryHost) -> Option<String> {
    host.rule_engine
        .dynamic_rule(CONFIG_RULE_ID)
        .and_then(|rule| rule.url_filter().map(str::to_string))
}

/// Starts a broker and waits for any version migration to finish.
pub async fn start(host: &InMemoryHost, version: &str) -> Running {
    let mut running = Broker::new(host.facilities(), settings(version)).start().await;
    if let Some(migration) = running.migration.take() {
        migration.await.expect("migration task");
    }
    running
}

pub async fn request(running: &Running, message: Value) -> Reply {
    running
        .dispatcher
        .dispatch(message)
        .expect("message should be recognized")
        .await
        .expect("exactly one reply")
}

pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
