//! `broker-server`: runs the broker against the in-memory host and serves the
//! JSON-lines message channel on stdin/stdout.

use std::sync::Arc;

use broker::channel::serve_lines;
use broker::{Broker, BrokerConfig, InMemoryHost, RulesetDetails};
use log::info;
use tokio::io::{self, BufReader};
use tracing_subscriber::EnvFilter;

fn demo_catalogue() -> Vec<RulesetDetails> {
    let ruleset = |id: &str, name: &str, lang: Option<&str>, enabled: bool, rules: usize| {
        RulesetDetails {
            id: id.to_string(),
            name: name.to_string(),
            lang: lang.map(str::to_string),
            enabled,
            filter_count: rules + rules / 10,
            rule_count: rules,
        }
    };
    vec![
        ruleset("default", "Ads, trackers, miners, and more", None, true, 21_500),
        ruleset("annoyances", "Annoyances", None, false, 8_200),
        ruleset("deu-0", "DEU: EasyList Germany", Some("de dk li"), false, 2_900),
        ruleset("fra-0", "FRA: AdGuard Français", Some("fr oc"), false, 3_400),
        ruleset("jpn-1", "JPN: AdGuard Japanese", Some("ja"), false, 1_800),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = BrokerConfig::from_env();
    info!(
        "Starting broker {} (config authority {})",
        settings.app_version, settings.config_authority
    );

    let host = InMemoryHost::new(demo_catalogue(), &settings.language);
    let mut running = Broker::new(host.facilities(), settings).start().await;

    serve_lines(
        Arc::clone(&running.dispatcher),
        BufReader::new(io::stdin()),
        io::stdout(),
    )
    .await?;

    if let Some(migration) = running.migration.take() {
        let _ = migration.await;
    }
    running.shutdown();
    Ok(())
}
