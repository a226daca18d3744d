//! # Ruleset Broker Library
//!
//! Keeps the enabled-ruleset configuration in sync with a host rule engine
//! that only offers rule storage, and brokers per-site permission elevation
//! for UI surfaces through a single request dispatcher.

// Core modules
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod memory;
pub mod migration;
pub mod permissions;
pub mod store;

// Re-export commonly used types
pub use config::BrokerConfig;
pub use dispatcher::{Dispatcher, PanelData, Reply, Request, RequestKind, RulesetData};
pub use error::{BrokerError, HostError};
pub use host::{HostFacilities, RulesetDetails, TrustedSiteRequest};
pub use lifecycle::{Broker, Running};
pub use memory::InMemoryHost;
pub use migration::{MigrationState, VersionMigrator};
pub use permissions::{OriginPattern, PermissionBroker};
pub use store::{ConfigStore, SharedConfig};
