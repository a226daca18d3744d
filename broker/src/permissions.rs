//! Per-site elevation ("great powers") on top of the host permission store.
//!
//! Nothing is cached: every query goes back to the host, which is the only
//! owner of grant state.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::host::PermissionHost;

/// Host permission pattern `*://{host}/*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginPattern(String);

impl OriginPattern {
    /// Builds the pattern for an origin or bare hostname. Scheme, port and path
    /// are all wildcarded away, so `example.com` and `https://example.com/x`
    /// map to the same pattern. Returns `None` when no host can be extracted.
    pub fn for_origin(origin: &str) -> Option<Self> {
        let host = hostname_of(origin);
        if host.is_empty() || host.contains('*') {
            return None;
        }
        Some(OriginPattern(format!("*://{}/*", host)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OriginPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host part of an origin, URL or bare hostname. IPv6 literals keep their
/// brackets; an unterminated bracket yields `""`.
pub fn hostname_of(origin: &str) -> &str {
    let rest = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    let authority = rest
        .split(|c: char| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    if host.starts_with('[') {
        return host.find(']').map_or("", |end| &host[..=end]);
    }
    host.split(':').next().unwrap_or_default()
}

// ================================================================================================
// PERMISSION BROKER
// ================================================================================================

pub struct PermissionBroker {
    host: Arc<dyn PermissionHost>,
}

impl PermissionBroker {
    pub fn new(host: Arc<dyn PermissionHost>) -> Self {
        Self { host }
    }

    pub async fn has_elevated(&self, origin: &str) -> bool {
        let Some(pattern) = OriginPattern::for_origin(origin) else {
            return false;
        };
        match self.host.contains(&pattern).await {
            Ok(granted) => granted,
            Err(e) => {
                warn!("Permission lookup for {} failed: {}", pattern, e);
                false
            }
        }
    }

    /// Denial by the user or by policy is an ordinary `false`.
    pub async fn grant(&self, hostname: &str) -> bool {
        let granted = match OriginPattern::for_origin(hostname) {
            Some(pattern) => match self.host.request(&pattern).await {
                Ok(granted) => granted,
                Err(e) => {
                    warn!("Permission request for {} failed: {}", pattern, e);
                    false
                }
            },
            None => false,
        };
        info!("Granted great powers on {}: {}", hostname, granted);
        granted
    }

    pub async fn revoke(&self, hostname: &str) -> bool {
        let removed = match OriginPattern::for_origin(hostname) {
            Some(pattern) => match self.host.remove(&pattern).await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!("Permission removal for {} failed: {}", pattern, e);
                    false
                }
            },
            None => false,
        };
        info!("Revoked great powers from {}: {}", hostname, removed);
        removed
    }
}
