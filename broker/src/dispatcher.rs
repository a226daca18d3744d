//! # Request Dispatcher
//!
//! Single entry point for messages from UI surfaces. A message is a JSON
//! object tagged by its `what` field. Recognized requests run as independent
//! tokio tasks and always produce exactly one reply; several may be in flight
//! at once and may finish in any order.
//!
//! Messages with an unknown or missing tag are not ours: other listeners on
//! the same channel may answer them, so they get no reply and cause no
//! action.

use std::sync::Arc;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::host::{HostFacilities, HostResult, RulesetDetails, TrustedSiteRequest};
use crate::permissions::PermissionBroker;
use crate::store::{ConfigStore, SharedConfig};

// ================================================================================================
// REQUESTS & REPLIES
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    ApplyRulesets,
    GetRulesetData,
    GrantGreatPowers,
    RevokeGreatPowers,
    PopupPanelData,
    ToggleTrustedSiteDirective,
}

impl RequestKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "applyRulesets" => Some(RequestKind::ApplyRulesets),
            "getRulesetData" => Some(RequestKind::GetRulesetData),
            "grantGreatPowers" => Some(RequestKind::GrantGreatPowers),
            "revokeGreatPowers" => Some(RequestKind::RevokeGreatPowers),
            "popupPanelData" => Some(RequestKind::PopupPanelData),
            "toggleTrustedSiteDirective" => Some(RequestKind::ToggleTrustedSiteDirective),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            RequestKind::ApplyRulesets => "applyRulesets",
            RequestKind::GetRulesetData => "getRulesetData",
            RequestKind::GrantGreatPowers => "grantGreatPowers",
            RequestKind::RevokeGreatPowers => "revokeGreatPowers",
            RequestKind::PopupPanelData => "popupPanelData",
            RequestKind::ToggleTrustedSiteDirective => "toggleTrustedSiteDirective",
        }
    }

    /// Reply sent when the handler cannot produce a real one.
    pub fn default_reply(&self) -> Reply {
        match self {
            RequestKind::ApplyRulesets => Reply::Ack,
            RequestKind::GetRulesetData => Reply::RulesetData(RulesetData::default()),
            RequestKind::GrantGreatPowers => Reply::Granted(false),
            RequestKind::RevokeGreatPowers => Reply::Removed(false),
            RequestKind::PopupPanelData => Reply::PanelData(PanelData::default()),
            RequestKind::ToggleTrustedSiteDirective => Reply::TrustedSite(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "what", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    ApplyRulesets { enabled_rulesets: Vec<String> },
    GetRulesetData,
    GrantGreatPowers { hostname: String },
    RevokeGreatPowers { hostname: String },
    PopupPanelData(TrustedSiteRequest),
    ToggleTrustedSiteDirective(TrustedSiteRequest),
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::ApplyRulesets { .. } => RequestKind::ApplyRulesets,
            Request::GetRulesetData => RequestKind::GetRulesetData,
            Request::GrantGreatPowers { .. } => RequestKind::GrantGreatPowers,
            Request::RevokeGreatPowers { .. } => RequestKind::RevokeGreatPowers,
            Request::PopupPanelData(_) => RequestKind::PopupPanelData,
            Request::ToggleTrustedSiteDirective(_) => RequestKind::ToggleTrustedSiteDirective,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetData {
    pub enabled_rulesets: Vec<String>,
    pub ruleset_details: Vec<RulesetDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelData {
    pub is_trusted: bool,
    pub has_great_powers: bool,
    pub ruleset_details: Vec<RulesetDetails>,
    pub injectable_count: usize,
}

/// Reply payload; serializes to the bare value the caller expects
/// (`null` for an acknowledgement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Ack,
    RulesetData(RulesetData),
    Granted(bool),
    Removed(bool),
    PanelData(PanelData),
    TrustedSite(bool),
}

// ================================================================================================
// RESPONDER
// ================================================================================================

/// One-shot reply slot.
///
/// `respond` consumes it, so a second reply cannot be written. If it is
/// dropped unanswered (early return, error, panic in the handler task) the
/// request kind's default reply is sent instead.
pub struct Responder {
    kind: RequestKind,
    slot: Option<oneshot::Sender<Reply>>,
}

impl Responder {
    pub fn new(kind: RequestKind) -> (Self, oneshot::Receiver<Reply>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                kind,
                slot: Some(sender),
            },
            receiver,
        )
    }

    pub fn respond(mut self, reply: Reply) {
        if let Some(sender) = self.slot.take() {
            // The caller may have stopped listening.
            let _ = sender.send(reply);
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(sender) = self.slot.take() {
            warn!("{} finished without a reply, sending default", self.kind.tag());
            let _ = sender.send(self.kind.default_reply());
        }
    }
}

// ================================================================================================
// DISPATCHER
// ================================================================================================

pub struct Dispatcher {
    host: HostFacilities,
    store: Arc<ConfigStore>,
    config: SharedConfig,
    permissions: PermissionBroker,
}

impl Dispatcher {
    pub fn new(host: HostFacilities, store: Arc<ConfigStore>, config: SharedConfig) -> Self {
        let permissions = PermissionBroker::new(Arc::clone(&host.permissions));
        Self {
            host,
            store,
            config,
            permissions,
        }
    }

    /// Routes one message. Returns `None` when the message is not addressed
    /// to this dispatcher; otherwise the receiver yields exactly one reply.
    pub fn dispatch(self: &Arc<Self>, message: Value) -> Option<oneshot::Receiver<Reply>> {
        let kind = message
            .get("what")
            .and_then(Value::as_str)
            .and_then(RequestKind::from_tag)?;

        let (responder, receiver) = Responder::new(kind);
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            match serde_json::from_value::<Request>(message) {
                Ok(request) => {
                    debug!("Dispatching {}", kind.tag());
                    let reply = dispatcher.handle(request).await;
                    responder.respond(reply);
                }
                Err(e) => {
                    warn!("Malformed {} request: {}", kind.tag(), e);
                    responder.respond(kind.default_reply());
                }
            }
        });
        Some(receiver)
    }

    /// Runs one request to completion and returns its reply.
    pub async fn handle(&self, request: Request) -> Reply {
        match request {
            Request::ApplyRulesets { enabled_rulesets } => {
                self.apply_rulesets(enabled_rulesets).await
            }
            Request::GetRulesetData => self.ruleset_data().await,
            Request::GrantGreatPowers { hostname } => {
                Reply::Granted(self.permissions.grant(&hostname).await)
            }
            Request::RevokeGreatPowers { hostname } => {
                Reply::Removed(self.permissions.revoke(&hostname).await)
            }
            Request::PopupPanelData(request) => self.panel_data(&request).await,
            Request::ToggleTrustedSiteDirective(request) => {
                self.toggle_trusted_site(&request).await
            }
        }
    }

    async fn apply_rulesets(&self, enabled_rulesets: Vec<String>) -> Reply {
        if let Err(e) = self.host.rulesets.enable_rulesets(&enabled_rulesets).await {
            warn!("Failed to enable rulesets {:?}: {}", enabled_rulesets, e);
            return Reply::Ack;
        }

        self.config.write().enabled_rulesets = enabled_rulesets;

        let (saved, registered) = tokio::join!(
            self.store.save(&self.config),
            self.host.injectables.register_injectables(),
        );
        if let Err(e) = saved {
            error!("Failed to persist ruleset config: {}", e);
        }
        if let Err(e) = registered {
            warn!("Failed to register injectables: {}", e);
        }
        Reply::Ack
    }

    async fn ruleset_data(&self) -> Reply {
        let (details, enabled) = tokio::join!(
            self.host.rulesets.ruleset_details(),
            self.host.rule_engine.enabled_rulesets(),
        );
        Reply::RulesetData(RulesetData {
            enabled_rulesets: or_default("enabled rulesets", enabled),
            ruleset_details: or_default("ruleset details", details),
        })
    }

    async fn panel_data(&self, request: &TrustedSiteRequest) -> Reply {
        let (is_trusted, has_great_powers, ruleset_details, injectable_count) = tokio::join!(
            self.host.trusted_sites.matches_trusted_site_directive(request),
            self.permissions.has_elevated(&request.origin),
            self.host.rulesets.enabled_rulesets_stats(),
            self.host.injectables.injectable_count(&request.origin),
        );
        Reply::PanelData(PanelData {
            is_trusted: or_default("trusted-site status", is_trusted),
            has_great_powers,
            ruleset_details: or_default("enabled ruleset stats", ruleset_details),
            injectable_count: or_default("injectable count", injectable_count),
        })
    }

    async fn toggle_trusted_site(&self, request: &TrustedSiteRequest) -> Reply {
        let state = match self
            .host
            .trusted_sites
            .toggle_trusted_site_directive(request)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to toggle trusted-site directive for {}: {}", request.origin, e);
                return RequestKind::ToggleTrustedSiteDirective.default_reply();
            }
        };
        // Trust state decides which pages get injectables.
        if let Err(e) = self.host.injectables.register_injectables().await {
            warn!("Failed to register injectables: {}", e);
        }
        Reply::TrustedSite(state)
    }
}

fn or_default<T: Default>(what: &str, result: HostResult<T>) -> T {
    result.unwrap_or_else(|e| {
        warn!("Failed to read {}: {}", what, e);
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_kind_tags_round_trip() {
        for kind in [
            RequestKind::ApplyRulesets,
            RequestKind::GetRulesetData,
            RequestKind::GrantGreatPowers,
            RequestKind::RevokeGreatPowers,
            RequestKind::PopupPanelData,
            RequestKind::ToggleTrustedSiteDirective,
        ] {
            assert_eq!(RequestKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(RequestKind::from_tag("getTabId"), None);
    }

    #[test]
    fn test_request_parsing() {
        let request: Request = serde_json::from_value(json!({
            "what": "applyRulesets",
            "enabledRulesets": ["A", "B"],
        }))
        .unwrap();
        assert_eq!(
            request,
            Request::ApplyRulesets {
                enabled_rulesets: vec!["A".to_string(), "B".to_string()]
            }
        );

        let request: Request = serde_json::from_value(json!({
            "what": "popupPanelData",
            "origin": "https://example.com",
            "hostname": "example.com",
        }))
        .unwrap();
        assert_eq!(request.kind(), RequestKind::PopupPanelData);
        assert_eq!(
            request,
            Request::PopupPanelData(TrustedSiteRequest {
                origin: "https://example.com".to_string(),
                state: false,
            })
        );

        let request: Request =
            serde_json::from_value(json!({ "what": "getRulesetData" })).unwrap();
        assert_eq!(request, Request::GetRulesetData);
    }

    #[test]
    fn test_reply_serialization() {
        assert_eq!(serde_json::to_value(Reply::Ack).unwrap(), Value::Null);
        assert_eq!(serde_json::to_value(Reply::Granted(true)).unwrap(), json!(true));
        assert_eq!(
            serde_json::to_value(Reply::PanelData(PanelData::default())).unwrap(),
            json!({
                "isTrusted": false,
                "hasGreatPowers": false,
                "rulesetDetails": [],
                "injectableCount": 0,
            })
        );
    }

    #[tokio::test]
    async fn test_dropped_responder_sends_default() {
        let (responder, receiver) = Responder::new(RequestKind::GrantGreatPowers);
        drop(responder);
        assert_eq!(receiver.await.unwrap(), Reply::Granted(false));
    }

    #[tokio::test]
    async fn test_responder_replies_once() {
        let (responder, receiver) = Responder::new(RequestKind::ApplyRulesets);
        responder.respond(Reply::Ack);
        assert_eq!(receiver.await.unwrap(), Reply::Ack);
    }
}
