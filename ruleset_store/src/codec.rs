// Config codec
//
// The host engine offers no key-value storage, only rules. The configuration
// record is therefore packed into the URL filter of a rule that can never
// match real traffic:
//
//     ||example.invalid/{version}/{rulesets}/
//
// `rulesets` is the space-joined id list, percent-encoded. Ids are encoded
// individually before joining so that an id containing a space or `%`
// survives the trip; for plain ids this yields exactly `A%20B`. An empty list
// drops the second segment entirely.

use std::borrow::Cow;

use crate::ruleset_config::RulesetConfig;

/// Reserved TLD; never resolvable, so the cell never matches a request.
pub const DEFAULT_AUTHORITY: &str = "example.invalid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCodec {
    authority: String,
}

impl Default for ConfigCodec {
    fn default() -> Self {
        Self::new(DEFAULT_AUTHORITY)
    }
}

impl ConfigCodec {
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
        }
    }

    /// Packs `config` into a URL filter string.
    pub fn encode(&self, config: &RulesetConfig) -> String {
        let version = urlencoding::encode(&config.version);
        if config.enabled_rulesets.is_empty() {
            return format!("||{}/{}/", self.authority, version);
        }

        let joined = config
            .enabled_rulesets
            .iter()
            .map(|id| urlencoding::encode(id))
            .collect::<Vec<Cow<'_, str>>>()
            .join(" ");

        format!(
            "||{}/{}/{}/",
            self.authority,
            version,
            urlencoding::encode(&joined)
        )
    }

    /// Unpacks a URL filter produced by [`ConfigCodec::encode`].
    ///
    /// Returns `None` for anything that does not have the exact shape; callers
    /// treat that the same as "nothing persisted yet".
    pub fn decode(&self, url_filter: &str) -> Option<RulesetConfig> {
        let path = url_filter
            .strip_prefix("||")?
            .strip_prefix(self.authority.as_str())?
            .strip_prefix('/')?
            .strip_suffix('/')?;

        let mut segments = path.split('/');
        let version = segments.next()?;
        let rulesets = segments.next();
        if segments.next().is_some() {
            return None;
        }

        let version = urlencoding::decode(version).ok()?.into_owned();

        let enabled_rulesets = match rulesets {
            // An empty segment is what older writers stored for an empty list.
            None | Some("") => Vec::new(),
            Some(encoded) => {
                let joined = urlencoding::decode(encoded).ok()?;
                joined
                    .split(' ')
                    .map(|id| urlencoding::decode(id).map(Cow::into_owned))
                    .collect::<Result<Vec<_>, _>>()
                    .ok()?
            }
        };

        Some(RulesetConfig {
            version,
            enabled_rulesets,
        })
    }
}
