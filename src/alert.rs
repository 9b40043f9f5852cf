//! Alert records and their decrypted delivery configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::crypto::BridgeKeys;
use crate::event::{Event, Tag};
use crate::filter::Filter;

/// A persisted alert: one upstream subscription plus one webhook target,
/// keyed by the address of the event that created it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// Stable `kind:pubkey:d` address, primary key across updates.
    pub address: String,
    /// Id of the most recent event that produced this alert.
    pub id: String,
    /// Owner public key.
    pub pubkey: String,
    /// Timestamp of the authoring event.
    pub created_at: u64,
    /// The full signed event, replayed verbatim to clients.
    pub event: Event,
}

impl Alert {
    pub fn from_event(event: Event) -> Self {
        Self {
            address: event.address(),
            id: event.id.clone(),
            pubkey: event.pubkey.clone(),
            created_at: event.created_at,
            event,
        }
    }

    /// Decrypt the alert's content and derive its delivery configuration.
    ///
    /// The config is never persisted separately; it is recomputed from the
    /// stored event whenever a worker starts, including at boot recovery.
    pub fn config(&self, keys: &BridgeKeys) -> Result<AlertConfig> {
        let plaintext = keys.decrypt(&self.pubkey, &self.event.content)?;
        let tags: Vec<Tag> =
            serde_json::from_str(&plaintext).context("encrypted tags are not an array")?;
        AlertConfig::from_tags(&tags)
    }
}

/// Delivery configuration carried in an alert event's encrypted tag list.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfig {
    /// Upstream relays to subscribe on.
    pub relays: Vec<String>,
    /// Filters the subscription matches on.
    pub filters: Vec<Filter>,
    /// Events matching any of these are dropped instead of forwarded.
    pub ignore: Vec<Filter>,
    /// Webhook URL matched events are POSTed to.
    pub callback: String,
}

impl AlertConfig {
    /// Parse a decrypted tag list. Unparsable `filter`/`ignore` entries are
    /// skipped; missing relays, filters, or callback are errors.
    pub fn from_tags(tags: &[Tag]) -> Result<Self> {
        let mut relays = vec![];
        let mut filters = vec![];
        let mut ignore = vec![];
        let mut callback = None;
        for Tag(fields) in tags {
            let [name, value, ..] = fields.as_slice() else {
                continue;
            };
            match name.as_str() {
                "relay" => relays.push(normalize_relay_url(value)),
                "filter" => {
                    if let Ok(f) = serde_json::from_str::<Filter>(value) {
                        filters.push(f);
                    }
                }
                "ignore" => {
                    if let Ok(f) = serde_json::from_str::<Filter>(value) {
                        ignore.push(f);
                    }
                }
                "callback" => {
                    if callback.is_none() {
                        callback = Some(value.clone());
                    }
                }
                _ => {}
            }
        }
        if relays.is_empty() {
            bail!("no relay tags");
        }
        if filters.is_empty() {
            bail!("no valid filter tags");
        }
        let Some(callback) = callback else {
            bail!("no callback tag");
        };
        Ok(Self {
            relays,
            filters,
            ignore,
            callback,
        })
    }
}

/// Default missing schemes to `wss://`, lowercase the authority, and strip
/// trailing slashes.
pub fn normalize_relay_url(url: &str) -> String {
    let url = url.trim();
    let url = if url.contains("://") {
        url.to_string()
    } else {
        format!("wss://{url}")
    };
    let url = url.trim_end_matches('/');
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
            let mut out = format!("{}://{}", scheme.to_lowercase(), authority.to_lowercase());
            if !path.is_empty() {
                out.push('/');
                out.push_str(path);
            }
            out
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ALERT;
    use crate::testing::{self, TestSigner};

    fn tag(fields: &[&str]) -> Tag {
        Tag(fields.iter().map(|s| s.to_string()).collect())
    }

    fn full_tags() -> Vec<Tag> {
        vec![
            tag(&["relay", "relay.example.com"]),
            tag(&["relay", "wss://other.example.com/"]),
            tag(&["filter", r#"{"kinds":[1]}"#]),
            tag(&["ignore", r#"{"authors":["p2"]}"#]),
            tag(&["callback", "https://cb.example.com/x"]),
        ]
    }

    #[test]
    fn derives_full_config() {
        let config = AlertConfig::from_tags(&full_tags()).unwrap();
        assert_eq!(
            config.relays,
            vec!["wss://relay.example.com", "wss://other.example.com"]
        );
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.filters[0].kinds, Some(vec![1]));
        assert_eq!(config.ignore.len(), 1);
        assert_eq!(config.callback, "https://cb.example.com/x");
    }

    #[test]
    fn unparsable_filters_are_skipped() {
        let mut tags = full_tags();
        tags.push(tag(&["filter", "not json"]));
        tags.push(tag(&["ignore", "{broken"]));
        let config = AlertConfig::from_tags(&tags).unwrap();
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.ignore.len(), 1);
    }

    #[test]
    fn first_callback_wins() {
        let mut tags = full_tags();
        tags.push(tag(&["callback", "https://second.example.com"]));
        let config = AlertConfig::from_tags(&tags).unwrap();
        assert_eq!(config.callback, "https://cb.example.com/x");
    }

    #[test]
    fn missing_pieces_are_errors() {
        let without = |name: &str| {
            let tags: Vec<Tag> = full_tags()
                .into_iter()
                .filter(|Tag(fields)| fields[0] != name)
                .collect();
            AlertConfig::from_tags(&tags)
        };
        assert!(without("relay").is_err());
        assert!(without("filter").is_err());
        assert!(without("callback").is_err());
    }

    #[test]
    fn short_tags_are_ignored() {
        let mut tags = full_tags();
        tags.push(Tag(vec!["relay".into()]));
        let config = AlertConfig::from_tags(&tags).unwrap();
        assert_eq!(config.relays.len(), 2);
    }

    #[test]
    fn normalize_relay_urls() {
        assert_eq!(normalize_relay_url("relay.io"), "wss://relay.io");
        assert_eq!(normalize_relay_url("wss://Relay.IO/"), "wss://relay.io");
        assert_eq!(normalize_relay_url("ws://x.io/path/"), "ws://x.io/path");
        assert_eq!(normalize_relay_url(" relay.io/ "), "wss://relay.io");
    }

    #[test]
    fn from_event_derives_address() {
        let signer = TestSigner::new(1);
        let ev = signer.sign(ALERT, 7, vec![tag(&["d", "slug"])], "");
        let alert = Alert::from_event(ev.clone());
        assert_eq!(alert.address, format!("{ALERT}:{}:slug", signer.pubkey));
        assert_eq!(alert.id, ev.id);
        assert_eq!(alert.pubkey, signer.pubkey);
        assert_eq!(alert.created_at, 7);
    }

    #[test]
    fn config_round_trips_through_encryption() {
        let bridge = crate::crypto::BridgeKeys::generate();
        let signer = TestSigner::new(2);
        let rows = full_tags().into_iter().map(|Tag(f)| f).collect();
        let ev = testing::alert_event(&signer, &bridge, "slug", rows);
        let alert = Alert::from_event(ev);
        let config = alert.config(&bridge).unwrap();
        assert_eq!(config.callback, "https://cb.example.com/x");
        assert_eq!(config.relays.len(), 2);
    }

    #[test]
    fn config_fails_for_foreign_ciphertext() {
        let bridge = crate::crypto::BridgeKeys::generate();
        let other = crate::crypto::BridgeKeys::generate();
        let signer = TestSigner::new(3);
        let rows = full_tags().into_iter().map(|Tag(f)| f).collect();
        let ev = testing::alert_event(&signer, &other, "slug", rows);
        let alert = Alert::from_event(ev);
        assert!(alert.config(&bridge).is_err());
    }
}
