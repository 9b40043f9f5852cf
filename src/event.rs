//! Nostr event model, tag helpers, and signature verification.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind carrying an encrypted alert subscription request (parameterized
/// replaceable, addressed by `30390:<pubkey>:<d>`).
pub const ALERT: u32 = 30390;
/// NIP-42 client authentication kind.
pub const CLIENT_AUTH: u32 = 22242;
/// NIP-09 deletion kind.
pub const DELETE: u32 = 5;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// The first element denotes the type, the rest hold data. The tags this
/// bridge cares about:
///
/// - `d` – discriminator making an alert's address stable across updates
/// - `p` – recipient public key (alert events must p-tag the bridge)
/// - `a` / `e` – address and event-id references in deletion events
/// - `challenge` / `relay` – NIP-42 authentication proof
///
/// Tags are stored verbatim so custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

/// Signed Nostr event as received on the wire and persisted inside alerts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `30390` or `5`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Arbitrary tags.
    pub tags: Vec<Tag>,
    /// Event content body (NIP-44 ciphertext for alert events).
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tag_values(name).next()
    }

    /// First values of every tag named `name`, in order.
    pub fn tag_values<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + 'n
    where
        'a: 'n,
    {
        self.tags
            .iter()
            .filter_map(move |Tag(fields)| match fields.as_slice() {
                [t, val, ..] if t == name => Some(val.as_str()),
                _ => None,
            })
    }

    /// `kind:pubkey:d` address for parameterized replaceable events. Stable
    /// across updates, unlike the event id.
    pub fn address(&self) -> String {
        format!(
            "{}:{}:{}",
            self.kind,
            self.pubkey,
            self.tag_value("d").unwrap_or("")
        )
    }
}

/// Current Unix timestamp in seconds.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Recompute the Nostr event hash from its fields.
pub fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, &ev.pubkey, ev.created_at, ev.kind, &ev.tags, &ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

/// Verify an event's ID and Schnorr signature.
pub fn verify_event(ev: &Event) -> Result<()> {
    let hash = event_hash(ev)?;
    let calc_id = hex::encode(hash);
    if calc_id != ev.id {
        return Err(anyhow!("id mismatch"));
    }
    let sig = Signature::from_slice(&hex::decode(&ev.sig)?)?;
    let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey)?)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest_slice(&hash)?;
    secp.verify_schnorr(&sig, &msg, &pk)?;
    Ok(())
}
