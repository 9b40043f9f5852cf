//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use secp256k1::{Keypair, Message, Secp256k1};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::crypto::BridgeKeys;
use crate::event::{event_hash, now, Event, Tag, ALERT};
use crate::filter::Filter;
use crate::upstream::RelayClient;

/// Deterministic schnorr signer seeded from a single byte.
pub struct TestSigner {
    keypair: Keypair,
    pub pubkey: String,
}

impl TestSigner {
    pub fn new(seed: u8) -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &[seed; 32]).unwrap();
        let pubkey = hex::encode(keypair.x_only_public_key().0.serialize());
        Self { keypair, pubkey }
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    pub fn sign(&self, kind: u32, created_at: u64, tags: Vec<Tag>, content: &str) -> Event {
        let mut ev = Event {
            id: String::new(),
            pubkey: self.pubkey.clone(),
            kind,
            created_at,
            tags,
            content: content.to_string(),
            sig: String::new(),
        };
        let hash = event_hash(&ev).unwrap();
        ev.id = hex::encode(hash);
        let secp = Secp256k1::new();
        let sig = secp.sign_schnorr_no_aux_rand(&Message::from_digest(hash), &self.keypair);
        ev.sig = hex::encode(sig.serialize());
        ev
    }
}

/// Tag rows for a minimal alert config. An empty callback is omitted so
/// callers can append their own.
pub fn config_tags(relay: &str, callback: &str, filter: &str) -> Vec<Vec<String>> {
    let mut tags = vec![
        vec!["relay".to_string(), relay.to_string()],
        vec!["filter".to_string(), filter.to_string()],
    ];
    if !callback.is_empty() {
        tags.push(vec!["callback".to_string(), callback.to_string()]);
    }
    tags
}

/// A signed kind-30390 event whose content is the given config tags,
/// encrypted from the signer to the bridge.
pub fn alert_event(
    signer: &TestSigner,
    bridge: &BridgeKeys,
    d: &str,
    config_tags: Vec<Vec<String>>,
) -> Event {
    let sender = BridgeKeys::from_secret(&signer.secret_hex()).unwrap();
    let plaintext = serde_json::to_string(&config_tags).unwrap();
    let ciphertext = sender.encrypt(&bridge.public_hex(), &plaintext).unwrap();
    let tags = vec![
        Tag(vec!["d".to_string(), d.to_string()]),
        Tag(vec!["p".to_string(), bridge.public_hex()]),
    ];
    signer.sign(ALERT, now(), tags, &ciphertext)
}

#[derive(Clone)]
pub struct FakeSubscription {
    pub relays: Vec<String>,
    pub filters: Vec<Filter>,
    pub tx: UnboundedSender<(Event, String)>,
    cancelled: Arc<AtomicBool>,
}

impl FakeSubscription {
    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Records subscriptions instead of dialing relays. Tests push events
/// through the captured senders and observe cancellation via the flag the
/// subscription task sets when aborted.
#[derive(Default)]
pub struct FakeClient {
    subs: Mutex<Vec<FakeSubscription>>,
}

impl FakeClient {
    pub fn subscriptions(&self) -> Vec<FakeSubscription> {
        self.subs.lock().unwrap().clone()
    }
}

struct CancelGuard(Arc<AtomicBool>);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl RelayClient for FakeClient {
    fn subscribe(
        &self,
        relays: Vec<String>,
        filters: Vec<Filter>,
        tx: UnboundedSender<(Event, String)>,
    ) -> JoinHandle<()> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.subs.lock().unwrap().push(FakeSubscription {
            relays,
            filters,
            tx,
            cancelled: Arc::clone(&cancelled),
        });
        let guard = CancelGuard(cancelled);
        tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        })
    }
}
