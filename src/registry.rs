//! Per-alert workers: one upstream subscription and one webhook forwarder
//! per registered alert, keyed by address.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::alert::Alert;
use crate::crypto::BridgeKeys;
use crate::event::Event;
use crate::filter::match_filters;
use crate::storage::Store;
use crate::upstream::RelayClient;

struct Worker {
    subscription: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl Worker {
    fn stop(&self) {
        self.subscription.abort();
        self.forwarder.abort();
    }
}

pub struct Registry {
    store: Store,
    keys: BridgeKeys,
    client: Arc<dyn RelayClient>,
    http: reqwest::Client,
    workers: Mutex<HashMap<String, Worker>>,
}

impl Registry {
    pub fn new(store: Store, keys: BridgeKeys, client: Arc<dyn RelayClient>) -> Self {
        Self {
            store,
            keys,
            client,
            http: reqwest::Client::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or restart) the worker pair for an alert. The stored event is
    /// decrypted afresh so the plaintext config never outlives the worker.
    pub async fn register(self: &Arc<Self>, alert: &Alert) -> Result<()> {
        let config = alert.config(&self.keys)?;
        let filters: Vec<_> = config
            .filters
            .iter()
            .map(|f| f.clone().with_limit(0))
            .collect();

        let mut workers = self.workers.lock().await;
        if let Some(prev) = workers.remove(&alert.address) {
            prev.stop();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.client.subscribe(config.relays.clone(), filters, tx);
        let forwarder = tokio::spawn(forward(
            Arc::clone(self),
            alert.address.clone(),
            config.ignore,
            config.callback,
            rx,
        ));
        workers.insert(
            alert.address.clone(),
            Worker {
                subscription,
                forwarder,
            },
        );
        info!(address = %alert.address, "alert registered");
        Ok(())
    }

    /// Stop and forget the worker for an address, if any.
    pub async fn unregister(&self, address: &str) {
        if let Some(worker) = self.workers.lock().await.remove(address) {
            worker.stop();
            info!(%address, "alert unregistered");
        }
    }

    #[cfg(test)]
    pub async fn addresses(&self) -> Vec<String> {
        let mut out: Vec<_> = self.workers.lock().await.keys().cloned().collect();
        out.sort();
        out
    }
}

/// Drain matched events, drop ignored ones, and POST the rest to the
/// callback. Any delivery failure evicts the alert for good.
async fn forward(
    registry: Arc<Registry>,
    address: String,
    ignore: Vec<crate::filter::Filter>,
    callback: String,
    mut rx: mpsc::UnboundedReceiver<(Event, String)>,
) {
    while let Some((event, relay)) = rx.recv().await {
        if match_filters(&ignore, &event) {
            continue;
        }
        if !deliver(&registry.http, &callback, &event.id, &relay).await {
            warn!(%address, %callback, "callback failed, evicting alert");
            if let Err(e) = registry.store.delete_by_address(&address) {
                warn!(%address, error = %e, "failed to delete evicted alert");
            }
            registry.unregister(&address).await;
            break;
        }
    }
}

async fn deliver(http: &reqwest::Client, callback: &str, id: &str, relay: &str) -> bool {
    match http
        .post(callback)
        .json(&json!({"id": id, "relay": relay}))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
