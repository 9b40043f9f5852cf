//! Alert lifecycle actions shared by the relay protocol and startup recovery.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, instrument};

use crate::alert::Alert;
use crate::event::{Event, ALERT};
use crate::registry::Registry;
use crate::storage::Store;

/// Persist an alert event and spin up its worker. Replaces any previous
/// alert at the same address.
#[instrument(skip_all, fields(id = %event.id))]
pub async fn create_or_update_alert(
    store: &Store,
    registry: &Arc<Registry>,
    event: Event,
) -> Result<Alert> {
    let alert = store.upsert(Alert::from_event(event))?;
    registry.register(&alert).await?;
    Ok(alert)
}

/// Apply a kind-5 deletion: tear down every alert the request references,
/// provided it belongs to the requesting author.
pub async fn process_delete(store: &Store, registry: &Arc<Registry>, event: &Event) -> Result<()> {
    let alert_kind = ALERT.to_string();
    for address in event.tag_values("a") {
        let mut parts = address.splitn(3, ':');
        let (Some(kind), Some(pubkey), Some(_)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if kind != alert_kind || pubkey != event.pubkey {
            continue;
        }
        if store.delete_by_address(address)? {
            registry.unregister(address).await;
            info!(%address, "alert deleted");
        }
    }
    for id in event.tag_values("e") {
        let Some(existing) = store.get_by_id(id)? else {
            continue;
        };
        if existing.pubkey != event.pubkey {
            continue;
        }
        if let Some(alert) = store.delete_by_id(id)? {
            registry.unregister(&alert.address).await;
            info!(address = %alert.address, "alert deleted");
        }
    }
    Ok(())
}
