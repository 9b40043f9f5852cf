//! Downstream relay protocol: AUTH, REQ, CLOSE and EVENT over one WebSocket.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::actions::{create_or_update_alert, process_delete};
use crate::alert::AlertConfig;
use crate::event::{now, verify_event, Event, ALERT, CLIENT_AUTH, DELETE};
use crate::filter::{match_filters, Filter};
use crate::server::App;

/// Auth events older than this are rejected.
const AUTH_WINDOW: u64 = 300;

enum ClientMessage {
    Auth(Event),
    Req { id: String, filters: Vec<Filter> },
    Close(String),
    Event(Event),
}

fn decode(txt: &str) -> Result<ClientMessage, &'static str> {
    let val: Value = serde_json::from_str(txt).map_err(|_| "could not parse message")?;
    let Some(arr) = val.as_array() else {
        return Err("message must be an array");
    };
    match arr.first().and_then(|v| v.as_str()) {
        Some("AUTH") => {
            let ev = arr.get(1).cloned().ok_or("missing auth event")?;
            serde_json::from_value(ev)
                .map(ClientMessage::Auth)
                .map_err(|_| "could not parse auth event")
        }
        Some("REQ") => {
            let Some(id) = arr.get(1).and_then(|v| v.as_str()) else {
                return Err("missing subscription id");
            };
            let filters = arr
                .get(2..)
                .unwrap_or_default()
                .iter()
                .map(|v| serde_json::from_value(v.clone()))
                .collect::<Result<Vec<Filter>, _>>()
                .map_err(|_| "could not parse filters")?;
            Ok(ClientMessage::Req {
                id: id.to_string(),
                filters,
            })
        }
        Some("CLOSE") => {
            let Some(id) = arr.get(1).and_then(|v| v.as_str()) else {
                return Err("missing subscription id");
            };
            Ok(ClientMessage::Close(id.to_string()))
        }
        Some("EVENT") => {
            let ev = arr.get(1).cloned().ok_or("missing event")?;
            serde_json::from_value(ev)
                .map(ClientMessage::Event)
                .map_err(|_| "could not parse event")
        }
        _ => Err("unknown verb"),
    }
}

struct Connection {
    socket: WebSocket,
    app: Arc<App>,
    hostname: String,
    challenge: String,
    /// The accepted NIP-42 auth event, held as the session credential.
    auth: Option<Event>,
    subs: HashMap<String, Vec<Filter>>,
}

/// Drive one client connection to completion.
pub(crate) async fn process(socket: WebSocket, app: Arc<App>, hostname: String) {
    let mut conn = Connection {
        socket,
        app,
        hostname,
        challenge: hex::encode(rand::random::<[u8; 16]>()),
        auth: None,
        subs: HashMap::new(),
    };
    conn.send(json!(["AUTH", &conn.challenge])).await;
    loop {
        let msg = match conn.socket.recv().await {
            Some(Ok(msg)) => msg,
            Some(Err(_)) | None => break,
        };
        let txt = match msg {
            Message::Text(txt) => txt,
            Message::Close(_) => break,
            _ => continue,
        };
        let msg = match decode(&txt) {
            Ok(msg) => msg,
            Err(reason) => {
                conn.send(json!(["NOTICE", "", reason])).await;
                continue;
            }
        };
        let result = match msg {
            ClientMessage::Auth(ev) => conn.on_auth(ev).await,
            ClientMessage::Req { id, filters } => conn.on_req(id, filters).await,
            ClientMessage::Close(id) => {
                conn.subs.remove(&id);
                Ok(())
            }
            ClientMessage::Event(ev) => conn.on_event(ev).await,
        };
        if let Err(e) = result {
            // Store and workers may be out of sync; boot recovery from the
            // store is the restart path.
            error!(error = ?e, "unrecoverable ingestion failure");
            std::process::exit(1);
        }
    }
}

impl Connection {
    /// Socket write failures surface as a closed connection on the next read.
    async fn send(&mut self, val: Value) {
        let _ = self.socket.send(Message::Text(val.to_string())).await;
    }

    async fn ok(&mut self, id: &str, accepted: bool, reason: &str) {
        self.send(json!(["OK", id, accepted, reason])).await;
    }

    async fn on_auth(&mut self, ev: Event) -> Result<()> {
        let reason = self.auth_rejection(&ev);
        match reason {
            Some(reason) => self.ok(&ev.id, false, reason).await,
            None => {
                debug!(pubkey = %ev.pubkey, "client authenticated");
                self.auth = Some(ev.clone());
                self.ok(&ev.id, true, "").await;
            }
        }
        Ok(())
    }

    fn auth_rejection(&self, ev: &Event) -> Option<&'static str> {
        if verify_event(ev).is_err() {
            return Some("invalid signature");
        }
        if ev.kind != CLIENT_AUTH {
            return Some("invalid kind");
        }
        if ev.created_at < now().saturating_sub(AUTH_WINDOW) {
            return Some("created_at is too far from current time");
        }
        if ev.tag_value("challenge") != Some(self.challenge.as_str()) {
            return Some("invalid challenge");
        }
        let relay_ok = ev
            .tag_values("relay")
            .any(|url| url.contains(&self.hostname));
        if !relay_ok {
            return Some("invalid relay");
        }
        None
    }

    async fn on_req(&mut self, id: String, filters: Vec<Filter>) -> Result<()> {
        let Some(pubkey) = self.auth.as_ref().map(|auth| auth.pubkey.clone()) else {
            self.send(json!(["CLOSED", &id, "auth-required: alerts are protected"]))
                .await;
            return Ok(());
        };
        self.subs.insert(id.clone(), filters.clone());
        for alert in self.app.store.list_by_pubkey(&pubkey)? {
            if match_filters(&filters, &alert.event) {
                self.send(json!(["EVENT", &id, &alert.event])).await;
            }
        }
        self.send(json!(["EOSE", &id])).await;
        Ok(())
    }

    async fn on_event(&mut self, ev: Event) -> Result<()> {
        if verify_event(&ev).is_err() {
            self.ok(&ev.id, false, "invalid signature").await;
            return Ok(());
        }
        if self.auth.as_ref().map(|auth| auth.pubkey.as_str()) != Some(ev.pubkey.as_str()) {
            self.ok(&ev.id, false, "event not authorized").await;
            return Ok(());
        }
        match ev.kind {
            DELETE => {
                let id = ev.id.clone();
                process_delete(&self.app.store, &self.app.registry, &ev).await?;
                self.ok(&id, true, "").await;
                Ok(())
            }
            ALERT => match self.handle_alert(ev).await {
                Ok(()) => Ok(()),
                Err(Ingest::Rejected) => Ok(()),
                Err(Ingest::Failed(e)) => Err(e),
            },
            _ => {
                self.ok(&ev.id, false, "event kind not accepted")
                    .await;
                Ok(())
            }
        }
    }

    async fn handle_alert(&mut self, ev: Event) -> Result<(), Ingest> {
        let id = ev.id.clone();
        if let Some(reason) = self.alert_rejection(&ev) {
            self.ok(&id, false, &reason).await;
            return Err(Ingest::Rejected);
        }
        let alert =
            match create_or_update_alert(&self.app.store, &self.app.registry, ev).await {
                Ok(alert) => alert,
                Err(e) => {
                    self.ok(&id, false, "unknown error").await;
                    return Err(Ingest::Failed(e));
                }
            };
        self.ok(&id, true, "").await;
        // Serve the replaced alert back to this connection's live REQs.
        let subs: Vec<_> = self
            .subs
            .iter()
            .filter(|(_, filters)| match_filters(filters, &alert.event))
            .map(|(sub_id, _)| sub_id.clone())
            .collect();
        for sub_id in subs {
            self.send(json!(["EVENT", &sub_id, &alert.event])).await;
        }
        Ok(())
    }

    fn alert_rejection(&self, ev: &Event) -> Option<String> {
        let bridge_pubkey = self.app.keys.public_hex();
        if !ev.tag_values("p").any(|p| p == bridge_pubkey) {
            return Some("event must p-tag this relay".into());
        }
        let Ok(plaintext) = self.app.keys.decrypt(&ev.pubkey, &ev.content) else {
            return Some("failed to decrypt event content".into());
        };
        let Ok(tags) = serde_json::from_str::<Vec<crate::event::Tag>>(&plaintext) else {
            return Some("encrypted tags are not an array".into());
        };
        if let Err(e) = AlertConfig::from_tags(&tags) {
            return Some(e.to_string());
        }
        None
    }
}

enum Ingest {
    /// The event was refused with an OK false; the connection stays up.
    Rejected,
    /// Something unexpected broke mid-ingestion; fatal to the process.
    Failed(anyhow::Error),
}
