//! HTTP surface: WebSocket upgrade, relay info document and health check.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Host, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::crypto::BridgeKeys;
use crate::registry::Registry;
use crate::relay;
use crate::storage::Store;

pub struct App {
    pub store: Store,
    pub registry: Arc<Registry>,
    pub keys: BridgeKeys,
    connections: AtomicUsize,
}

impl App {
    pub fn new(store: Store, registry: Arc<Registry>, keys: BridgeKeys) -> Self {
        Self {
            store,
            registry,
            keys,
            connections: AtomicUsize::new(0),
        }
    }
}

#[derive(Serialize)]
struct RelayInfo {
    name: &'static str,
    description: &'static str,
    pubkey: String,
    software: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

pub(crate) fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .with_state(app)
}

pub async fn serve(
    addr: &str,
    app: Arc<App>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving")
}

async fn root(
    State(app): State<Arc<App>>,
    Host(hostname): Host,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    if let Some(ws) = ws {
        return ws.on_upgrade(move |socket| async move {
            let open = app.connections.fetch_add(1, Ordering::Relaxed) + 1;
            info!(connections = open, "client connected");
            relay::process(socket, Arc::clone(&app), hostname).await;
            let open = app.connections.fetch_sub(1, Ordering::Relaxed) - 1;
            info!(connections = open, "client disconnected");
        });
    }
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if accept == "application/nostr+json" {
        let info = RelayInfo {
            name: "bridgr",
            description: "nostr alert push bridge",
            pubkey: app.keys.public_hex(),
            software: "bridgr",
            version: env!("CARGO_PKG_VERSION"),
        };
        return (
            [
                (header::CONTENT_TYPE, "application/nostr+json"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            Json(info),
        )
            .into_response();
    }
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"}))).into_response()
}

async fn healthz() -> Json<Health> {
    Json(Health { status: "ok" })
}
