//! Live subscriptions against upstream relays, feeding alert workers.

use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::{future, SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls_with_config, connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::event::Event;
use crate::filter::Filter;

/// Capability to hold live subscriptions open against upstream relays.
///
/// Matched events are pushed into `tx` together with their source relay URL.
/// Aborting the returned handle tears every subscription down; no events are
/// delivered after the abort takes effect.
pub trait RelayClient: Send + Sync + 'static {
    fn subscribe(
        &self,
        relays: Vec<String>,
        filters: Vec<Filter>,
        tx: UnboundedSender<(Event, String)>,
    ) -> JoinHandle<()>;
}

/// Production client speaking NIP-01 over tokio-tungstenite, optionally via a
/// SOCKS5 (Tor) proxy. Each relay gets its own reconnect loop; all loops live
/// inside the one returned task so a single abort cancels everything.
pub struct WsClient {
    tor_socks: Option<String>,
}

impl WsClient {
    pub fn new(tor_socks: Option<String>) -> Self {
        Self { tor_socks }
    }
}

impl RelayClient for WsClient {
    fn subscribe(
        &self,
        relays: Vec<String>,
        filters: Vec<Filter>,
        tx: UnboundedSender<(Event, String)>,
    ) -> JoinHandle<()> {
        let tor_socks = self.tor_socks.clone();
        tokio::spawn(async move {
            let loops = relays.into_iter().map(|relay| {
                relay_loop(relay, filters.clone(), tx.clone(), tor_socks.clone())
            });
            future::join_all(loops).await;
        })
    }
}

const RETRY_DELAY: Duration = Duration::from_secs(5);

async fn relay_loop(
    relay: String,
    filters: Vec<Filter>,
    tx: UnboundedSender<(Event, String)>,
    tor_socks: Option<String>,
) {
    loop {
        match subscribe_once(&relay, &filters, &tx, tor_socks.as_deref()).await {
            Ok(Session::ReceiverGone) => break,
            Ok(Session::Disconnected) => {}
            Err(e) => warn!(%relay, error = %e, "upstream subscription failed"),
        }
        sleep(RETRY_DELAY).await;
    }
}

enum Session {
    /// The relay closed the connection; reconnect.
    Disconnected,
    /// The worker side dropped its receiver; stop for good.
    ReceiverGone,
}

/// Establish one connection, dialing through the SOCKS5 proxy when
/// configured. TLS is negotiated for `wss://` URLs on either path.
async fn subscribe_once(
    relay: &str,
    filters: &[Filter],
    tx: &UnboundedSender<(Event, String)>,
    tor_socks: Option<&str>,
) -> Result<Session> {
    match tor_socks {
        Some(proxy) => {
            let url = Url::parse(relay)?;
            let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
            let port = url
                .port_or_known_default()
                .ok_or_else(|| anyhow!("missing port"))?;
            let stream = Socks5Stream::connect(proxy, (host, port)).await?;
            let req = relay.into_client_request()?;
            let (ws, _) = client_async_tls_with_config(req, stream, None, None).await?;
            run_subscription(ws, relay, filters, tx).await
        }
        None => {
            let (ws, _) = connect_async(relay).await?;
            run_subscription(ws, relay, filters, tx).await
        }
    }
}

/// Issue one REQ covering all filters and forward EVENT frames for our
/// subscription id until the connection drops.
async fn run_subscription<S>(
    mut ws: WebSocketStream<S>,
    relay: &str,
    filters: &[Filter],
    tx: &UnboundedSender<(Event, String)>,
) -> Result<Session>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let sub_id = hex::encode(rand::random::<[u8; 8]>());
    let mut req = vec![
        Value::String("REQ".into()),
        Value::String(sub_id.clone()),
    ];
    for filter in filters {
        req.push(serde_json::to_value(filter)?);
    }
    ws.send(Message::Text(Value::Array(req).to_string())).await?;

    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(txt) => {
                let Ok(val) = serde_json::from_str::<Value>(&txt) else {
                    continue;
                };
                let Some(arr) = val.as_array() else {
                    continue;
                };
                match arr.first().and_then(|v| v.as_str()) {
                    Some("EVENT") if arr.len() >= 3 => {
                        if arr.get(1).and_then(|v| v.as_str()) != Some(sub_id.as_str()) {
                            continue;
                        }
                        if let Ok(ev) = serde_json::from_value::<Event>(arr[2].clone()) {
                            debug!(%relay, id = %ev.id, "upstream event");
                            if tx.send((ev, relay.to_string())).is_err() {
                                return Ok(Session::ReceiverGone);
                            }
                        }
                    }
                    Some("CLOSED")
                        if arr.get(1).and_then(|v| v.as_str()) == Some(sub_id.as_str()) =>
                    {
                        break;
                    }
                    _ => {}
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(Session::Disconnected)
}
