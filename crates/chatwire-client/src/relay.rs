//! Hosted relay transport: subscribe over the relay's socket protocol,
//! publish through the gateway's HTTP endpoints.
//!
//! Channel names come from `chatwire_core::protocol::channel`, the same
//! functions the gateway publishes with.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use chatwire_core::error::ChatError;
use chatwire_core::model::Identity;
use chatwire_core::protocol::channel::subscriptions_for;
use chatwire_core::protocol::envelope::Envelope;
use chatwire_core::protocol::frames::ErrorFrame;
use chatwire_core::protocol::publish::{publish_path, StatusUpdate, PATH_RELAY_CONFIG};
use chatwire_core::protocol::relay::{decode_event, PusherPublicConfig, RelayConfigResponse};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::transport::{Inbound, RelayConnector, Transport, TransportKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PROTOCOL_VERSION: u8 = 7;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const EV_ESTABLISHED: &str = "pusher:connection_established";
const EV_ERROR: &str = "pusher:error";
const EV_PING: &str = "pusher:ping";
const EV_PONG: &str = "pusher:pong";
const EV_SUBSCRIBE: &str = "pusher:subscribe";
const EV_UNSUBSCRIBE: &str = "pusher:unsubscribe";

/// One message on the relay socket, in either direction.
#[derive(Debug, Deserialize)]
struct RelayMessage {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl RelayMessage {
    /// Event payloads arrive as JSON-encoded strings; tolerate inline objects.
    fn data_str(&self) -> String {
        match &self.data {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => String::new(),
        }
    }
}

fn control(event: &str, data: Value) -> Message {
    Message::Text(json!({ "event": event, "data": data }).to_string())
}

/// Relay socket url for a public key.
pub fn relay_socket_url(base: Option<&str>, cfg: &PusherPublicConfig) -> String {
    let base = match base {
        Some(b) => b.trim_end_matches('/').to_string(),
        None => format!("wss://ws-{}.pusher.com", cfg.cluster),
    };
    format!(
        "{base}/app/{}?protocol={PROTOCOL_VERSION}&client=chatwire&version={}",
        cfg.key,
        env!("CARGO_PKG_VERSION")
    )
}

pub struct PusherRelayConnector {
    cfg: ClientConfig,
    http: reqwest::Client,
}

impl PusherRelayConnector {
    pub fn new(cfg: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { cfg, http })
    }
}

#[async_trait]
impl RelayConnector for PusherRelayConnector {
    async fn probe(&self) -> Result<Option<PusherPublicConfig>> {
        let resp: RelayConfigResponse = self
            .http
            .get(self.cfg.endpoint(PATH_RELAY_CONFIG))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(status = ?resp.status, "relay config probed");
        Ok(resp.usable().cloned())
    }

    async fn open(&self, relay: &PusherPublicConfig) -> Result<Box<dyn Transport>> {
        let identity = self.cfg.identity()?;
        let url = relay_socket_url(self.cfg.relay_ws_url.as_deref(), relay);
        let (ws, _) = connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let socket_id = tokio::time::timeout(HANDSHAKE_TIMEOUT, await_established(&mut stream))
            .await
            .map_err(|_| ChatError::Transport("relay handshake timed out".into()))??;
        info!(cluster = %relay.cluster, socket_id = %socket_id, "relay connected");

        let (out, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, inbound) = mpsc::unbounded_channel::<Inbound>();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let last = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "relay write failed");
                    break;
                }
                if last {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pong_tx = out.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "relay receive failed");
                        break;
                    }
                };
                let Ok(ev) = serde_json::from_str::<RelayMessage>(&text) else {
                    warn!("invalid relay message");
                    continue;
                };
                match ev.event.as_str() {
                    EV_PING => {
                        let _ = pong_tx.send(control(EV_PONG, json!({})));
                    }
                    EV_ERROR => warn!(data = %ev.data_str(), "relay error"),
                    name if name.starts_with("pusher") => {
                        debug!(event = name, channel = ?ev.channel, "relay control event");
                    }
                    name => match decode_event(name, &ev.data_str()) {
                        Ok(frame) => {
                            if in_tx.send(Inbound::Frame(frame)).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(event = name, error = %e, "ignoring relay event"),
                    },
                }
            }
        });

        let mut transport = RelayTransport {
            cfg: self.cfg.clone(),
            http: self.http.clone(),
            identity,
            out,
            inbound,
            reader,
            channels: BTreeSet::new(),
            closed: false,
        };
        for ch in subscriptions_for(&transport.identity) {
            transport.subscribe(ch)?;
        }
        if let Err(e) = transport.publish_status(true).await {
            warn!(error = %e, "presence update over http failed");
        }
        Ok(Box::new(transport))
    }
}

async fn await_established(stream: &mut SplitStream<WsStream>) -> Result<String> {
    while let Some(msg) = stream.next().await {
        let Message::Text(text) = msg? else {
            continue;
        };
        let Ok(ev) = serde_json::from_str::<RelayMessage>(&text) else {
            continue;
        };
        match ev.event.as_str() {
            EV_ESTABLISHED => {
                let data: Value = serde_json::from_str(&ev.data_str()).unwrap_or(Value::Null);
                return Ok(data["socket_id"].as_str().unwrap_or_default().to_string());
            }
            EV_ERROR => {
                return Err(ChatError::Transport(format!(
                    "relay refused connection: {}",
                    ev.data_str()
                ))
                .into())
            }
            _ => {}
        }
    }
    Err(ClientError::Closed)
}

pub struct RelayTransport {
    cfg: ClientConfig,
    http: reqwest::Client,
    identity: Identity,
    out: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    reader: JoinHandle<()>,
    channels: BTreeSet<String>,
    closed: bool,
}

impl RelayTransport {
    /// Channels currently subscribed.
    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    fn subscribe(&mut self, channel: String) -> Result<()> {
        self.out
            .send(control(EV_SUBSCRIBE, json!({ "channel": channel })))
            .map_err(|_| ClientError::Closed)?;
        debug!(channel = %channel, "relay subscribe");
        self.channels.insert(channel);
        Ok(())
    }

    async fn post(&self, url: impl reqwest::IntoUrl, body: String) -> Result<()> {
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        let frame = serde_json::from_str::<ErrorFrame>(&text).unwrap_or(ErrorFrame {
            error: text,
            code: None,
        });
        Err(ClientError::Rejected {
            status: status.as_u16(),
            frame,
        })
    }

    async fn publish_status(&self, is_online: bool) -> Result<()> {
        let body = serde_json::to_string(&StatusUpdate { is_online })
            .map_err(|e| ChatError::Internal(e.to_string()))?;
        self.post(self.cfg.status_url(&self.identity)?, body).await
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    async fn send(&mut self, env: &Envelope) -> Result<()> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        match publish_path(env) {
            Some(path) => self.post(self.cfg.endpoint(path), env.to_json()).await,
            None => Ok(()),
        }
    }

    async fn recv(&mut self) -> Option<Inbound> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let channels: Vec<String> = std::mem::take(&mut self.channels).into_iter().collect();
        for channel in &channels {
            let _ = self
                .out
                .send(control(EV_UNSUBSCRIBE, json!({ "channel": channel })));
        }
        let _ = self.out.send(Message::Close(None));
        self.reader.abort();

        if let (Ok(rt), Ok(url)) = (
            tokio::runtime::Handle::try_current(),
            self.cfg.status_url(&self.identity),
        ) {
            let http = self.http.clone();
            rt.spawn(async move {
                let sent = http
                    .post(url)
                    .json(&StatusUpdate { is_online: false })
                    .send()
                    .await;
                if let Err(e) = sent {
                    debug!(error = %e, "offline status not delivered");
                }
            });
        }
        debug!(unsubscribed = channels.len(), "relay transport closed");
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn hosted_url_uses_cluster_and_key() {
        let cfg = PusherPublicConfig {
            key: "abc".into(),
            cluster: "eu".into(),
        };
        let url = relay_socket_url(None, &cfg);
        assert!(url.starts_with("wss://ws-eu.pusher.com/app/abc?protocol=7"));
        let local = relay_socket_url(Some("ws://127.0.0.1:6001/"), &cfg);
        assert!(local.starts_with("ws://127.0.0.1:6001/app/abc?"));
    }

    #[test]
    fn event_data_may_be_string_or_object() {
        let m: RelayMessage =
            serde_json::from_str(r#"{"event":"typing","channel":"c","data":"{\"a\":1}"}"#).unwrap();
        assert_eq!(m.data_str(), r#"{"a":1}"#);
        let m: RelayMessage =
            serde_json::from_str(r#"{"event":"typing","data":{"a":1}}"#).unwrap();
        assert_eq!(m.data_str(), r#"{"a":1}"#);
    }
}
