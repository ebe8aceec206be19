//! Gateway WebSocket transport.
//!
//! A reader task decodes server frames into a channel, a writer task owns the
//! sink, and a heartbeat task sends application `ping` envelopes. Opening the
//! socket immediately announces the own identity so the gateway binds the
//! connection and marks it online.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use chatwire_core::model::Identity;
use chatwire_core::protocol::envelope::{Envelope, PingEnvelope, TypingEnvelope};
use chatwire_core::protocol::frames::{decode_server_payload, ServerPayload};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::transport::{Inbound, SocketConnector, Transport, TransportKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens [`SocketTransport`]s against the configured gateway.
pub struct WsSocketConnector {
    cfg: ClientConfig,
}

impl WsSocketConnector {
    pub fn new(cfg: ClientConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl SocketConnector for WsSocketConnector {
    async fn open(&self) -> Result<Box<dyn Transport>> {
        let url = self.cfg.socket_url()?;
        let identity = self.cfg.identity()?;
        let (stream, _) = connect_async(url.as_str()).await?;
        info!(url = %url, identity = %identity, "socket connected");

        let transport = SocketTransport::start(
            stream,
            identity,
            Duration::from_millis(self.cfg.heartbeat_interval_ms),
        )?;
        Ok(Box::new(transport))
    }
}

pub struct SocketTransport {
    out: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    closed: bool,
}

impl SocketTransport {
    fn start(stream: WsStream, identity: Identity, heartbeat: Duration) -> Result<Self> {
        let (mut sink, mut reader) = stream.split();
        let (out, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, inbound) = mpsc::unbounded_channel::<Inbound>();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let last = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "socket write failed");
                    break;
                }
                if last {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match decode_server_payload(&text) {
                        Ok(ServerPayload::Frame(frame)) => {
                            if in_tx.send(Inbound::Frame(frame)).is_err() {
                                break;
                            }
                        }
                        Ok(ServerPayload::Error(err)) => {
                            if in_tx.send(Inbound::Error(err)).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "invalid server frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "socket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "socket receive failed");
                        break;
                    }
                }
            }
        });

        let beat_tx = out.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
            loop {
                ticker.tick().await;
                let ping = Envelope::Ping(PingEnvelope {
                    timestamp: Some(Utc::now()),
                });
                if beat_tx.send(Message::Text(ping.to_json())).is_err() {
                    break;
                }
            }
        });

        let announce = Envelope::Typing(TypingEnvelope {
            from_identity: identity,
            to_identity: None,
            is_typing: false,
        });
        out.send(Message::Text(announce.to_json()))
            .map_err(|_| ClientError::Closed)?;

        Ok(Self {
            out,
            inbound,
            reader,
            heartbeat,
            closed: false,
        })
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn send(&mut self, env: &Envelope) -> Result<()> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        self.out
            .send(Message::Text(env.to_json()))
            .map_err(|_| ClientError::Closed)
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
        self.heartbeat.abort();
        self.reader.abort();
        // The writer flushes the close frame and exits on its own.
        let _ = self.out.send(Message::Close(None));
        debug!("socket transport closed");
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}
