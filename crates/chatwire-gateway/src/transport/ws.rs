//! WebSocket session handler.
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS and register the socket with the client registry
//! - Greet with a `system` frame, answer `ping` envelopes with `pong`
//! - Bind the connection to an identity on the first non-ping envelope
//! - Hand envelopes to the chat service; turn failures into error frames
//! - Close handling: unbind, mark offline, announce status

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::Instrument;

use chatwire_core::error::{ChatError, Result};
use chatwire_core::model::Identity;
use chatwire_core::protocol::{Envelope, ErrorFrame, ServerFrame};

use crate::app_state::AppState;
use crate::realtime::{ConnectionHandle, PreparedMsg, QoS};
use crate::transport::codec::{decode, Inbound};

const GREETING: &str = "Connected to chat server";

/// Per-connection phase. `Accepted` sockets can only ping; the first
/// identity-carrying envelope moves them to `Bound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Accepted,
    Bound(Identity),
    Closed,
}

impl SessionPhase {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionPhase::Bound(who) => Some(who),
            _ => None,
        }
    }
}

pub async fn ws_upgrade(State(app): State<AppState>, ws: WebSocketUpgrade) -> Response {
    app.metrics().ws_upgrades.inc(&[]);
    ws.on_upgrade(move |socket| async move {
        let (out_tx, out_rx) = mpsc::channel::<Message>(app.cfg().gateway.outbound_queue);
        let handle = app.realtime().registry().accept(out_tx);
        let span = tracing::info_span!("ws", conn = %handle.id());
        run_session(app, handle, out_rx, socket).instrument(span).await;
    })
}

async fn send_error(handle: &ConnectionHandle, app: &AppState, err: &ChatError) {
    app.metrics()
        .rejected
        .inc(&[("code", err.client_code().as_str())]);
    tracing::debug!(error = %err, "envelope rejected");
    let msg = PreparedMsg::error(&ErrorFrame::from_error(err));
    app.realtime().send_to(handle, &msg, QoS::RELIABLE).await;
}

async fn run_session(
    app: AppState,
    handle: ConnectionHandle,
    mut out_rx: mpsc::Receiver<Message>,
    socket: WebSocket,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut shutdown = app.shutdown_rx();
    let max_frame = app.cfg().gateway.max_frame_bytes;
    let mut phase = SessionPhase::Accepted;

    app.metrics().ws_active_sessions.inc(&[]);
    tracing::info!("connection accepted");

    let greeting = ServerFrame::system(GREETING, app.chat().relay_enabled());
    app.realtime()
        .send_to(&handle, &PreparedMsg::frame(&greeting), QoS::RELIABLE)
        .await;

    loop {
        tokio::select! {
            // outbound writer
            maybe_out = out_rx.recv() => {
                let Some(m) = maybe_out else { break; };
                if ws_tx.send(m).await.is_err() {
                    break;
                }
            }

            // inbound reader
            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else { break; };
                match decode(msg, max_frame) {
                    Ok(Inbound::Envelope(env)) => {
                        if let Err(e) = on_envelope(&app, &handle, &mut phase, env).await {
                            send_error(&handle, &app, &e).await;
                        }
                    }
                    Ok(Inbound::Pong) => app.realtime().registry().mark_alive(handle.id()),
                    // tungstenite answers control pings itself
                    Ok(Inbound::Ping) => {}
                    Ok(Inbound::Close) => break,
                    Err(e) => send_error(&handle, &app, &e).await,
                }
            }

            // evicted by liveness or superseded by a newer bind
            _ = handle.terminated() => {
                tracing::info!(phase = ?phase, "connection terminated by server");
                break;
            }

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    let last = std::mem::replace(&mut phase, SessionPhase::Closed);
    close_session(&app, &handle, last).await;
}

async fn on_envelope(
    app: &AppState,
    handle: &ConnectionHandle,
    phase: &mut SessionPhase,
    env: Envelope,
) -> Result<()> {
    app.metrics()
        .envelopes
        .inc(&[("type", env.kind()), ("path", "ws")]);

    let Some(from) = env.from_identity().cloned() else {
        // ping: legal in every phase, never binds
        let pong = PreparedMsg::frame(&ServerFrame::pong_now());
        app.realtime().send_to(handle, &pong, QoS::RELIABLE).await;
        return Ok(());
    };

    match phase {
        SessionPhase::Accepted => bind(app, handle, phase, from).await?,
        SessionPhase::Bound(bound) if *bound != from => {
            return Err(ChatError::Forbidden(format!(
                "connection is bound to {bound}, envelope claims {from}"
            )));
        }
        SessionPhase::Bound(_) => {}
        SessionPhase::Closed => return Ok(()),
    }

    app.chat().dispatch(env).await
}

async fn bind(
    app: &AppState,
    handle: &ConnectionHandle,
    phase: &mut SessionPhase,
    identity: Identity,
) -> Result<()> {
    let outcome = app
        .realtime()
        .registry()
        .bind(handle.id(), identity.clone())
        .ok_or_else(|| ChatError::Internal("connection no longer registered".into()))?;

    *phase = SessionPhase::Bound(identity.clone());
    match outcome.superseded {
        Some(old) => {
            // Identity stays online; the old socket closes without an offline transition.
            app.metrics().superseded_sessions.inc(&[]);
            tracing::info!(identity = %identity, superseded = %old.id(), "identity rebound to newer connection");
            old.terminate();
        }
        None => {
            tracing::info!(identity = %identity, "connection bound");
            if let Err(e) = app.chat().on_bind(&identity).await {
                // Registry is reachability, store is presence truth; keep the socket.
                tracing::warn!(identity = %identity, error = %e, "presence update on bind failed");
            }
        }
    }
    Ok(())
}

async fn close_session(app: &AppState, handle: &ConnectionHandle, last: SessionPhase) {
    app.metrics().ws_active_sessions.dec(&[]);
    match app.realtime().registry().unbind(handle.id()) {
        Some(identity) => {
            tracing::info!(identity = %identity, "connection closed");
            app.chat().on_close(&identity).await;
        }
        None => tracing::info!(bound = ?last.identity(), "connection closed"),
    }
}
