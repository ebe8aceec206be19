#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use chatwire_client::{ClientConfig, ClientEvent, TransportSelector};
use chatwire_core::model::Identity;
use chatwire_core::protocol::frames::ServerFrame;
use chatwire_gateway::app_state::AppState;
use chatwire_gateway::config::{self, GatewayConfig, RelaySection};
use chatwire_gateway::relay::{PusherRelay, RelayPublisher};
use chatwire_gateway::router;
use chatwire_gateway::store::MemoryStore;

pub fn id(s: &str) -> Identity {
    Identity::parse(s).unwrap()
}

pub fn client_config(server: &str, who: &str) -> ClientConfig {
    let mut cfg = ClientConfig::new(server, who);
    cfg.reconnect_delay_ms = 20;
    cfg
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// --------------------
// Real gateway
// --------------------

pub struct Gateway {
    pub url: String,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub async fn spawn_gateway() -> Gateway {
    let cfg = config::load_from_str("version: 1\n").unwrap();
    start_gateway(cfg, None).await
}

/// Gateway in pusher_mode whose REST triggers land on `relay`.
pub async fn spawn_relay_gateway(relay: &FakeRelay) -> Gateway {
    let mut cfg = config::load_from_str("version: 1\n").unwrap();
    let section = RelaySection {
        app_id: "1".into(),
        key: "app-key".into(),
        secret: "app-secret".into(),
        cluster: "test".into(),
        host: Some(relay.http_url.clone()),
    };
    let publisher: Arc<dyn RelayPublisher> = Arc::new(PusherRelay::new(&section).unwrap());
    cfg.relay = Some(section);
    start_gateway(cfg, Some(publisher)).await
}

async fn start_gateway(cfg: GatewayConfig, relay: Option<Arc<dyn RelayPublisher>>) -> Gateway {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(cfg, store.clone(), relay);
    let addr = serve(router::build_router(state.clone())).await;
    Gateway {
        url: format!("http://{addr}"),
        state,
        store,
    }
}

// --------------------
// Fake relay service: socket side plus the REST trigger endpoint
// --------------------

#[derive(Clone)]
pub struct FakeRelay {
    pub url: String,
    pub http_url: String,
    seen: Arc<Mutex<Vec<Value>>>,
    push: broadcast::Sender<(String, String)>,
}

impl FakeRelay {
    /// Control messages received from clients, in order.
    pub fn seen(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }

    /// Channels named by `event` messages, in order.
    pub fn channels(&self, event: &str) -> Vec<String> {
        self.seen()
            .iter()
            .filter(|m| m["event"] == event)
            .map(|m| m["data"]["channel"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Deliver an event to every connection subscribed to `channel`.
    pub fn publish(&self, channel: &str, event: &str, data: &str) {
        let msg = json!({ "event": event, "channel": channel, "data": data });
        // No receivers just means nobody is connected yet.
        let _ = self.push.send((channel.to_string(), msg.to_string()));
    }
}

pub async fn spawn_fake_relay() -> FakeRelay {
    let (push, _) = broadcast::channel(64);
    let mut relay = FakeRelay {
        url: String::new(),
        http_url: String::new(),
        seen: Arc::new(Mutex::new(Vec::new())),
        push,
    };
    let app = Router::new()
        .route("/app/:key", get(relay_ws))
        .route("/apps/:app_id/events", post(relay_trigger))
        .with_state(relay.clone());
    let addr = serve(app).await;
    relay.url = format!("ws://{addr}");
    relay.http_url = format!("http://{addr}");
    relay
}

/// Fan a REST trigger out to each listed channel. Signatures are not checked.
async fn relay_trigger(State(relay): State<FakeRelay>, Json(body): Json<Value>) -> Json<Value> {
    let event = body["name"].as_str().unwrap_or_default();
    let data = body["data"].as_str().unwrap_or_default();
    for channel in body["channels"].as_array().into_iter().flatten() {
        relay.publish(channel.as_str().unwrap_or_default(), event, data);
    }
    Json(json!({}))
}

async fn relay_ws(ws: WebSocketUpgrade, State(relay): State<FakeRelay>) -> Response {
    ws.on_upgrade(move |socket| relay_session(socket, relay))
}

async fn relay_session(mut socket: WebSocket, relay: FakeRelay) {
    let mut push = relay.push.subscribe();
    let mut subscribed = HashSet::new();
    let established = json!({
        "event": "pusher:connection_established",
        "data": json!({"socket_id": "1.1", "activity_timeout": 120}).to_string(),
    });
    if socket.send(Message::Text(established.to_string())).await.is_err() {
        return;
    }
    let ping = json!({"event": "pusher:ping", "data": "{}"});
    let _ = socket.send(Message::Text(ping.to_string())).await;

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(t))) => {
                    let msg: Value = serde_json::from_str(&t).unwrap();
                    let channel = msg["data"]["channel"].as_str().unwrap_or_default().to_string();
                    match msg["event"].as_str() {
                        Some("pusher:subscribe") => {
                            subscribed.insert(channel);
                        }
                        Some("pusher:unsubscribe") => {
                            subscribed.remove(&channel);
                        }
                        _ => {}
                    }
                    relay.seen.lock().unwrap().push(msg);
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            out = push.recv() => match out {
                Ok((channel, text)) => {
                    if subscribed.contains(&channel)
                        && socket.send(Message::Text(text)).await.is_err()
                    {
                        break;
                    }
                }
                Err(_) => break,
            },
        }
    }
}

// --------------------
// Gateway stand-in whose first socket is dropped right after upgrade
// --------------------

#[derive(Clone)]
pub struct FlakyGateway {
    pub url: String,
    upgrades: Arc<AtomicUsize>,
}

impl FlakyGateway {
    pub fn upgrades(&self) -> usize {
        self.upgrades.load(Ordering::SeqCst)
    }
}

pub async fn spawn_flaky_gateway() -> FlakyGateway {
    let mut gw = FlakyGateway {
        url: String::new(),
        upgrades: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/relay/config", get(offline_config))
        .route("/ws", get(flaky_ws))
        .with_state(gw.clone());
    let addr = serve(app).await;
    gw.url = format!("http://{addr}");
    gw
}

async fn offline_config() -> impl IntoResponse {
    Json(json!({"status": "offline_mode", "pusher_config": null}))
}

async fn flaky_ws(ws: WebSocketUpgrade, State(gw): State<FlakyGateway>) -> Response {
    let n = gw.upgrades.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |mut socket| async move {
        let hello = ServerFrame::system("connected", false).to_json();
        let _ = socket.send(Message::Text(hello)).await;
        if n == 0 {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

// --------------------
// Selector helpers
// --------------------

/// Next event within two seconds.
pub async fn next(sel: &mut TransportSelector) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(2), sel.next_event())
        .await
        .expect("timed out waiting for a client event")
        .expect("selector finished")
}

/// Skip events until a frame satisfying `want` arrives.
pub async fn next_frame<F>(sel: &mut TransportSelector, want: F) -> ServerFrame
where
    F: Fn(&ServerFrame) -> bool,
{
    loop {
        if let ClientEvent::Frame(f) = next(sel).await {
            if want(&f) {
                return f;
            }
        }
    }
}

/// Poll `cond` for up to two seconds.
pub async fn eventually<F: FnMut() -> bool>(mut cond: F) {
    for _ in 0..40 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met in time");
}
