#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use chatwire_core::model::Identity;
use chatwire_gateway::app_state::AppState;
use chatwire_gateway::config::{self, GatewayConfig};
use chatwire_gateway::relay::RelayPublisher;
use chatwire_gateway::router;
use chatwire_gateway::store::MemoryStore;

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn connect(&self) -> Ws {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("ws connect");
        ws
    }

    /// Connect, swallow the greeting, and bind `who` with a broadcast typing
    /// envelope (bind side effect only: broadcast typing is never delivered).
    pub async fn connect_as(&self, who: &str) -> Ws {
        let mut ws = self.connect().await;
        let greeting = recv_json(&mut ws).await;
        assert_eq!(greeting["type"], "system");
        send_json(
            &mut ws,
            serde_json::json!({"type": "typing", "fromIdentity": who, "toIdentity": null}),
        )
        .await;
        let status = recv_json(&mut ws).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["identity"], who);
        ws
    }
}

pub fn default_config() -> GatewayConfig {
    config::load_from_str("version: 1\n").unwrap()
}

pub async fn spawn_server() -> TestServer {
    spawn_with(default_config(), None).await
}

pub async fn spawn_with(cfg: GatewayConfig, relay: Option<Arc<dyn RelayPublisher>>) -> TestServer {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(cfg, store.clone(), relay);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router::build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer { addr, state, store }
}

pub fn id(s: &str) -> Identity {
    Identity::parse(s).unwrap()
}

pub async fn send_json(ws: &mut Ws, v: Value) {
    ws.send(Message::Text(v.to_string())).await.unwrap();
}

pub async fn send_raw(ws: &mut Ws, raw: &str) {
    ws.send(Message::Text(raw.to_string())).await.unwrap();
}

/// Next JSON text frame, skipping control frames.
pub async fn recv_json(ws: &mut Ws) -> Value {
    try_recv_json(ws, Duration::from_secs(2))
        .await
        .expect("expected a frame")
}

pub async fn try_recv_json(ws: &mut Ws, wait: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        let next = tokio::time::timeout(left, ws.next()).await.ok()?;
        match next {
            Some(Ok(Message::Text(t))) => return Some(serde_json::from_str(&t).unwrap()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(other)) => panic!("unexpected frame {other:?}"),
        }
    }
}

/// Assert nothing but control frames arrive for a short window.
pub async fn assert_silent(ws: &mut Ws) {
    if let Some(v) = try_recv_json(ws, Duration::from_millis(150)).await {
        panic!("expected silence, got {v}");
    }
}

/// Read frames until the socket goes quiet.
pub async fn drain(ws: &mut Ws) -> Vec<Value> {
    let mut out = Vec::new();
    while let Some(v) = try_recv_json(ws, Duration::from_millis(150)).await {
        out.push(v);
    }
    out
}

/// Poll `cond` for up to two seconds.
pub async fn eventually<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..40 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met in time");
}
