//! Shared application state for the chatwire gateway.
//!
//! Owns the realtime core (registry + egress), the chat routing service, the
//! metrics registry and the shutdown signal observed by every session and
//! background task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use chatwire_core::error::Result;
use chatwire_core::protocol::relay::RelayConfigResponse;

use crate::config::GatewayConfig;
use crate::obs::GatewayMetrics;
use crate::realtime::{LivenessMonitor, RealtimeCore};
use crate::relay::{PusherRelay, RelayPublisher};
use crate::services::ChatService;
use crate::store::{self, ChatStore};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: GatewayConfig,
    relay_config: RelayConfigResponse,
    realtime: Arc<RealtimeCore>,
    chat: Arc<ChatService>,
    metrics: Arc<GatewayMetrics>,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Build state from already-constructed collaborators (tests inject an
    /// in-memory store and a fake relay here).
    pub fn new(
        cfg: GatewayConfig,
        store: Arc<dyn ChatStore>,
        relay: Option<Arc<dyn RelayPublisher>>,
    ) -> Self {
        let metrics = Arc::new(GatewayMetrics::default());
        let realtime = Arc::new(RealtimeCore::new(metrics.clone()));

        let relay_config = match &cfg.relay {
            Some(r) if relay.is_some() => RelayConfigResponse::pusher(&r.key, &r.cluster),
            _ => RelayConfigResponse::offline(),
        };

        let chat = Arc::new(ChatService::new(
            store,
            realtime.clone(),
            relay,
            metrics.clone(),
            cfg.gateway.typing_requires_friendship,
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(AppStateInner {
                cfg,
                relay_config,
                realtime,
                chat,
                metrics,
                shutdown,
            }),
        }
    }

    /// Open the configured store and relay, then build state.
    pub async fn from_config(cfg: GatewayConfig) -> Result<Self> {
        let store = store::open(&cfg.store).await?;
        let relay: Option<Arc<dyn RelayPublisher>> = match &cfg.relay {
            Some(r) => {
                tracing::info!(cluster = %r.cluster, host = %r.base_url(), "relay publishing enabled");
                Some(Arc::new(PusherRelay::new(r)?))
            }
            None => {
                tracing::info!("no relay configured; offline_mode");
                None
            }
        };
        Ok(Self::new(cfg, store, relay))
    }

    pub fn cfg(&self) -> &GatewayConfig {
        &self.inner.cfg
    }

    pub fn relay_config(&self) -> &RelayConfigResponse {
        &self.inner.relay_config
    }

    pub fn realtime(&self) -> Arc<RealtimeCore> {
        Arc::clone(&self.inner.realtime)
    }

    pub fn chat(&self) -> Arc<ChatService> {
        Arc::clone(&self.inner.chat)
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }

    /// Point-in-time gauges computed at scrape time.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        let registry = self.inner.realtime.registry();
        vec![
            ("chatwire_registry_connections", registry.len() as u64),
            ("chatwire_registry_bound_identities", registry.bound_count() as u64),
        ]
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Flip to draining and tell sessions and background tasks to stop.
    pub fn begin_shutdown(&self) {
        self.inner.metrics.set_draining();
        self.inner.shutdown.send_replace(true);
    }

    pub fn spawn_liveness(&self) -> JoinHandle<()> {
        LivenessMonitor::spawn(
            self.inner.realtime.registry().clone(),
            self.metrics(),
            Duration::from_millis(self.inner.cfg.gateway.heartbeat_interval_ms),
            self.shutdown_rx(),
        )
    }
}
