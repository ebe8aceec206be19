//! Heartbeat monitor: one background task ticking over the client registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::obs::GatewayMetrics;
use crate::realtime::core::ClientRegistry;

pub struct LivenessMonitor;

impl LivenessMonitor {
    /// Spawn the monitor. A connection that misses a full period without a
    /// pong is terminated on the following tick. The task ends when
    /// `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn(
        registry: Arc<ClientRegistry>,
        metrics: Arc<GatewayMetrics>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; skip it so fresh sockets get a full period.
            tick.tick().await;

            tracing::info!(period_ms = period.as_millis() as u64, "liveness monitor started");
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let report = registry.sweep();
                        for (conn, identity) in &report.evicted {
                            metrics.liveness_evictions.inc(&[]);
                            match identity {
                                Some(who) => tracing::info!(conn = %conn, identity = %who, "evicting unresponsive connection"),
                                None => tracing::info!(conn = %conn, "evicting unresponsive connection"),
                            }
                        }
                        tracing::trace!(pinged = report.pinged, evicted = report.evicted.len(), "liveness tick");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("liveness monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn evicts_silent_connection_within_two_periods() {
        let registry = Arc::new(ClientRegistry::new());
        let metrics = Arc::new(GatewayMetrics::default());
        let (tx, mut rx) = mpsc::channel(8);
        let handle = registry.accept(tx);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = LivenessMonitor::spawn(
            registry.clone(),
            metrics.clone(),
            Duration::from_millis(40),
            stop_rx,
        );

        assert!(matches!(rx.recv().await, Some(Message::Ping(_))));
        tokio::time::timeout(Duration::from_millis(500), handle.terminated())
            .await
            .unwrap();
        assert!(metrics.liveness_evictions.get(&[]) >= 1);

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn answering_pongs_keeps_connection() {
        let registry = Arc::new(ClientRegistry::new());
        let metrics = Arc::new(GatewayMetrics::default());
        let (tx, mut rx) = mpsc::channel(8);
        let handle = registry.accept(tx);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let _task = LivenessMonitor::spawn(
            registry.clone(),
            metrics.clone(),
            Duration::from_millis(30),
            stop_rx,
        );

        for _ in 0..4 {
            assert!(matches!(rx.recv().await, Some(Message::Ping(_))));
            registry.mark_alive(handle.id());
        }
        assert_eq!(metrics.liveness_evictions.get(&[]), 0);
        assert_eq!(registry.len(), 1);
    }
}
