use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::ChatStore;

pub const CLEANUP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Delete messages older than `retention_days`, once per `period`. The first
/// pass runs at startup.
pub fn spawn_retention_cleanup(
    store: Arc<dyn ChatStore>,
    retention_days: u32,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
                    match store.cleanup_old_messages(cutoff).await {
                        Ok(0) => {}
                        Ok(removed) => tracing::info!(removed, %cutoff, "expired messages removed"),
                        Err(e) => tracing::warn!(error = %e, "message cleanup failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
