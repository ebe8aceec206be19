//! Identity -> live connection map.
//!
//! Every accepted socket is tracked from the moment it is upgraded; the
//! identity is attached lazily by the first non-ping envelope. At most one
//! connection is reachable per identity: a newer bind supersedes the older
//! one, which the caller then terminates.
//!
//! All operations take the same mutex, so bind/unbind/sweep never interleave.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::ws::Message;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use chatwire_core::model::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Cloneable handle to one session's outbound queue plus its kill switch.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    tx: mpsc::Sender<Message>,
    kill: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn sender(&self) -> &mpsc::Sender<Message> {
        &self.tx
    }

    /// Ask the owning session loop to close. Idempotent; the permit is kept
    /// if the loop is not currently waiting.
    pub fn terminate(&self) {
        self.kill.notify_one();
    }

    /// Resolves once `terminate` has been called.
    pub async fn terminated(&self) {
        self.kill.notified().await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle").field("id", &self.id).finish()
    }
}

#[derive(Debug)]
pub struct BindOutcome {
    /// Prior connection for the same identity, still open. Caller closes it.
    pub superseded: Option<ConnectionHandle>,
}

impl BindOutcome {
    /// No other connection held this identity.
    pub fn is_fresh(&self) -> bool {
        self.superseded.is_none()
    }
}

/// Result of one liveness tick.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub evicted: Vec<(ConnId, Option<Identity>)>,
    pub pinged: usize,
}

struct Entry {
    handle: ConnectionHandle,
    identity: Option<Identity>,
    alive: bool,
    /// Terminated by a sweep; waiting for its session to unregister.
    evicting: bool,
    last_pong: Instant,
}

#[derive(Default)]
struct Inner {
    conns: HashMap<ConnId, Entry>,
    by_identity: HashMap<Identity, ConnId>,
}

#[derive(Default)]
pub struct ClientRegistry {
    inner: Mutex<Inner>,
    seq: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Entries stay consistent even if a holder panicked mid-iteration.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a freshly upgraded socket (not yet bound to an identity).
    pub fn accept(&self, tx: mpsc::Sender<Message>) -> ConnectionHandle {
        let id = ConnId(self.seq.fetch_add(1, Ordering::Relaxed) + 1);
        let handle = ConnectionHandle {
            id,
            tx,
            kill: Arc::new(Notify::new()),
        };
        self.lock().conns.insert(
            id,
            Entry {
                handle: handle.clone(),
                identity: None,
                alive: true,
                evicting: false,
                last_pong: Instant::now(),
            },
        );
        handle
    }

    /// Attach `identity` to `conn`. Returns `None` when `conn` is no longer
    /// registered (it closed or was evicted concurrently).
    pub fn bind(&self, conn: ConnId, identity: Identity) -> Option<BindOutcome> {
        let mut inner = self.lock();
        if !inner.conns.contains_key(&conn) {
            return None;
        }

        let superseded = match inner.by_identity.insert(identity.clone(), conn) {
            Some(prev) if prev != conn => inner.conns.get_mut(&prev).map(|e| {
                e.identity = None;
                e.handle.clone()
            }),
            _ => None,
        };

        if let Some(e) = inner.conns.get_mut(&conn) {
            e.identity = Some(identity);
        }
        Some(BindOutcome { superseded })
    }

    pub fn lookup(&self, identity: &Identity) -> Option<ConnectionHandle> {
        let inner = self.lock();
        let id = inner.by_identity.get(identity)?;
        inner.conns.get(id).map(|e| e.handle.clone())
    }

    /// Drop `conn`. The identity is returned only if it still pointed at this
    /// connection, i.e. the caller is responsible for marking it offline.
    pub fn unbind(&self, conn: ConnId) -> Option<Identity> {
        let mut inner = self.lock();
        let entry = inner.conns.remove(&conn)?;
        let identity = entry.identity?;
        if inner.by_identity.get(&identity) == Some(&conn) {
            inner.by_identity.remove(&identity);
            Some(identity)
        } else {
            None
        }
    }

    /// Snapshot of every open connection, bound or not.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.lock().conns.values().map(|e| e.handle.clone()).collect()
    }

    pub fn for_each(&self, mut f: impl FnMut(&ConnectionHandle)) {
        let inner = self.lock();
        inner.conns.values().for_each(|e| f(&e.handle));
    }

    pub fn identity_of(&self, conn: ConnId) -> Option<Identity> {
        self.lock().conns.get(&conn).and_then(|e| e.identity.clone())
    }

    pub fn mark_alive(&self, conn: ConnId) {
        if let Some(e) = self.lock().conns.get_mut(&conn) {
            e.alive = true;
            e.last_pong = Instant::now();
        }
    }

    /// One liveness tick: terminate connections that never answered the
    /// previous ping, flag the rest as awaiting and ping them.
    pub fn sweep(&self) -> SweepReport {
        let mut inner = self.lock();
        let mut report = SweepReport::default();
        for (id, e) in inner.conns.iter_mut() {
            if e.evicting {
                continue;
            }
            if !e.alive {
                tracing::debug!(conn = %id, since = ?e.last_pong.elapsed(), "no pong since last tick");
                e.evicting = true;
                e.handle.terminate();
                report.evicted.push((*id, e.identity.clone()));
                continue;
            }
            e.alive = false;
            if e.handle.tx.try_send(Message::Ping(Vec::new())).is_ok() {
                report.pinged += 1;
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.lock().conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bound_count(&self) -> usize {
        self.lock().by_identity.len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn conn(reg: &ClientRegistry) -> (ConnectionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (reg.accept(tx), rx)
    }

    #[test]
    fn bind_and_lookup() {
        let reg = ClientRegistry::new();
        let (h, _rx) = conn(&reg);
        assert!(reg.bind(h.id(), id("0xa")).unwrap().is_fresh());
        assert_eq!(reg.lookup(&id("0xa")).unwrap().id(), h.id());
        assert!(reg.lookup(&id("0xb")).is_none());
        assert_eq!(reg.identity_of(h.id()), Some(id("0xa")));
    }

    #[test]
    fn newer_bind_supersedes_and_old_close_keeps_successor() {
        let reg = ClientRegistry::new();
        let (old, _r1) = conn(&reg);
        let (new, _r2) = conn(&reg);
        reg.bind(old.id(), id("0xa")).unwrap();

        let outcome = reg.bind(new.id(), id("0xa")).unwrap();
        assert_eq!(outcome.superseded.unwrap().id(), old.id());
        assert_eq!(reg.lookup(&id("0xa")).unwrap().id(), new.id());

        // Closing the superseded connection must not unbind the successor.
        assert_eq!(reg.unbind(old.id()), None);
        assert_eq!(reg.lookup(&id("0xa")).unwrap().id(), new.id());
        assert_eq!(reg.unbind(new.id()), Some(id("0xa")));
        assert!(reg.is_empty());
    }

    #[test]
    fn rebinding_same_connection_is_not_a_supersede() {
        let reg = ClientRegistry::new();
        let (h, _rx) = conn(&reg);
        reg.bind(h.id(), id("0xa")).unwrap();
        assert!(reg.bind(h.id(), id("0xa")).unwrap().is_fresh());
        assert_eq!(reg.bound_count(), 1);
    }

    #[test]
    fn bind_after_unbind_is_rejected() {
        let reg = ClientRegistry::new();
        let (h, _rx) = conn(&reg);
        assert_eq!(reg.unbind(h.id()), None);
        assert!(reg.bind(h.id(), id("0xa")).is_none());
        assert!(reg.lookup(&id("0xa")).is_none());
    }

    #[test]
    fn for_each_sees_unbound_connections() {
        let reg = ClientRegistry::new();
        let (a, _r1) = conn(&reg);
        let (_b, _r2) = conn(&reg);
        reg.bind(a.id(), id("0xa")).unwrap();
        let mut n = 0;
        reg.for_each(|_| n += 1);
        assert_eq!(n, 2);
        assert_eq!(reg.handles().len(), 2);
    }

    #[tokio::test]
    async fn sweep_pings_then_evicts_silent_connections() {
        let reg = ClientRegistry::new();
        let (silent, mut silent_rx) = conn(&reg);
        let (chatty, mut chatty_rx) = conn(&reg);
        reg.bind(silent.id(), id("0xa")).unwrap();

        let first = reg.sweep();
        assert!(first.evicted.is_empty());
        assert_eq!(first.pinged, 2);
        assert!(matches!(silent_rx.recv().await, Some(Message::Ping(_))));
        assert!(matches!(chatty_rx.recv().await, Some(Message::Ping(_))));

        reg.mark_alive(chatty.id());
        let second = reg.sweep();
        assert_eq!(second.evicted, vec![(silent.id(), Some(id("0xa")))]);
        assert_eq!(second.pinged, 1);

        // The kill permit is stored for the session loop to pick up.
        tokio::time::timeout(std::time::Duration::from_millis(100), silent.terminated())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn evicted_connection_is_reported_once_until_unregistered() {
        let reg = ClientRegistry::new();
        let (silent, _silent_rx) = conn(&reg);
        reg.bind(silent.id(), id("0xa")).unwrap();

        assert!(reg.sweep().evicted.is_empty());
        assert_eq!(reg.sweep().evicted.len(), 1);

        // The session has not unregistered yet; later ticks leave it alone.
        let third = reg.sweep();
        assert!(third.evicted.is_empty());
        assert_eq!(third.pinged, 0);
        assert!(reg.sweep().evicted.is_empty());
        assert_eq!(reg.len(), 1);
    }
}
