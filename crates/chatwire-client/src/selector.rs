//! Transport selection state machine.
//!
//! ```text
//! Init -> ProbingRelay -> RelayActive
//!                      -> ProbingSocket -> SocketActive -> Reconnecting -> SocketActive | RelayActive
//! (any) -> Unavailable | Closed
//! ```
//!
//! Relay mode is sticky: once adopted the socket is never opened again for
//! the session. The selector is driven by a single task through
//! [`TransportSelector::next_event`]; [`SelectorHandle`] lets another task
//! cancel it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use chatwire_core::model::{Identity, MessageId};
use chatwire_core::protocol::envelope::{
    Envelope, MessageEnvelope, ReactionEnvelope, TypingEnvelope,
};
use chatwire_core::protocol::frames::{ErrorFrame, ServerFrame};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::notify::{FailureClass, Notification, Notifier};
use crate::relay::PusherRelayConnector;
use crate::socket::WsSocketConnector;
use crate::transport::{Inbound, RelayConnector, SocketConnector, Transport, TransportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Init,
    ProbingRelay,
    RelayActive,
    ProbingSocket,
    SocketActive,
    Reconnecting { attempt: u32 },
    Unavailable,
    Closed,
}

impl SelectorState {
    pub fn is_active(self) -> bool {
        matches!(self, SelectorState::RelayActive | SelectorState::SocketActive)
    }
}

/// What the selector hands to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Frame(ServerFrame),
    /// Error frame answering one of our own envelopes.
    ServerError(ErrorFrame),
    TransportChanged(TransportKind),
    /// First occurrence of a failure class this session.
    Notice(Notification),
}

/// Cancels a selector from outside its driving task.
#[derive(Clone)]
pub struct SelectorHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl SelectorHandle {
    /// Interrupt any reconnect wait and make the selector shut down on its
    /// next step.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

pub struct TransportSelector {
    identity: Identity,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
    socket: Arc<dyn SocketConnector>,
    relay: Arc<dyn RelayConnector>,
    state: SelectorState,
    active: Option<Box<dyn Transport>>,
    notifier: Notifier,
    pending: VecDeque<ClientEvent>,
    cancel: Arc<watch::Sender<bool>>,
}

impl TransportSelector {
    /// Selector over the real gateway socket and hosted relay.
    pub fn from_config(cfg: ClientConfig) -> Result<Self> {
        cfg.validate()?;
        let socket = Arc::new(WsSocketConnector::new(cfg.clone()));
        let relay = Arc::new(PusherRelayConnector::new(cfg.clone())?);
        Self::new(&cfg, socket, relay)
    }

    pub fn new(
        cfg: &ClientConfig,
        socket: Arc<dyn SocketConnector>,
        relay: Arc<dyn RelayConnector>,
    ) -> Result<Self> {
        let (cancel, _) = watch::channel(false);
        Ok(Self {
            identity: cfg.identity()?,
            reconnect_delay: Duration::from_millis(cfg.reconnect_delay_ms),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            socket,
            relay,
            state: SelectorState::Init,
            active: None,
            notifier: Notifier::default(),
            pending: VecDeque::new(),
            cancel: Arc::new(cancel),
        })
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.active.as_ref().map(|t| t.kind())
    }

    /// Every notification raised so far, in order.
    pub fn notifications(&self) -> &[Notification] {
        self.notifier.history()
    }

    pub fn handle(&self) -> SelectorHandle {
        SelectorHandle {
            cancel: Arc::clone(&self.cancel),
        }
    }

    /// Pick the initial transport. Idempotent once past `Init`.
    pub async fn start(&mut self) -> Result<TransportKind> {
        if self.state != SelectorState::Init {
            return self.transport_kind().ok_or(ClientError::Unavailable);
        }

        self.state = SelectorState::ProbingRelay;
        if self.try_relay().await {
            return Ok(TransportKind::Relay);
        }

        self.state = SelectorState::ProbingSocket;
        match self.socket.open().await {
            Ok(t) => {
                self.activate(t, SelectorState::SocketActive);
                Ok(TransportKind::Socket)
            }
            Err(e) => {
                self.raise(FailureClass::SocketOpen, format!("could not open socket: {e}"));
                if self.try_relay().await {
                    return Ok(TransportKind::Relay);
                }
                self.become_unavailable();
                Err(ClientError::Unavailable)
            }
        }
    }

    /// Next event for the consumer. Drives startup, reconnects and fallback;
    /// `None` once the selector is `Unavailable` or `Closed` and every
    /// pending event has been handed out.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        loop {
            if *self.cancel.borrow() && self.state != SelectorState::Closed {
                self.shutdown();
            }
            if let Some(ev) = self.pending.pop_front() {
                return Some(ev);
            }
            match self.state {
                SelectorState::Init => {
                    let _ = self.start().await;
                    continue;
                }
                s if s.is_active() => {}
                _ => return None,
            }

            let mut cancel = self.cancel.subscribe();
            let received = match self.active.as_mut() {
                Some(active) => tokio::select! {
                    next = active.recv() => Some(next),
                    _ = cancel.changed() => None,
                },
                None => Some(None),
            };

            match received {
                None => continue,
                Some(Some(Inbound::Frame(ServerFrame::Pong(_)))) => continue,
                Some(Some(Inbound::Frame(frame))) => return Some(ClientEvent::Frame(frame)),
                Some(Some(Inbound::Error(err))) => return Some(ClientEvent::ServerError(err)),
                Some(None) => self.on_transport_lost().await,
            }
        }
    }

    /// Send through the active transport. Without one the caller always
    /// gets `Err(Unavailable)`; the notification is raised only once.
    pub async fn send(&mut self, env: Envelope) -> Result<()> {
        let usable = self.state.is_active();
        match self.active.as_mut() {
            Some(active) if usable => active.send(&env).await,
            _ => {
                self.raise(FailureClass::Unavailable, "chat is unavailable");
                Err(ClientError::Unavailable)
            }
        }
    }

    pub async fn send_message(&mut self, content: impl Into<String>, to: Option<Identity>) -> Result<()> {
        let env = Envelope::Message(MessageEnvelope {
            content: content.into(),
            from_identity: self.identity.clone(),
            to_identity: to,
            timestamp: Some(chrono::Utc::now()),
        });
        self.send(env).await
    }

    pub async fn send_typing(&mut self, to: Option<Identity>, is_typing: bool) -> Result<()> {
        let env = Envelope::Typing(TypingEnvelope {
            from_identity: self.identity.clone(),
            to_identity: to,
            is_typing,
        });
        self.send(env).await
    }

    pub async fn send_reaction(&mut self, message_id: MessageId, emoji: impl Into<String>) -> Result<()> {
        let env = Envelope::Reaction(ReactionEnvelope {
            message_id,
            from_identity: self.identity.clone(),
            emoji: emoji.into(),
        });
        self.send(env).await
    }

    /// Stop every timer and close the active transport. Synchronous.
    pub fn shutdown(&mut self) {
        self.cancel.send_replace(true);
        if let Some(mut t) = self.active.take() {
            t.close();
        }
        self.pending.clear();
        if self.state != SelectorState::Closed {
            info!(identity = %self.identity, "transport selector closed");
        }
        self.state = SelectorState::Closed;
    }

    async fn try_relay(&mut self) -> bool {
        let cfg = match self.relay.probe().await {
            Ok(Some(cfg)) => cfg,
            Ok(None) => {
                debug!("relay in offline_mode");
                return false;
            }
            Err(e) => {
                self.raise(FailureClass::RelayProbe, format!("relay config unavailable: {e}"));
                return false;
            }
        };
        match self.relay.open(&cfg).await {
            Ok(t) => {
                self.activate(t, SelectorState::RelayActive);
                true
            }
            Err(e) => {
                self.raise(FailureClass::RelayConnect, format!("could not reach relay: {e}"));
                false
            }
        }
    }

    async fn on_transport_lost(&mut self) {
        let was_relay = self.state == SelectorState::RelayActive;
        if let Some(mut t) = self.active.take() {
            t.close();
        }
        if was_relay {
            self.raise(FailureClass::RelayLost, "relay connection lost");
            self.become_unavailable();
            return;
        }
        self.raise(FailureClass::SocketLost, "connection lost, reconnecting");
        self.reconnect().await;
    }

    async fn reconnect(&mut self) {
        self.state = SelectorState::Reconnecting { attempt: 0 };
        if self.try_relay().await {
            return;
        }

        let mut cancel = self.cancel.subscribe();
        for attempt in 1..=self.max_reconnect_attempts {
            self.state = SelectorState::Reconnecting { attempt };
            if *cancel.borrow_and_update() {
                self.shutdown();
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = cancel.changed() => {
                    self.shutdown();
                    return;
                }
            }
            match self.socket.open().await {
                Ok(t) => {
                    info!(attempt, "socket reconnected");
                    self.activate(t, SelectorState::SocketActive);
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    self.raise(FailureClass::SocketOpen, format!("could not open socket: {e}"));
                }
            }
        }
        self.become_unavailable();
    }

    fn activate(&mut self, transport: Box<dyn Transport>, state: SelectorState) {
        let kind = transport.kind();
        info!(identity = %self.identity, transport = %kind, "transport active");
        self.active = Some(transport);
        self.state = state;
        self.pending.push_back(ClientEvent::TransportChanged(kind));
    }

    fn become_unavailable(&mut self) {
        if let Some(mut t) = self.active.take() {
            t.close();
        }
        self.state = SelectorState::Unavailable;
        self.raise(FailureClass::Unavailable, "chat is unavailable");
    }

    fn raise(&mut self, class: FailureClass, message: impl Into<String>) {
        let message = message.into();
        match self.notifier.raise(class, message.clone()) {
            Some(n) => {
                warn!(class = %class, message = %message, "client notification");
                self.pending.push_back(ClientEvent::Notice(n));
            }
            None => debug!(class = %class, message = %message, "repeat failure suppressed"),
        }
    }
}

impl Drop for TransportSelector {
    fn drop(&mut self) {
        self.shutdown();
    }
}
