//! Chat routing: the single place where validated envelopes are authorized,
//! persisted and fanned out. Both the socket session loop and the HTTP
//! publish endpoints call into this service.
//!
//! Ordering is always persist-then-deliver. If the store write fails nothing
//! is delivered on either egress path.

use std::sync::Arc;

use chatwire_core::error::{ChatError, Result};
use chatwire_core::model::{Identity, MessageRecord, ReactionRecord};
use chatwire_core::protocol::envelope::{MessageEnvelope, ReactionEnvelope, TypingEnvelope};
use chatwire_core::protocol::frames::{StatusFrame, TypingFrame};
use chatwire_core::protocol::{Envelope, ServerFrame};

use crate::obs::GatewayMetrics;
use crate::realtime::{PreparedMsg, QoS, RealtimeCore};
use crate::relay::{self, RelayPublisher};
use crate::store::{ChatStore, NewMessage, NewReaction};

pub struct ChatService {
    store: Arc<dyn ChatStore>,
    core: Arc<RealtimeCore>,
    relay: Option<Arc<dyn RelayPublisher>>,
    metrics: Arc<GatewayMetrics>,
    typing_requires_friendship: bool,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        core: Arc<RealtimeCore>,
        relay: Option<Arc<dyn RelayPublisher>>,
        metrics: Arc<GatewayMetrics>,
        typing_requires_friendship: bool,
    ) -> Self {
        Self {
            store,
            core,
            relay,
            metrics,
            typing_requires_friendship,
        }
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub fn relay_enabled(&self) -> bool {
        self.relay.is_some()
    }

    /// Route one non-ping envelope.
    pub async fn dispatch(&self, env: Envelope) -> Result<()> {
        match env {
            Envelope::Message(m) => self.post_message(m).await.map(|_| ()),
            Envelope::Typing(t) => self.post_typing(t).await,
            Envelope::Reaction(r) => self.post_reaction(r).await.map(|_| ()),
            // Answered by the transport; nothing to route.
            Envelope::Ping(_) => Ok(()),
        }
    }

    async fn require_friends(&self, a: &Identity, b: &Identity) -> Result<()> {
        if self.store.check_friendship(a, b).await? {
            Ok(())
        } else {
            Err(ChatError::NotFriends(format!(
                "{a} and {b} are not friends"
            )))
        }
    }

    pub async fn post_message(&self, m: MessageEnvelope) -> Result<MessageRecord> {
        if let Some(to) = &m.to_identity {
            self.require_friends(&m.from_identity, to).await?;
        }

        let record = self
            .store
            .add_message(NewMessage {
                content: m.content,
                from_identity: m.from_identity,
                to_identity: m.to_identity,
            })
            .await?;

        let frame = ServerFrame::Message(record.clone());
        let prepared = PreparedMsg::frame(&frame);
        match &record.to_identity {
            Some(to) => {
                self.core.send_to_identity(to, &prepared, QoS::RELIABLE).await;
                if to != &record.from_identity {
                    self.core
                        .send_to_identity(&record.from_identity, &prepared, QoS::RELIABLE)
                        .await;
                }
            }
            None => {
                self.core.broadcast(&prepared, QoS::RELIABLE).await;
            }
        }
        tracing::debug!(id = %record.id, from = %record.from_identity, direct = record.is_direct(), "message routed");
        self.relay_out(&frame).await;
        Ok(record)
    }

    /// Typing is never persisted and only ever delivered direct-scope.
    pub async fn post_typing(&self, t: TypingEnvelope) -> Result<()> {
        let Some(to) = t.to_identity else {
            return Ok(());
        };
        if self.typing_requires_friendship {
            self.require_friends(&t.from_identity, &to).await?;
        }

        let frame = ServerFrame::Typing(TypingFrame {
            from_identity: t.from_identity,
            to_identity: Some(to.clone()),
            is_typing: t.is_typing,
        });
        self.core
            .send_to_identity(&to, &PreparedMsg::frame(&frame), QoS::Lossy)
            .await;
        self.relay_out(&frame).await;
        Ok(())
    }

    pub async fn post_reaction(&self, r: ReactionEnvelope) -> Result<ReactionRecord> {
        let record = self
            .store
            .add_reaction(NewReaction {
                message_id: r.message_id,
                from_identity: r.from_identity,
                emoji: r.emoji,
            })
            .await?;

        let frame = ServerFrame::Reaction(record.clone());
        self.core
            .broadcast(&PreparedMsg::frame(&frame), QoS::RELIABLE)
            .await;
        self.relay_out(&frame).await;
        Ok(record)
    }

    /// Record presence and announce it on both egress paths.
    pub async fn set_presence(&self, identity: &Identity, online: bool) -> Result<StatusFrame> {
        self.store.update_online_status(identity, online).await?;
        let status = StatusFrame {
            identity: identity.clone(),
            is_online: online,
        };
        let frame = ServerFrame::Status(status.clone());
        self.core
            .broadcast(&PreparedMsg::frame(&frame), QoS::Lossy)
            .await;
        self.relay_out(&frame).await;
        tracing::info!(identity = %identity, online, "presence changed");
        Ok(status)
    }

    /// First bind of a socket connection: make sure the participant exists,
    /// then mark it online.
    pub async fn on_bind(&self, identity: &Identity) -> Result<()> {
        self.store.ensure_user(identity).await?;
        self.set_presence(identity, true).await.map(|_| ())
    }

    /// Close handling. Best-effort: a store failure is logged, the status
    /// frame still goes out so peers stop addressing this identity.
    pub async fn on_close(&self, identity: &Identity) {
        if let Err(e) = self.set_presence(identity, false).await {
            tracing::warn!(identity = %identity, error = %e, "failed to mark offline");
            let frame = ServerFrame::Status(StatusFrame {
                identity: identity.clone(),
                is_online: false,
            });
            self.core
                .broadcast(&PreparedMsg::frame(&frame), QoS::Lossy)
                .await;
            self.relay_out(&frame).await;
        }
    }

    /// Relay fan-out after a successful persist. Never fails the caller.
    async fn relay_out(&self, frame: &ServerFrame) {
        let Some(publisher) = &self.relay else {
            return;
        };
        if let Err(e) = relay::publish_frame(publisher.as_ref(), frame).await {
            self.metrics.relay_failures.inc(&[("kind", frame.kind())]);
            tracing::warn!(kind = frame.kind(), error = %e, "relay publish failed");
        }
    }
}
