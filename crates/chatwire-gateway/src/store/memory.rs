use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};

use chatwire_core::error::{ChatError, Result};
use chatwire_core::model::{Identity, MessageId, MessageRecord, ReactionRecord, UserRecord};

use super::{friendship_key, ChatStore, NewMessage, NewReaction};

/// In-process store. Default backend; also the test double.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<Identity, UserRecord>,
    friendships: DashSet<(Identity, Identity)>,
    log: Mutex<MessageLog>,
}

#[derive(Default)]
struct MessageLog {
    next_message_id: i64,
    next_reaction_id: i64,
    messages: Vec<MessageRecord>,
    reactions: Vec<ReactionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_friendship(&self, a: &Identity, b: &Identity) {
        self.friendships.insert(friendship_key(a, b));
    }

    pub fn remove_friendship(&self, a: &Identity, b: &Identity) {
        self.friendships.remove(&friendship_key(a, b));
    }

    pub fn message_count(&self) -> usize {
        self.log.lock().map(|l| l.messages.len()).unwrap_or(0)
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.log.lock().map(|l| l.messages.clone()).unwrap_or_default()
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut MessageLog) -> Result<T>) -> Result<T> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| ChatError::Persistence("message log poisoned".into()))?;
        f(&mut log)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn get_user(&self, identity: &Identity) -> Result<Option<UserRecord>> {
        Ok(self.users.get(identity).map(|u| u.value().clone()))
    }

    async fn create_user(&self, identity: &Identity) -> Result<UserRecord> {
        let now = Utc::now();
        let user = self
            .users
            .entry(identity.clone())
            .or_insert_with(|| UserRecord {
                identity: identity.clone(),
                is_online: false,
                last_seen: now,
                created_at: now,
            })
            .value()
            .clone();
        Ok(user)
    }

    async fn update_online_status(&self, identity: &Identity, online: bool) -> Result<()> {
        let now = Utc::now();
        let mut entry = self.users.entry(identity.clone()).or_insert_with(|| UserRecord {
            identity: identity.clone(),
            is_online: online,
            last_seen: now,
            created_at: now,
        });
        entry.is_online = online;
        entry.last_seen = now;
        Ok(())
    }

    async fn add_message(&self, msg: NewMessage) -> Result<MessageRecord> {
        self.with_log(|log| {
            log.next_message_id += 1;
            let record = MessageRecord {
                id: MessageId(log.next_message_id),
                content: msg.content,
                from_identity: msg.from_identity,
                to_identity: msg.to_identity,
                timestamp: Utc::now(),
            };
            log.messages.push(record.clone());
            Ok(record)
        })
    }

    async fn check_friendship(&self, a: &Identity, b: &Identity) -> Result<bool> {
        Ok(self.friendships.contains(&friendship_key(a, b)))
    }

    async fn get_reactions(&self, message_id: MessageId) -> Result<Vec<ReactionRecord>> {
        self.with_log(|log| {
            Ok(log
                .reactions
                .iter()
                .filter(|r| r.message_id == message_id)
                .cloned()
                .collect())
        })
    }

    async fn add_reaction(&self, reaction: NewReaction) -> Result<ReactionRecord> {
        self.with_log(|log| {
            if !log.messages.iter().any(|m| m.id == reaction.message_id) {
                return Err(ChatError::Persistence(format!(
                    "message {} not found",
                    reaction.message_id
                )));
            }
            if let Some(existing) = log.reactions.iter().find(|r| {
                r.message_id == reaction.message_id
                    && r.from_identity == reaction.from_identity
                    && r.emoji == reaction.emoji
            }) {
                return Ok(existing.clone());
            }
            log.next_reaction_id += 1;
            let record = ReactionRecord {
                id: log.next_reaction_id,
                message_id: reaction.message_id,
                from_identity: reaction.from_identity,
                emoji: reaction.emoji,
                timestamp: Utc::now(),
            };
            log.reactions.push(record.clone());
            Ok(record)
        })
    }

    async fn cleanup_old_messages(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.with_log(|log| {
            let before = log.messages.len();
            log.messages.retain(|m| m.timestamp >= cutoff);
            let removed = (before - log.messages.len()) as u64;
            let MessageLog {
                messages, reactions, ..
            } = log;
            reactions.retain(|r| messages.iter().any(|m| m.id == r.message_id));
            Ok(removed)
        })
    }
}
