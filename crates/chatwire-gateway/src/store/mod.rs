//! Storage collaborator consumed by the realtime core.
//!
//! The gateway only needs presence updates, message/reaction persistence and
//! the friendship oracle. Store failures surface as `ChatError::Persistence`.

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chatwire_core::error::{ChatError, Result};
use chatwire_core::model::{Identity, MessageId, MessageRecord, ReactionRecord, UserRecord};

use crate::config::{StoreKind, StoreSection};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Message about to be persisted (id and timestamp are store-assigned).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: String,
    pub from_identity: Identity,
    pub to_identity: Option<Identity>,
}

#[derive(Debug, Clone)]
pub struct NewReaction {
    pub message_id: MessageId,
    pub from_identity: Identity,
    pub emoji: String,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_user(&self, identity: &Identity) -> Result<Option<UserRecord>>;
    async fn create_user(&self, identity: &Identity) -> Result<UserRecord>;
    /// Upserts: an unknown identity is created with the given status.
    async fn update_online_status(&self, identity: &Identity, online: bool) -> Result<()>;
    async fn add_message(&self, msg: NewMessage) -> Result<MessageRecord>;
    /// Mutual authorization for direct-scope events. Order-independent.
    async fn check_friendship(&self, a: &Identity, b: &Identity) -> Result<bool>;
    async fn get_reactions(&self, message_id: MessageId) -> Result<Vec<ReactionRecord>>;
    /// Idempotent: re-adding the same (message, identity, emoji) returns the existing row.
    async fn add_reaction(&self, reaction: NewReaction) -> Result<ReactionRecord>;
    /// Delete messages (and their reactions) created before `cutoff`.
    async fn cleanup_old_messages(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn ensure_user(&self, identity: &Identity) -> Result<UserRecord> {
        match self.get_user(identity).await? {
            Some(u) => Ok(u),
            None => self.create_user(identity).await,
        }
    }
}

/// Canonical unordered pair key for the friendship relation.
pub(crate) fn friendship_key(a: &Identity, b: &Identity) -> (Identity, Identity) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Build the configured store.
pub async fn open(cfg: &StoreSection) -> Result<Arc<dyn ChatStore>> {
    match cfg.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Sqlite => {
            let url = cfg
                .url
                .as_deref()
                .ok_or_else(|| ChatError::Config("store.url is required for sqlite".into()))?;
            Ok(Arc::new(SqliteStore::connect(url).await?))
        }
    }
}
