use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};

use chatwire_core::error::{ChatError, Result};
use chatwire_core::model::{Identity, MessageId, MessageRecord, ReactionRecord, UserRecord};

use super::{friendship_key, ChatStore, NewMessage, NewReaction};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        identity    TEXT PRIMARY KEY,
        is_online   INTEGER NOT NULL DEFAULT 0,
        last_seen   TEXT NOT NULL,
        created_at  TEXT NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        content       TEXT NOT NULL,
        from_identity TEXT NOT NULL,
        to_identity   TEXT,
        created_at    TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages (created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS friendships (
        identity_a TEXT NOT NULL,
        identity_b TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (identity_a, identity_b)
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS reactions (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id    INTEGER NOT NULL REFERENCES messages (id) ON DELETE CASCADE,
        from_identity TEXT NOT NULL,
        emoji         TEXT NOT NULL,
        created_at    TEXT NOT NULL,
        UNIQUE (message_id, from_identity, emoji)
    )"#,
];

/// Relational store backed by sqlx/SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

fn db_err(context: &str) -> impl Fn(sqlx::Error) -> ChatError + '_ {
    move |e| ChatError::Persistence(format!("{context}: {e}"))
}

fn identity_col(row: &SqliteRow, col: &str) -> Result<Identity> {
    let raw: String = row.try_get(col).map_err(db_err("decode identity"))?;
    Identity::parse(raw).ok_or_else(|| ChatError::Persistence(format!("empty identity in {col}")))
}

fn message_from_row(row: &SqliteRow) -> Result<MessageRecord> {
    let to: Option<String> = row.try_get("to_identity").map_err(db_err("decode message"))?;
    Ok(MessageRecord {
        id: MessageId(row.try_get("id").map_err(db_err("decode message"))?),
        content: row.try_get("content").map_err(db_err("decode message"))?,
        from_identity: identity_col(row, "from_identity")?,
        to_identity: to.and_then(Identity::parse),
        timestamp: row.try_get("created_at").map_err(db_err("decode message"))?,
    })
}

fn reaction_from_row(row: &SqliteRow) -> Result<ReactionRecord> {
    Ok(ReactionRecord {
        id: row.try_get("id").map_err(db_err("decode reaction"))?,
        message_id: MessageId(row.try_get("message_id").map_err(db_err("decode reaction"))?),
        from_identity: identity_col(row, "from_identity")?,
        emoji: row.try_get("emoji").map_err(db_err("decode reaction"))?,
        timestamp: row.try_get("created_at").map_err(db_err("decode reaction"))?,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<UserRecord> {
    let online: i64 = row.try_get("is_online").map_err(db_err("decode user"))?;
    Ok(UserRecord {
        identity: identity_col(row, "identity")?,
        is_online: online != 0,
        last_seen: row.try_get("last_seen").map_err(db_err("decode user"))?,
        created_at: row.try_get("created_at").map_err(db_err("decode user"))?,
    })
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err("invalid sqlite url"))?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every pooled connection to `:memory:` is its own database.
        let max = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max)
            .connect_with(options)
            .await
            .map_err(db_err("sqlite connect"))?;

        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&pool)
                .await
                .map_err(db_err("sqlite schema"))?;
        }
        tracing::info!(url = %database_url, "sqlite store ready");
        Ok(Self { pool })
    }

    pub async fn add_friendship(&self, a: &Identity, b: &Identity) -> Result<()> {
        let (lo, hi) = friendship_key(a, b);
        sqlx::query(
            "INSERT OR IGNORE INTO friendships (identity_a, identity_b, created_at) VALUES (?, ?, ?)",
        )
        .bind(lo.as_str())
        .bind(hi.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err("add friendship"))?;
        Ok(())
    }

    pub async fn remove_friendship(&self, a: &Identity, b: &Identity) -> Result<()> {
        let (lo, hi) = friendship_key(a, b);
        sqlx::query("DELETE FROM friendships WHERE identity_a = ? AND identity_b = ?")
            .bind(lo.as_str())
            .bind(hi.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err("remove friendship"))?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("sqlite ping"))?;
        Ok(())
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn get_user(&self, identity: &Identity) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT identity, is_online, last_seen, created_at FROM users WHERE identity = ?",
        )
        .bind(identity.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get user"))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn create_user(&self, identity: &Identity) -> Result<UserRecord> {
        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO users (identity, is_online, last_seen, created_at) VALUES (?, 0, ?, ?)",
        )
        .bind(identity.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err("create user"))?;
        self.get_user(identity)
            .await?
            .ok_or_else(|| ChatError::Persistence(format!("user {identity} vanished after insert")))
    }

    async fn update_online_status(&self, identity: &Identity, online: bool) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO users (identity, is_online, last_seen, created_at) VALUES (?, ?, ?, ?)
            ON CONFLICT (identity) DO UPDATE SET is_online = excluded.is_online, last_seen = excluded.last_seen
            "#,
        )
        .bind(identity.as_str())
        .bind(online as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err("update online status"))?;
        Ok(())
    }

    async fn add_message(&self, msg: NewMessage) -> Result<MessageRecord> {
        let now = Utc::now();
        let res = sqlx::query(
            "INSERT INTO messages (content, from_identity, to_identity, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&msg.content)
        .bind(msg.from_identity.as_str())
        .bind(msg.to_identity.as_ref().map(|i| i.as_str().to_string()))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err("add message"))?;

        Ok(MessageRecord {
            id: MessageId(res.last_insert_rowid()),
            content: msg.content,
            from_identity: msg.from_identity,
            to_identity: msg.to_identity,
            timestamp: now,
        })
    }

    async fn check_friendship(&self, a: &Identity, b: &Identity) -> Result<bool> {
        let (lo, hi) = friendship_key(a, b);
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM friendships WHERE identity_a = ? AND identity_b = ?",
        )
        .bind(lo.as_str())
        .bind(hi.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("check friendship"))?;
        Ok(found.is_some())
    }

    async fn get_reactions(&self, message_id: MessageId) -> Result<Vec<ReactionRecord>> {
        let rows = sqlx::query(
            "SELECT id, message_id, from_identity, emoji, created_at FROM reactions WHERE message_id = ? ORDER BY id",
        )
        .bind(message_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("get reactions"))?;
        rows.iter().map(reaction_from_row).collect()
    }

    async fn add_reaction(&self, reaction: NewReaction) -> Result<ReactionRecord> {
        sqlx::query(
            "INSERT OR IGNORE INTO reactions (message_id, from_identity, emoji, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(reaction.message_id.0)
        .bind(reaction.from_identity.as_str())
        .bind(&reaction.emoji)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err("add reaction"))?;

        let row = sqlx::query(
            r#"
            SELECT id, message_id, from_identity, emoji, created_at FROM reactions
            WHERE message_id = ? AND from_identity = ? AND emoji = ?
            "#,
        )
        .bind(reaction.message_id.0)
        .bind(reaction.from_identity.as_str())
        .bind(&reaction.emoji)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("load reaction"))?;
        reaction_from_row(&row)
    }

    async fn cleanup_old_messages(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query("DELETE FROM messages WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_err("cleanup messages"))?;
        Ok(res.rows_affected())
    }
}
