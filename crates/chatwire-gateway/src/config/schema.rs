use serde::Deserialize;
use chatwire_core::error::{ChatError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub store: StoreSection,

    /// Hosted relay credentials. Absent => offline_mode (socket only).
    #[serde(default)]
    pub relay: Option<RelaySection>,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ChatError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.gateway.validate()?;
        self.store.validate()?;
        if let Some(relay) = &self.relay {
            relay.validate()?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Liveness probe period. A connection is evicted on the first tick that
    /// finds its previous probe unanswered.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Per-connection outbound queue depth.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Apply the friendship check to direct typing indicators too.
    #[serde(default)]
    pub typing_requires_friendship: bool,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            outbound_queue: default_outbound_queue(),
            typing_requires_friendship: false,
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        if !(5000..=120000).contains(&self.heartbeat_interval_ms) {
            return Err(ChatError::Config(
                "gateway.heartbeat_interval_ms must be between 5000 and 120000".into(),
            ));
        }
        if !(256..=1_048_576).contains(&self.max_frame_bytes) {
            return Err(ChatError::Config(
                "gateway.max_frame_bytes must be between 256 and 1048576".into(),
            ));
        }
        if !(16..=65536).contains(&self.outbound_queue) {
            return Err(ChatError::Config(
                "gateway.outbound_queue must be between 16 and 65536".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_heartbeat_interval_ms() -> u64 {
    30000
}
fn default_max_frame_bytes() -> usize {
    16384
}
fn default_outbound_queue() -> usize {
    1024
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    #[serde(default)]
    pub kind: StoreKind,

    /// sqlx connection url, e.g. `sqlite://chat.db`.
    #[serde(default)]
    pub url: Option<String>,

    /// Messages older than this are removed by the daily maintenance task.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            url: None,
            retention_days: default_retention_days(),
        }
    }
}

impl StoreSection {
    pub fn validate(&self) -> Result<()> {
        if self.kind == StoreKind::Sqlite
            && self.url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(ChatError::Config("store.url is required for sqlite".into()));
        }
        if !(1..=3650).contains(&self.retention_days) {
            return Err(ChatError::Config(
                "store.retention_days must be between 1 and 3650".into(),
            ));
        }
        Ok(())
    }
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    pub app_id: String,
    pub key: String,
    pub secret: String,
    pub cluster: String,

    /// REST host override (self-hosted compatible relays, tests).
    #[serde(default)]
    pub host: Option<String>,
}

impl RelaySection {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("app_id", &self.app_id),
            ("key", &self.key),
            ("secret", &self.secret),
            ("cluster", &self.cluster),
        ] {
            if v.trim().is_empty() {
                return Err(ChatError::Config(format!("relay.{name} must not be empty")));
            }
        }
        Ok(())
    }

    /// Base URL of the relay REST API.
    pub fn base_url(&self) -> String {
        match &self.host {
            Some(h) => h.trim_end_matches('/').to_string(),
            None => format!("https://api-{}.pusher.com", self.cluster),
        }
    }
}
