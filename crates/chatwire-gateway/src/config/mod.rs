//! Gateway config loader (strict parsing).

pub mod schema;

use std::fs;

use chatwire_core::error::{ChatError, Result};

pub use schema::{GatewayConfig, GatewaySection, RelaySection, StoreKind, StoreSection};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CHATWIRE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "chatwire.yaml";

pub fn load_from_file(path: &str) -> Result<GatewayConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| ChatError::Config(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<GatewayConfig> {
    let cfg: GatewayConfig = serde_yaml::from_str(s)
        .map_err(|e| ChatError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Path from `CHATWIRE_CONFIG`, falling back to `chatwire.yaml`.
pub fn config_path() -> String {
    std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}
