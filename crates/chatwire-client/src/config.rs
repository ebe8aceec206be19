//! Client config (strict YAML, same loader shape as the gateway).

use std::fs;

use serde::Deserialize;
use url::Url;

use chatwire_core::error::ChatError;
use chatwire_core::model::Identity;
use chatwire_core::protocol::publish::status_path_segments;

use crate::error::Result;

pub const CONFIG_ENV: &str = "CHATWIRE_CLIENT_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    /// Gateway base url (`http://` or `https://`).
    pub server_url: String,

    /// Own participant identity.
    pub identity: String,

    /// Application-level ping period on the socket transport.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Socket reopen attempts after a loss before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Relay socket base override, e.g. `ws://127.0.0.1:6001`. Defaults to
    /// the hosted cluster endpoint.
    #[serde(default)]
    pub relay_ws_url: Option<String>,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            version: 1,
            server_url: server_url.into(),
            identity: identity.into(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            relay_ws_url: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(config_err(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        let url = Url::parse(&self.server_url)
            .map_err(|e| config_err(format!("server_url is not a url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(config_err("server_url must start with http:// or https://"));
        }
        if Identity::parse(self.identity.as_str()).is_none() {
            return Err(config_err("identity must not be empty"));
        }
        if !(100..=120_000).contains(&self.heartbeat_interval_ms) {
            return Err(config_err("heartbeat_interval_ms must be between 100 and 120000"));
        }
        if self.reconnect_delay_ms > 60_000 {
            return Err(config_err("reconnect_delay_ms must be at most 60000"));
        }
        if self.max_reconnect_attempts > 20 {
            return Err(config_err("max_reconnect_attempts must be at most 20"));
        }
        if let Some(relay) = &self.relay_ws_url {
            let u = Url::parse(relay)
                .map_err(|e| config_err(format!("relay_ws_url is not a url: {e}")))?;
            if !matches!(u.scheme(), "ws" | "wss") {
                return Err(config_err("relay_ws_url must start with ws:// or wss://"));
            }
        }
        Ok(())
    }

    /// Own identity. Only call on a validated config.
    pub fn identity(&self) -> Result<Identity> {
        Identity::parse(self.identity.as_str())
            .ok_or_else(|| config_err("identity must not be empty"))
    }

    /// Absolute url for a gateway HTTP path.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.server_url.trim_end_matches('/'))
    }

    /// Presence endpoint for `identity`, with the identity percent-encoded
    /// as a single path segment.
    pub fn status_url(&self, identity: &Identity) -> Result<Url> {
        let mut url = Url::parse(&self.server_url)?;
        url.path_segments_mut()
            .map_err(|_| config_err("server_url cannot carry a path"))?
            .pop_if_empty()
            .extend(status_path_segments(identity));
        url.set_query(None);
        Ok(url)
    }

    /// Gateway WebSocket url derived from `server_url`.
    pub fn socket_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.server_url)?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            _ => return Err(config_err("server_url must start with http:// or https://")),
        };
        url.set_scheme(scheme)
            .map_err(|_| config_err("server_url scheme cannot carry a websocket"))?;
        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_query(None);
        Ok(url)
    }
}

pub fn load_from_file(path: &str) -> Result<ClientConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| config_err(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ClientConfig> {
    let cfg: ClientConfig =
        serde_yaml::from_str(s).map_err(|e| config_err(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

fn config_err(msg: impl Into<String>) -> crate::error::ClientError {
    ChatError::Config(msg.into()).into()
}

fn default_heartbeat_interval_ms() -> u64 {
    25000
}
fn default_reconnect_delay_ms() -> u64 {
    2000
}
fn default_max_reconnect_attempts() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = load_from_str(
            "version: 1\nserver_url: http://localhost:8080\nidentity: \"0xabc\"\n",
        )
        .unwrap();
        assert_eq!(cfg.reconnect_delay_ms, 2000);
        assert_eq!(cfg.max_reconnect_attempts, 3);
        assert_eq!(cfg.identity().unwrap().as_str(), "0xabc");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = load_from_str(
            "version: 1\nserver_url: http://x\nidentity: a\nreconect_delay_ms: 5\n",
        )
        .expect_err("typo must fail");
        assert_eq!(err.server_code(), Some("BAD_REQUEST"));
    }

    #[test]
    fn server_url_must_be_http() {
        assert!(load_from_str("version: 1\nserver_url: ftp://x\nidentity: a\n").is_err());
        assert!(load_from_str("version: 1\nserver_url: http://x\nidentity: \" \"\n").is_err());
    }

    #[test]
    fn socket_url_follows_scheme() {
        let cfg = ClientConfig::new("https://chat.example.com/", "a");
        assert_eq!(cfg.socket_url().unwrap().as_str(), "wss://chat.example.com/ws");
        let cfg = ClientConfig::new("http://127.0.0.1:9000/base", "a");
        assert_eq!(cfg.socket_url().unwrap().as_str(), "ws://127.0.0.1:9000/base/ws");
        assert_eq!(cfg.endpoint("/messages"), "http://127.0.0.1:9000/base/messages");
    }

    #[test]
    fn status_url_encodes_the_identity_as_one_segment() {
        let cfg = ClientConfig::new("http://127.0.0.1:9000/base/", "a");
        let who = Identity::parse("0x/a b?#").unwrap();
        let url = cfg.status_url(&who).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/base/users/0x%2Fa%20b%3F%23/status"
        );
        assert_eq!(url.path_segments().unwrap().count(), 4);

        let plain = cfg.status_url(&Identity::parse("0xabc").unwrap()).unwrap();
        assert_eq!(plain.as_str(), "http://127.0.0.1:9000/base/users/0xabc/status");
    }
}
