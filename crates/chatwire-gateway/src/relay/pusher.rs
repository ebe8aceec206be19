use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use serde::Serialize;
use sha2::Sha256;

use chatwire_core::error::{ChatError, Result};

use crate::config::RelaySection;

use super::RelayPublisher;

const AUTH_VERSION: &str = "1.0";
const TRIGGER_TIMEOUT: Duration = Duration::from_secs(5);

/// Signed REST trigger against a Pusher-compatible HTTP API.
pub struct PusherRelay {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    key: String,
    secret: String,
}

#[derive(Serialize)]
struct TriggerBody<'a> {
    name: &'a str,
    channels: &'a [String],
    data: &'a str,
}

/// `auth_signature`: hex HMAC-SHA256 over `METHOD\nPATH\nQUERY`, where QUERY
/// is the sorted parameter string without the signature itself.
pub fn sign(secret: &str, method: &str, path: &str, query: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ChatError::Internal(format!("hmac key: {e}")))?;
    mac.update(format!("{method}\n{path}\n{query}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

impl PusherRelay {
    pub fn new(cfg: &RelaySection) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(TRIGGER_TIMEOUT)
            .build()
            .map_err(|e| ChatError::Internal(format!("relay http client: {e}")))?;
        Ok(Self {
            http,
            base_url: cfg.base_url().trim_end_matches('/').to_string(),
            app_id: cfg.app_id.clone(),
            key: cfg.key.clone(),
            secret: cfg.secret.clone(),
        })
    }

    fn signed_url(&self, path: &str, body: &str, timestamp: u64) -> Result<String> {
        let body_md5 = hex::encode(Md5::digest(body.as_bytes()));
        // Parameters already in lexical order.
        let query = format!(
            "auth_key={}&auth_timestamp={timestamp}&auth_version={AUTH_VERSION}&body_md5={body_md5}",
            self.key
        );
        let signature = sign(&self.secret, "POST", path, &query)?;
        Ok(format!("{}{path}?{query}&auth_signature={signature}", self.base_url))
    }
}

#[async_trait]
impl RelayPublisher for PusherRelay {
    async fn trigger(&self, channels: &[String], event: &str, data: &str) -> Result<()> {
        let body = serde_json::to_string(&TriggerBody {
            name: event,
            channels,
            data,
        })
        .map_err(|e| ChatError::Internal(format!("relay body: {e}")))?;

        let path = format!("/apps/{}/events", self.app_id);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let url = self.signed_url(&path, &body, timestamp)?;

        let resp = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("relay trigger: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ChatError::Transport(format!(
                "relay trigger rejected ({status}): {detail}"
            )));
        }
        tracing::debug!(?channels, event, "relay event triggered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn section(host: &str) -> RelaySection {
        RelaySection {
            app_id: "3".into(),
            key: "278d425bdf160c739803".into(),
            secret: "7ad3773142a6692b25b8".into(),
            cluster: "eu".into(),
            host: Some(host.into()),
        }
    }

    #[test]
    fn signature_matches_published_reference() {
        let query = "auth_key=278d425bdf160c739803&auth_timestamp=1353088179&auth_version=1.0&body_md5=ec365a775a4cd0599faeb73354201b6f";
        assert_eq!(
            sign("7ad3773142a6692b25b8", "POST", "/apps/3/events", query).unwrap(),
            "da454824c97ba181a32ccc17a72625ba02771f50b50e1e7430e47a1f3f457e6c"
        );
    }

    #[test]
    fn signed_url_carries_body_digest() {
        let relay = PusherRelay::new(&section("http://relay.local")).unwrap();
        let body = r#"{"name":"foo","channels":["project-3"],"data":"{\"some\":\"data\"}"}"#;
        let url = relay.signed_url("/apps/3/events", body, 1353088179).unwrap();
        assert!(url.starts_with("http://relay.local/apps/3/events?auth_key="));
        assert!(url.contains("body_md5=ec365a775a4cd0599faeb73354201b6f"));
        assert!(url.ends_with(
            "auth_signature=da454824c97ba181a32ccc17a72625ba02771f50b50e1e7430e47a1f3f457e6c"
        ));
    }

    #[tokio::test]
    async fn trigger_posts_signed_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps/3/events"))
            .and(query_param("auth_version", "1.0"))
            .and(query_param("auth_key", "278d425bdf160c739803"))
            .and(body_json(serde_json::json!({
                "name": "new-message",
                "channels": ["chat-dm-3-0xa-0xb", "chat-inbox-0xb"],
                "data": "{\"type\":\"pong\"}"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let relay = PusherRelay::new(&section(&server.uri())).unwrap();
        relay
            .trigger(
                &["chat-dm-3-0xa-0xb".into(), "chat-inbox-0xb".into()],
                "new-message",
                "{\"type\":\"pong\"}",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_trigger_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad signature"))
            .mount(&server)
            .await;

        let relay = PusherRelay::new(&section(&server.uri())).unwrap();
        let err = relay
            .trigger(&["chat-status".into()], "user-status", "{}")
            .await
            .unwrap_err();
        assert_eq!(err.client_code().as_str(), "TRANSPORT");
        assert!(err.to_string().contains("bad signature"));
    }
}
