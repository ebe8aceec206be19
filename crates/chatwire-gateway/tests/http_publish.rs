#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatwire_gateway::config::RelaySection;
use chatwire_gateway::relay::{PusherRelay, RelayPublisher};
use chatwire_gateway::store::ChatStore;

use common::*;

#[tokio::test]
async fn relay_config_reports_offline_mode_without_credentials() {
    let srv = spawn_server().await;
    let body: Value = reqwest::get(srv.http("/relay/config"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "offline_mode", "pusher_config": null}));
}

#[tokio::test]
async fn http_message_reaches_socket_clients() {
    let srv = spawn_server().await;
    let mut ws = srv.connect_as("0xb").await;
    drain(&mut ws).await;

    let resp = reqwest::Client::new()
        .post(srv.http("/messages"))
        .body(r#"{"content":"from http","fromIdentity":"0xa","toIdentity":null}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let record: Value = resp.json().await.unwrap();

    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["type"], "message");
    assert_eq!(frame["id"], record["id"]);
}

#[tokio::test]
async fn http_errors_use_the_error_frame_shape() {
    let srv = spawn_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(srv.http("/messages"))
        .body(r#"{"content":"hi","fromIdentity":"0xa","toIdentity":"0xc"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FRIENDS");
    assert_eq!(srv.store.message_count(), 0);

    let resp = http
        .post(srv.http("/typing"))
        .body("{oops")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.json::<Value>().await.unwrap()["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn reactions_can_be_posted_and_listed() {
    let srv = spawn_server().await;
    let http = reqwest::Client::new();

    let msg: Value = http
        .post(srv.http("/messages"))
        .body(r#"{"content":"poll","fromIdentity":"0xa"}"#)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let body = json!({"messageId": msg["id"], "fromIdentity": "0xb", "emoji": "👍"});
    for _ in 0..2 {
        let resp = http
            .post(srv.http("/reactions"))
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }

    let listed: Vec<Value> = reqwest::get(srv.http(&format!("/messages/{}/reactions", msg["id"])))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["emoji"], "👍");
}

#[tokio::test]
async fn status_endpoint_updates_presence_and_notifies() {
    let srv = spawn_server().await;
    let mut observer = srv.connect_as("0xo").await;
    drain(&mut observer).await;

    let resp = reqwest::Client::new()
        .post(srv.http("/users/0xrelay/status"))
        .body(r#"{"isOnline":true}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let frame = recv_json(&mut observer).await;
    assert_eq!(frame, json!({"type": "status", "identity": "0xrelay", "isOnline": true}));
    assert!(srv.store.get_user(&id("0xrelay")).await.unwrap().unwrap().is_online);
}

#[tokio::test]
async fn status_path_identity_is_percent_decoded() {
    let srv = spawn_server().await;
    let resp = reqwest::Client::new()
        .post(srv.http("/users/0x%2Fa%20b/status"))
        .body(r#"{"isOnline":true}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["identity"], "0x/a b");
    assert!(srv.store.get_user(&id("0x/a b")).await.unwrap().unwrap().is_online);
}

#[tokio::test]
async fn ops_endpoints_report_health_and_metrics() {
    let srv = spawn_server().await;
    let mut ws = srv.connect_as("0xa").await;
    drain(&mut ws).await;

    assert_eq!(reqwest::get(srv.http("/healthz")).await.unwrap().status(), 200);
    assert_eq!(reqwest::get(srv.http("/readyz")).await.unwrap().status(), 200);

    let text = reqwest::get(srv.http("/metrics")).await.unwrap().text().await.unwrap();
    assert!(text.contains("chatwire_ws_upgrades_total{} 1"));
    assert!(text.contains("chatwire_envelopes_total{path=\"ws\",type=\"typing\"} 1"));
    assert!(text.contains("chatwire_registry_bound_identities 1"));

    srv.state.begin_shutdown();
    assert_eq!(reqwest::get(srv.http("/readyz")).await.unwrap().status(), 503);
}

#[tokio::test]
async fn routed_events_are_triggered_on_the_relay() {
    let relay_api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps/42/events"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&relay_api)
        .await;

    let mut cfg = default_config();
    let section = RelaySection {
        app_id: "42".into(),
        key: "pub-key".into(),
        secret: "shh".into(),
        cluster: "eu".into(),
        host: Some(relay_api.uri()),
    };
    let relay: Arc<dyn RelayPublisher> = Arc::new(PusherRelay::new(&section).unwrap());
    cfg.relay = Some(section);
    let srv = spawn_with(cfg, Some(relay)).await;

    let probe: Value = reqwest::get(srv.http("/relay/config")).await.unwrap().json().await.unwrap();
    assert_eq!(probe["status"], "pusher_mode");
    assert_eq!(probe["pusher_config"], json!({"key": "pub-key", "cluster": "eu"}));

    let resp = reqwest::Client::new()
        .post(srv.http("/messages"))
        .body(r#"{"content":"relayed","fromIdentity":"0xa"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let requests = relay_api.received_requests().await.unwrap();
    let triggers: Vec<Value> = requests
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    let msg = triggers
        .iter()
        .find(|t| t["name"] == "new-message")
        .expect("message trigger");
    assert_eq!(msg["channels"], json!(["chat-public"]));
    let data: Value = serde_json::from_str(msg["data"].as_str().unwrap()).unwrap();
    assert_eq!(data["content"], "relayed");
}

#[tokio::test]
async fn relay_outage_does_not_fail_the_publish() {
    let relay_api = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&relay_api)
        .await;

    let mut cfg = default_config();
    let section = RelaySection {
        app_id: "42".into(),
        key: "k".into(),
        secret: "s".into(),
        cluster: "eu".into(),
        host: Some(relay_api.uri()),
    };
    let relay: Arc<dyn RelayPublisher> = Arc::new(PusherRelay::new(&section).unwrap());
    cfg.relay = Some(section);
    let srv = spawn_with(cfg, Some(relay)).await;

    let resp = reqwest::Client::new()
        .post(srv.http("/messages"))
        .body(r#"{"content":"still stored","fromIdentity":"0xa"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert_eq!(srv.store.message_count(), 1);
    assert_eq!(
        srv.state.metrics().relay_failures.get(&[("kind", "message")]),
        1
    );
}
