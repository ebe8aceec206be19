//! Axum router wiring: WS upgrade, HTTP publish endpoints, ops endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use chatwire_core::protocol::publish::{PATH_MESSAGES, PATH_REACTIONS, PATH_RELAY_CONFIG, PATH_TYPING};

use crate::{api, app_state::AppState, ops, transport};

pub const WS_PATH: &str = "/ws";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(WS_PATH, get(transport::ws::ws_upgrade))
        .route(PATH_RELAY_CONFIG, get(api::relay_config))
        .route(PATH_MESSAGES, post(api::post_message))
        .route(PATH_TYPING, post(api::post_typing))
        .route(PATH_REACTIONS, post(api::post_reaction))
        .route("/users/:identity/status", post(api::post_status))
        .route("/messages/:id/reactions", get(api::get_reactions))
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .with_state(state)
}
