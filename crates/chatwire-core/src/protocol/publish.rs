//! HTTP publish endpoints used by relay-mode clients.

use serde::{Deserialize, Serialize};

use crate::model::Identity;
use crate::protocol::envelope::Envelope;

pub const PATH_MESSAGES: &str = "/messages";
pub const PATH_TYPING: &str = "/typing";
pub const PATH_REACTIONS: &str = "/reactions";
pub const PATH_RELAY_CONFIG: &str = "/relay/config";

/// Endpoint an envelope is POSTed to in relay mode. `ping` has none: relay
/// liveness is the hosted service's concern.
pub fn publish_path(env: &Envelope) -> Option<&'static str> {
    match env {
        Envelope::Message(_) => Some(PATH_MESSAGES),
        Envelope::Typing(_) => Some(PATH_TYPING),
        Envelope::Reaction(_) => Some(PATH_REACTIONS),
        Envelope::Ping(_) => None,
    }
}

/// Unencoded path segments of `POST /users/{identity}/status`. Callers
/// build the url segment by segment so the identity is percent-encoded.
pub fn status_path_segments(identity: &Identity) -> [&str; 3] {
    ["users", identity.as_str(), "status"]
}

/// `POST /users/{identity}/status` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub is_online: bool,
}
