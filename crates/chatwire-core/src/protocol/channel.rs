//! Relay channel naming.
//!
//! Publisher and subscriber must compute byte-identical names or events are
//! silently lost, so both sides call into this module only. Identities are
//! used verbatim: they are case-sensitive keys everywhere else (registry,
//! friendships), so two identities differing only in case get distinct
//! channels.

use crate::model::Identity;

/// Broadcast-scope messages.
pub const BROADCAST_CHANNEL: &str = "chat-public";
/// Presence changes.
pub const STATUS_CHANNEL: &str = "chat-status";
/// Reactions on any message.
pub const REACTIONS_CHANNEL: &str = "chat-reactions";

const DIRECT_PREFIX: &str = "chat-dm";
const INBOX_PREFIX: &str = "chat-inbox";

/// Conversation channel for a pair of identities (order-independent).
///
/// The length of the lower half is embedded so distinct pairs can never
/// concatenate to the same name.
pub fn direct_channel(a: &Identity, b: &Identity) -> String {
    let (lo, hi) = if a.as_str() <= b.as_str() {
        (a.as_str(), b.as_str())
    } else {
        (b.as_str(), a.as_str())
    };
    format!("{DIRECT_PREFIX}-{}-{lo}-{hi}", lo.len())
}

/// Per-recipient channel carrying every direct-scope event addressed to (or
/// echoed back to) `identity`.
pub fn inbox_channel(identity: &Identity) -> String {
    format!("{INBOX_PREFIX}-{identity}")
}

/// The fixed channels every relay session subscribes to.
pub fn session_channels() -> [&'static str; 3] {
    [BROADCAST_CHANNEL, STATUS_CHANNEL, REACTIONS_CHANNEL]
}

/// Everything a relay session for `own` subscribes to at start.
pub fn subscriptions_for(own: &Identity) -> Vec<String> {
    let mut all: Vec<String> = session_channels().iter().map(|c| c.to_string()).collect();
    all.push(inbox_channel(own));
    all
}
