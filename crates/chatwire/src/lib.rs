//! Top-level facade crate for chatwire.
//!
//! Re-exports the protocol core, the gateway library and the client so users
//! can depend on a single crate.

pub mod core {
    pub use chatwire_core::*;
}

pub mod gateway {
    pub use chatwire_gateway::*;
}

pub mod client {
    pub use chatwire_client::*;
}
