//! chatwire core: transport-agnostic protocol primitives and the shared error surface.
//!
//! This crate defines the wire-level contracts shared by the gateway and the
//! client: the inbound envelope schema and its validator, the outbound frame
//! schema, relay channel naming, and the relay event codec. It carries no
//! transport or runtime dependencies so both sides compile the exact same
//! channel-derivation and codec logic.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed input is
//! always reported as a typed error (`ValidationError` / `ChatError`) so a bad
//! frame never takes a connection or process down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod model;
pub mod protocol;

/// Shared result type.
pub use error::{ChatError, ClientCode, Result};
pub use model::{Identity, MessageId, MessageRecord, ReactionRecord, UserRecord};
