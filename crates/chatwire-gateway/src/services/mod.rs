//! Services invoked by the ingress paths.

pub mod chat;

pub use chat::ChatService;
