//! Protocol modules.
//!
//! - `envelope`: inbound JSON envelopes and the validator.
//! - `frames`: outbound frames, identical on socket and relay paths.
//! - `channel`: relay channel naming (shared by publisher and subscriber).
//! - `relay`: frame <-> relay event codec and relay configuration types.
//! - `publish`: HTTP publish endpoint paths and bodies.
//!
//! All decoders are panic-free: malformed input is reported as
//! `ValidationError` instead of panicking.

pub mod channel;
pub mod envelope;
pub mod frames;
pub mod publish;
pub mod relay;

pub use envelope::{validate, Envelope, ValidationError};
pub use frames::{ErrorFrame, ServerFrame, ServerPayload};
