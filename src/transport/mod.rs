//! Transport connection binding
//!
//! Wraps one signaling/media transport connection per tenant. The platform
//! client (Discord gateway, test harness, ...) implements [`VoiceTransport`]
//! and feeds connection lifecycle states through an event channel; the
//! session reconciler consumes them and enforces the recovery window.

mod connection;

pub use connection::{ConnectionState, TransportConn, TransportLink, VoiceTransport};
