//! Per-tenant voice session ownership
//!
//! This module is the single source of truth for live sessions:
//! - `registry` holds the tenant map and the caller-facing control surface
//!   (join, leave, play, pause, resume, stop, volume, snapshots)
//! - `reconciler` cross-wires transport and playback events into recovery
//!   actions (reconnect-or-teardown, radio self-heal, error backoff)
//!
//! Everything a session owns (connection link, engine, transcoder handle,
//! listener tasks) lives in one composite record behind a per-tenant lock,
//! so the independent lifecycles cannot drift out of sync.

mod descriptor;
mod reconciler;
mod registry;
mod snapshot;

pub use descriptor::StreamDescriptor;
pub use registry::VoiceSessionManager;
pub use snapshot::SessionSnapshot;

use crate::playback::PlayerEvent;
use crate::transport::ConnectionState;

/// Typed events from both bindings, merged onto one per-tenant queue so the
/// reconciler observes them in arrival order.
#[derive(Debug, Clone)]
pub(crate) enum SessionEvent {
    Connection(ConnectionState),
    Player(PlayerEvent),
}
