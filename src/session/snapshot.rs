use super::descriptor::StreamDescriptor;
use crate::ids::{ChannelId, TenantId};
use crate::playback::PlayerState;
use crate::transport::ConnectionState;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of one tenant's session, for callers that want to
/// report state (a command layer's "now playing", health checks, tests).
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub tenant: TenantId,

    /// Channel the transport connection points at.
    pub channel: ChannelId,

    pub connection_state: ConnectionState,

    pub player_state: PlayerState,

    /// The active stream, if any.
    pub stream: Option<StreamDescriptor>,

    /// Effective gain, already clamped to [0.0, 2.0].
    pub volume: f32,

    /// Whether a transcoder process is currently alive for this session.
    pub transcoder_live: bool,

    /// When this session was established.
    pub started_at: DateTime<Utc>,
}
