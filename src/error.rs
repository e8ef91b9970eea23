use crate::ids::{ChannelId, TenantId};
use thiserror::Error;

/// Errors surfaced to callers from explicit control operations.
///
/// Failures that happen asynchronously after a stream has started
/// (connection drops, engine errors, transcoder crashes) are handled by the
/// reconciler and never appear here; callers observe them through
/// [`crate::session::SessionSnapshot`] queries. Precondition misses on
/// pause/resume/stop are reported as a plain `false`, not as an error.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// The transport did not reach Ready within the join timeout.
    /// The partially built session has been rolled back.
    #[error("connection to channel {0} timed out before becoming ready")]
    ConnectionTimeout(ChannelId),

    /// The target channel refuses us (missing connect/speak grants).
    #[error("missing permission to join channel {0}")]
    PermissionDenied(ChannelId),

    /// The target channel does not exist or is not voice-capable.
    #[error("channel {0} does not exist or is not a voice channel")]
    ChannelNotFound(ChannelId),

    /// The external transcoder process could not be started.
    #[error("failed to start transcoder: {0}")]
    SubprocessSpawnFailure(String),

    /// The operation needs a live session and the tenant has none.
    #[error("no active voice session for tenant {0}")]
    NoSession(TenantId),

    /// The platform transport reported a failure during an explicit operation.
    #[error("transport error: {0}")]
    Transport(String),
}
