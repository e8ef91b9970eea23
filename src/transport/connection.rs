use crate::error::VoiceError;
use crate::ids::{ChannelId, TenantId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle of one transport connection.
///
/// `Signalling -> Connecting -> Ready` on the happy path. Network events may
/// push a `Ready` connection to `Disconnected`; the reconciler then grants a
/// bounded recovery window to re-enter `Signalling`/`Connecting`, after which
/// the connection is considered `Destroyed`. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

impl ConnectionState {
    /// States in which an existing connection is worth keeping when a join
    /// targets the same channel.
    pub fn is_healthy(&self) -> bool {
        matches!(
            self,
            ConnectionState::Signalling | ConnectionState::Connecting | ConnectionState::Ready
        )
    }
}

/// Control half of an open connection, kept by the session record.
#[async_trait::async_trait]
pub trait TransportLink: Send + Sync {
    /// Tear the connection down. Idempotent; the transport must tolerate
    /// destroy on an already-dead connection.
    async fn destroy(&self);
}

/// A freshly opened connection: the channel it points at, the stream of
/// lifecycle states the transport will emit for it, and the control link.
pub struct TransportConn {
    pub channel: ChannelId,
    pub events: mpsc::Receiver<ConnectionState>,
    pub link: Arc<dyn TransportLink>,
}

/// Connection factory supplied by the platform client.
///
/// The manager treats this purely as an opaque connector and event source;
/// channel validation (existence, voice capability, permission grants) is the
/// transport's job and is consulted before any session state is touched.
#[async_trait::async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Check that `channel` exists, is voice-capable and joinable.
    async fn validate_channel(
        &self,
        tenant: TenantId,
        channel: ChannelId,
    ) -> Result<(), VoiceError>;

    /// Open a connection for `tenant` to `channel`.
    ///
    /// The returned event stream is expected to emit the state transitions
    /// in the order the platform produces them, ending with `Destroyed` (or
    /// simply closing) once the connection is gone.
    async fn open(&self, tenant: TenantId, channel: ChannelId)
        -> Result<TransportConn, VoiceError>;
}
