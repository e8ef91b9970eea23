use crate::ids::TenantId;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Player half of the per-tenant session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Idle,
    Buffering,
    Playing,
    Paused,
}

/// Events the engine pushes back to the session reconciler.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The engine moved to a new state. An `Idle` with no explicit stop
    /// requested is what drives radio self-heal and catalog end-of-track.
    StateChanged(PlayerState),

    /// The engine hit an unrecoverable error on the current stream.
    Fatal(String),
}

/// One playback pipeline, exclusively owned by one tenant's session.
///
/// All methods are non-blocking with respect to external I/O: they flip
/// engine-local state and return. Outcome of a `play` is reported
/// asynchronously through the event channel handed out at creation.
#[async_trait::async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Attach a raw PCM byte stream (s16le, fixed rate/channels) and start
    /// playing it. Any previously attached stream is discarded.
    async fn play(&self, pcm: mpsc::Receiver<Vec<u8>>);

    async fn pause(&self);

    async fn resume(&self);

    async fn stop(&self);

    /// Apply a gain factor. Callers clamp before handing the value over.
    async fn set_volume(&self, volume: f32);
}

/// Creates one engine per session, paired with its event stream.
pub trait PlaybackEngineFactory: Send + Sync {
    fn create(&self, tenant: TenantId) -> (Arc<dyn PlaybackEngine>, mpsc::Receiver<PlayerEvent>);
}
