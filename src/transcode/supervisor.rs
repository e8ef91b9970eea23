use crate::error::VoiceError;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Launches transcoder processes. Implemented by [`super::FfmpegTranscoder`]
/// for real use and by a scripted double in `crate::testing`.
#[async_trait::async_trait]
pub trait TranscoderSupervisor: Send + Sync {
    /// Start a transcode of `url`, yielding the PCM byte stream and the
    /// ownership handle. Failure to start leaves nothing behind.
    async fn spawn(&self, url: &str) -> Result<ActiveTranscode, VoiceError>;
}

/// A transcoder that has been started: the handle the session record keeps,
/// and the PCM stream that is fed to the playback engine.
pub struct ActiveTranscode {
    pub handle: TranscoderHandle,
    pub pcm: mpsc::Receiver<Vec<u8>>,
}

/// Ownership of one live transcoder process.
///
/// Terminating is fire-and-forget: the stop routine runs detached and the
/// caller never waits for process exit confirmation. Dropping the handle
/// without an explicit terminate also reclaims the process, so a session
/// record can never leak its subprocess.
pub struct TranscoderHandle {
    id: Uuid,
    stopper: Option<Box<dyn FnOnce() + Send>>,
}

impl TranscoderHandle {
    pub fn new(id: Uuid, stopper: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            id,
            stopper: Some(stopper),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Begin teardown of the process and consume the handle.
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stopper.take() {
            debug!("terminating transcoder {}", self.id);
            stop();
        }
    }
}

impl Drop for TranscoderHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TranscoderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscoderHandle")
            .field("id", &self.id)
            .field("live", &self.stopper.is_some())
            .finish()
    }
}
