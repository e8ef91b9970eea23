use super::supervisor::{ActiveTranscode, TranscoderHandle, TranscoderSupervisor};
use crate::config::TranscodeConfig;
use crate::error::VoiceError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Spawns `ffmpeg` to pull a remote URL and emit raw s16le PCM on stdout.
///
/// The input side is configured for network resilience (automatic HTTP
/// reconnection) and the output side for the fixed sample rate and channel
/// count the playback engine expects.
pub struct FfmpegTranscoder {
    config: TranscodeConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl TranscoderSupervisor for FfmpegTranscoder {
    async fn spawn(&self, url: &str) -> Result<ActiveTranscode, VoiceError> {
        let rate = self.config.sample_rate.to_string();
        let channels = self.config.channels.to_string();

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args([
                "-hide_banner",
                "-loglevel",
                "warning",
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
                "-i",
                url,
                "-vn",
                "-ac",
                &channels,
                "-ar",
                &rate,
                "-f",
                "s16le",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::SubprocessSpawnFailure(e.to_string()))?;

        let id = Uuid::new_v4();
        info!("spawned transcoder {} for {}", id, url);

        let mut stdout = child.stdout.take().ok_or_else(|| {
            VoiceError::SubprocessSpawnFailure("ffmpeg stdout was not captured".to_string())
        })?;
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel::<Vec<u8>>(32);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("transcoder {} stdout closed: {}", id, e);
                        break;
                    }
                }
            }
        });

        // stderr is diagnostic only; non-fatal ffmpeg warnings must not be
        // treated as playback failure.
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("ffmpeg[{}]: {}", id, line);
                }
            });
        }

        let grace = Duration::from_millis(self.config.grace_ms);
        let stopper = Box::new(move || stop_child(child, id, grace));

        Ok(ActiveTranscode {
            handle: TranscoderHandle::new(id, stopper),
            pcm: rx,
        })
    }
}

/// Graceful-then-forced shutdown, detached so the caller never blocks on
/// process reaping.
fn stop_child(mut child: Child, id: Uuid, grace: Duration) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        // Runtime already gone; kill_on_drop reclaims the process.
        let _ = child.start_kill();
        return;
    };

    runtime.spawn(async move {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // Ask nicely first so ffmpeg can flush and close its sockets.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = child.start_kill();

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => debug!("transcoder {} exited: {}", id, status),
            Ok(Err(e)) => warn!("transcoder {} wait failed: {}", id, e),
            Err(_) => {
                warn!("transcoder {} ignored stop signal, force killing", id);
                let _ = child.kill().await;
            }
        }
    });
}
