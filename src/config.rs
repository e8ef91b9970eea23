use crate::policy::ContinuityMode;
use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    /// Tenants the continuity policy knows about (the durable settings the
    /// external store would normally own).
    #[serde(default)]
    pub tenants: Vec<TenantEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

/// Timing knobs for the session manager, in milliseconds so tests can
/// shrink the windows without waiting out real-world delays.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    /// How long `join` waits for the transport to reach Ready.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// Grace given to a Disconnected connection before it is torn down.
    #[serde(default = "default_recovery_window_ms")]
    pub recovery_window_ms: u64,

    /// Delay before restarting a radio stream that went idle on its own.
    #[serde(default = "default_idle_restart_ms")]
    pub idle_restart_ms: u64,

    /// Backoff before retrying a radio stream after an engine error.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Delay before an always-on tenant attempts to rejoin after losing
    /// its connection.
    #[serde(default = "default_rejoin_delay_ms")]
    pub rejoin_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Output sample rate the playback engine expects.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Output channel count the playback engine expects.
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Window between the cooperative stop signal and the force kill.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantEntry {
    pub tenant: u64,
    pub channel: u64,
    #[serde(default)]
    pub mode: ContinuityMode,
    #[serde(default)]
    pub default_stream: Option<DefaultStream>,
}

/// The stream resumed automatically on rejoin / first occupancy.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultStream {
    pub url: String,
    pub name: String,
}

/// Resolved timing values consumed by the session manager.
#[derive(Debug, Clone)]
pub struct Timing {
    pub join_timeout: Duration,
    pub recovery_window: Duration,
    pub idle_restart: Duration,
    pub error_backoff: Duration,
    pub rejoin_delay: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: default_join_timeout_ms(),
            recovery_window_ms: default_recovery_window_ms(),
            idle_restart_ms: default_idle_restart_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            rejoin_delay_ms: default_rejoin_delay_ms(),
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            grace_ms: default_grace_ms(),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Timing::from(&VoiceConfig::default())
    }
}

impl From<&VoiceConfig> for Timing {
    fn from(cfg: &VoiceConfig) -> Self {
        Self {
            join_timeout: Duration::from_millis(cfg.join_timeout_ms),
            recovery_window: Duration::from_millis(cfg.recovery_window_ms),
            idle_restart: Duration::from_millis(cfg.idle_restart_ms),
            error_backoff: Duration::from_millis(cfg.error_backoff_ms),
            rejoin_delay: Duration::from_millis(cfg.rejoin_delay_ms),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

fn default_join_timeout_ms() -> u64 {
    10_000
}

fn default_recovery_window_ms() -> u64 {
    5_000
}

fn default_idle_restart_ms() -> u64 {
    1_000
}

fn default_error_backoff_ms() -> u64 {
    5_000
}

fn default_rejoin_delay_ms() -> u64 {
    3_000
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> u16 {
    2
}

fn default_grace_ms() -> u64 {
    2_000
}
