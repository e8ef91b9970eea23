use anyhow::Result;
use clap::Parser;
use tracing::info;
use voicekeeper::{Config, ContinuityMode};

#[derive(Parser)]
#[command(name = "voicekeeper", about = "Per-tenant voice session manager")]
struct Args {
    /// Config file (without extension), resolved by the config crate
    #[arg(long, default_value = "config/voicekeeper")]
    config: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} v0.1.0", cfg.service.name);
    info!(
        "join timeout {}ms, recovery window {}ms, rejoin delay {}ms",
        cfg.voice.join_timeout_ms, cfg.voice.recovery_window_ms, cfg.voice.rejoin_delay_ms
    );
    info!(
        "transcoder: {} ({} Hz, {} channels)",
        cfg.transcode.ffmpeg_path, cfg.transcode.sample_rate, cfg.transcode.channels
    );

    if cfg.tenants.is_empty() {
        info!("no tenants configured; the platform frontend supplies join calls at runtime");
    }
    for entry in &cfg.tenants {
        let mode = match entry.mode {
            ContinuityMode::AlwaysOn => "always-on",
            ContinuityMode::FollowOccupancy => "follow-occupancy",
        };
        let stream = entry
            .default_stream
            .as_ref()
            .map(|s| format!(", default stream '{}'", s.name))
            .unwrap_or_default();
        info!(
            "tenant {} -> channel {} ({}{})",
            entry.tenant, entry.channel, mode, stream
        );
    }

    Ok(())
}
