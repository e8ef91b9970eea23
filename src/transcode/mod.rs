//! Transcoder subprocess supervision
//!
//! Each playing session owns exactly one external transcoder process that
//! turns a remote audio URL into raw PCM for the playback engine. The
//! supervisor launches it, hands its stdout to the engine as a byte stream,
//! drains stderr as diagnostics, and tears it down graceful-then-forced
//! without ever blocking the caller on process reaping.

mod ffmpeg;
mod supervisor;

pub use ffmpeg::FfmpegTranscoder;
pub use supervisor::{ActiveTranscode, TranscoderHandle, TranscoderSupervisor};
