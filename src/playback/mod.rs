//! Playback engine binding
//!
//! Wraps one play/pause/resume/stop state machine per tenant plus an
//! attached gain control, fed by the transcoder's PCM output stream. The
//! concrete engine (voice gateway mixer, local speaker sink, test double)
//! lives behind [`PlaybackEngine`], mirroring how the platform transport is
//! abstracted in `crate::transport`.

mod engine;

pub use engine::{PlaybackEngine, PlaybackEngineFactory, PlayerEvent, PlayerState};
