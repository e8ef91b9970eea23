pub mod config;
pub mod error;
pub mod ids;
pub mod playback;
pub mod policy;
pub mod session;
pub mod testing;
pub mod transcode;
pub mod transport;

pub use config::{Config, Timing};
pub use error::VoiceError;
pub use ids::{ChannelId, TenantId};
pub use playback::{PlaybackEngine, PlaybackEngineFactory, PlayerEvent, PlayerState};
pub use policy::{ContinuityMode, PresencePolicy, SettingsStore, StaticSettings, TenantSettings};
pub use session::{SessionSnapshot, StreamDescriptor, VoiceSessionManager};
pub use transcode::{FfmpegTranscoder, TranscoderSupervisor};
pub use transport::{ConnectionState, VoiceTransport};
