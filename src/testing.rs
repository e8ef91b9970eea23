//! Scriptable collaborator doubles
//!
//! Stand-ins for the platform transport, the playback engine, and the
//! transcoder supervisor, with enough introspection (spawn counts, live
//! handles, recorded calls) for the integration tests to check the
//! one-connection / one-subprocess invariants from the outside.

use crate::error::VoiceError;
use crate::ids::{ChannelId, TenantId};
use crate::playback::{PlaybackEngine, PlaybackEngineFactory, PlayerEvent, PlayerState};
use crate::transcode::{ActiveTranscode, TranscoderHandle, TranscoderSupervisor};
use crate::transport::{ConnectionState, TransportConn, TransportLink, VoiceTransport};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A transport whose connections are driven by the test: channels can be
/// marked missing or permission-denied, and lifecycle events are injected
/// with [`MockTransport::emit`].
pub struct MockTransport {
    /// When set (the default), a fresh connection immediately walks
    /// Signalling -> Connecting -> Ready so joins complete without help.
    auto_ready: bool,
    state: Arc<Mutex<TransportState>>,
}

#[derive(Default)]
struct TransportState {
    missing: HashSet<ChannelId>,
    denied: HashSet<ChannelId>,
    senders: HashMap<TenantId, mpsc::Sender<ConnectionState>>,
    opens: usize,
    destroys: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

struct MockLink {
    destroyed: AtomicBool,
    destroys: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            auto_ready: true,
            state: Arc::new(Mutex::new(TransportState::default())),
        }
    }

    /// A transport that emits nothing on its own; the test drives every
    /// transition (used for join-timeout coverage).
    pub fn manual() -> Self {
        Self {
            auto_ready: false,
            state: Arc::new(Mutex::new(TransportState::default())),
        }
    }

    pub fn mark_missing(&self, channel: ChannelId) {
        self.state.lock().unwrap().missing.insert(channel);
    }

    pub fn mark_denied(&self, channel: ChannelId) {
        self.state.lock().unwrap().denied.insert(channel);
    }

    /// Inject a lifecycle event into the tenant's most recent connection.
    pub async fn emit(&self, tenant: TenantId, state: ConnectionState) {
        let sender = self.state.lock().unwrap().senders.get(&tenant).cloned();
        if let Some(tx) = sender {
            let _ = tx.send(state).await;
        }
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn destroy_count(&self) -> usize {
        self.state.lock().unwrap().destroys.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet destroyed.
    pub fn live_connections(&self) -> usize {
        self.state.lock().unwrap().live.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TransportLink for MockLink {
    async fn destroy(&self) {
        // Destroy must be idempotent; only the first call counts.
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait::async_trait]
impl VoiceTransport for MockTransport {
    async fn validate_channel(
        &self,
        _tenant: TenantId,
        channel: ChannelId,
    ) -> Result<(), VoiceError> {
        let state = self.state.lock().unwrap();
        if state.missing.contains(&channel) {
            return Err(VoiceError::ChannelNotFound(channel));
        }
        if state.denied.contains(&channel) {
            return Err(VoiceError::PermissionDenied(channel));
        }
        Ok(())
    }

    async fn open(
        &self,
        tenant: TenantId,
        channel: ChannelId,
    ) -> Result<TransportConn, VoiceError> {
        let (tx, rx) = mpsc::channel(16);

        let link = {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            state.live.fetch_add(1, Ordering::SeqCst);
            state.senders.insert(tenant, tx.clone());
            MockLink {
                destroyed: AtomicBool::new(false),
                destroys: Arc::clone(&state.destroys),
                live: Arc::clone(&state.live),
            }
        };

        if self.auto_ready {
            let _ = tx.send(ConnectionState::Signalling).await;
            let _ = tx.send(ConnectionState::Connecting).await;
            let _ = tx.send(ConnectionState::Ready).await;
        }

        Ok(TransportConn {
            channel,
            events: rx,
            link: Arc::new(link),
        })
    }
}

// ---------------------------------------------------------------------------
// Playback engine
// ---------------------------------------------------------------------------

/// Factory handing out [`MockEngine`]s and keeping a probe per tenant so
/// tests can inspect calls and inject engine events after the fact.
pub struct MockEngineFactory {
    probes: Mutex<HashMap<TenantId, Arc<EngineProbe>>>,
}

/// Test-side view of one engine: recorded calls, applied volume, and the
/// event sender used to simulate engine-driven transitions.
pub struct EngineProbe {
    events: mpsc::Sender<PlayerEvent>,
    volume: Mutex<f32>,
    calls: Mutex<Vec<&'static str>>,
}

struct MockEngine {
    probe: Arc<EngineProbe>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self {
            probes: Mutex::new(HashMap::new()),
        }
    }

    pub fn probe(&self, tenant: TenantId) -> Option<Arc<EngineProbe>> {
        self.probes.lock().unwrap().get(&tenant).cloned()
    }
}

impl Default for MockEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineProbe {
    /// Simulate an engine-driven event (idle without stop, fatal error, ...).
    pub async fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event).await;
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

impl PlaybackEngineFactory for MockEngineFactory {
    fn create(&self, tenant: TenantId) -> (Arc<dyn PlaybackEngine>, mpsc::Receiver<PlayerEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let probe = Arc::new(EngineProbe {
            events: tx,
            volume: Mutex::new(1.0),
            calls: Mutex::new(Vec::new()),
        });
        self.probes
            .lock()
            .unwrap()
            .insert(tenant, Arc::clone(&probe));
        (Arc::new(MockEngine { probe }), rx)
    }
}

#[async_trait::async_trait]
impl PlaybackEngine for MockEngine {
    async fn play(&self, _pcm: mpsc::Receiver<Vec<u8>>) {
        self.probe.record("play");
        // A healthy engine buffers briefly and then plays.
        let _ = self
            .probe
            .events
            .send(PlayerEvent::StateChanged(PlayerState::Buffering))
            .await;
        let _ = self
            .probe
            .events
            .send(PlayerEvent::StateChanged(PlayerState::Playing))
            .await;
    }

    async fn pause(&self) {
        self.probe.record("pause");
    }

    async fn resume(&self) {
        self.probe.record("resume");
    }

    async fn stop(&self) {
        self.probe.record("stop");
        let _ = self
            .probe
            .events
            .send(PlayerEvent::StateChanged(PlayerState::Idle))
            .await;
    }

    async fn set_volume(&self, volume: f32) {
        self.probe.record("set_volume");
        *self.probe.volume.lock().unwrap() = volume;
    }
}

// ---------------------------------------------------------------------------
// Transcoder
// ---------------------------------------------------------------------------

/// Supervisor double that fabricates PCM-less handles and tracks which of
/// them are still alive, so tests can assert the one-subprocess invariant.
pub struct MockTranscoder {
    state: Arc<Mutex<TranscoderState>>,
    fail_next: AtomicBool,
}

#[derive(Default)]
struct TranscoderState {
    spawned: Vec<(Uuid, String)>,
    live: HashMap<Uuid, mpsc::Sender<Vec<u8>>>,
}

impl MockTranscoder {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TranscoderState::default())),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Make the next spawn fail as if the external binary were missing.
    pub fn fail_next_spawn(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().unwrap().spawned.len()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn live_ids(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().live.keys().copied().collect()
    }

    pub fn last_spawned_url(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .spawned
            .last()
            .map(|(_, url)| url.clone())
    }
}

impl Default for MockTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TranscoderSupervisor for MockTranscoder {
    async fn spawn(&self, url: &str) -> Result<ActiveTranscode, VoiceError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(VoiceError::SubprocessSpawnFailure(
                "scripted spawn failure".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(8);
        {
            let mut state = self.state.lock().unwrap();
            state.spawned.push((id, url.to_string()));
            state.live.insert(id, tx);
        }

        let state = Arc::clone(&self.state);
        let stopper = Box::new(move || {
            state.lock().unwrap().live.remove(&id);
        });

        Ok(ActiveTranscode {
            handle: TranscoderHandle::new(id, stopper),
            pcm: rx,
        })
    }
}
