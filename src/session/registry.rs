use super::descriptor::StreamDescriptor;
use super::snapshot::SessionSnapshot;
use super::SessionEvent;
use crate::config::Timing;
use crate::error::VoiceError;
use crate::ids::{ChannelId, TenantId};
use crate::playback::{PlaybackEngine, PlaybackEngineFactory, PlayerState};
use crate::transcode::{TranscoderHandle, TranscoderSupervisor};
use crate::transport::{ConnectionState, TransportConn, TransportLink, VoiceTransport};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The session registry: one composite record per tenant, every mutation
/// funneled through registry-owned operations.
///
/// Cross-tenant calls run concurrently; calls for one tenant serialize on
/// that tenant's slot lock, so two concurrent joins (or plays) can never
/// race two connections or two transcoders into existence.
#[derive(Clone)]
pub struct VoiceSessionManager {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) transport: Arc<dyn VoiceTransport>,
    pub(crate) engines: Arc<dyn PlaybackEngineFactory>,
    pub(crate) transcoder: Arc<dyn TranscoderSupervisor>,
    pub(crate) timing: Timing,
    slots: RwLock<HashMap<TenantId, Arc<TenantSlot>>>,
    /// Last chosen volume per tenant. Outlives sessions on purpose: the
    /// value is reapplied verbatim when the tenant connects again.
    volumes: RwLock<HashMap<TenantId, f32>>,
    next_generation: AtomicU64,
    loss_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<TenantId>>>,
}

pub(crate) struct TenantSlot {
    pub(crate) session: Mutex<Option<Session>>,
}

/// Everything one tenant's live session owns.
pub(crate) struct Session {
    pub(crate) channel: ChannelId,
    /// Monotonic marker checked by every scheduled recovery action, so a
    /// timer from a destroyed session can never act on its successor.
    pub(crate) generation: u64,
    pub(crate) connection_state: ConnectionState,
    /// Bumped on every transition into Disconnected. Each recovery timer
    /// captures the value it was armed for, so a timer from an earlier
    /// disconnect episode cannot cut a later episode's window short.
    pub(crate) disconnect_seq: u64,
    pub(crate) player_state: PlayerState,
    pub(crate) stream: Option<StreamDescriptor>,
    /// Set by an explicit stop so the resulting Idle event is not mistaken
    /// for an unexpected end-of-stream.
    pub(crate) stop_requested: bool,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) engine: Arc<dyn PlaybackEngine>,
    pub(crate) link: Arc<dyn TransportLink>,
    pub(crate) transcoder: Option<TranscoderHandle>,
    /// Listener tasks forwarding transport/player events onto the merged
    /// queue. Aborted exactly once, before the rest of the record is torn
    /// down, so no event ever fires against a destroyed session.
    pub(crate) pumps: Vec<JoinHandle<()>>,
    pub(crate) reconciler: Option<JoinHandle<()>>,
}

/// Why a session record is being destroyed. `ConnectionLost` is the one
/// cause that came out of the reconciler itself and the one the continuity
/// policy wants to hear about.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DestroyCause {
    Leave,
    Replaced,
    ConnectionLost,
}

impl VoiceSessionManager {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        engines: Arc<dyn PlaybackEngineFactory>,
        transcoder: Arc<dyn TranscoderSupervisor>,
        timing: Timing,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                engines,
                transcoder,
                timing,
                slots: RwLock::new(HashMap::new()),
                volumes: RwLock::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                loss_tx: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Connect `tenant` to `channel` and wait until the transport is Ready.
    ///
    /// Idempotent for the same target: a healthy connection already pointing
    /// at `channel` is reused. A connection to the wrong channel or in a
    /// dead state is destroyed and rebuilt. On timeout the half-built
    /// session is fully rolled back and nothing stays registered.
    pub async fn join(&self, tenant: TenantId, channel: ChannelId) -> Result<(), VoiceError> {
        self.inner.transport.validate_channel(tenant, channel).await?;

        let slot = self.inner.slot(tenant).await;
        let mut guard = slot.session.lock().await;

        if let Some(session) = guard.as_ref() {
            if session.channel == channel && session.connection_state.is_healthy() {
                debug!(
                    "tenant {} already connected to channel {}, reusing",
                    tenant, channel
                );
                return Ok(());
            }
            info!("tenant {} connection is stale or misplaced, rebuilding", tenant);
            self.inner
                .destroy_locked(tenant, &mut guard, DestroyCause::Replaced)
                .await;
        }

        let TransportConn {
            events: mut conn_events,
            link,
            ..
        } = self.inner.transport.open(tenant, channel).await?;

        let waited = tokio::time::timeout(self.inner.timing.join_timeout, async {
            while let Some(state) = conn_events.recv().await {
                match state {
                    ConnectionState::Ready => return Ok(()),
                    ConnectionState::Destroyed => {
                        return Err(VoiceError::Transport(
                            "connection destroyed before becoming ready".to_string(),
                        ))
                    }
                    _ => {}
                }
            }
            Err(VoiceError::Transport(
                "transport closed the event stream during join".to_string(),
            ))
        })
        .await;

        match waited {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                link.destroy().await;
                return Err(e);
            }
            Err(_) => {
                warn!(
                    "tenant {} join to channel {} timed out, rolling back",
                    tenant, channel
                );
                link.destroy().await;
                return Err(VoiceError::ConnectionTimeout(channel));
            }
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (engine, mut player_events) = self.inner.engines.create(tenant);

        // Reapply the tenant's last chosen volume before anything plays.
        engine.set_volume(self.inner.volume_for(tenant).await).await;

        let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(64);

        let conn_tx = events_tx.clone();
        let conn_pump = tokio::spawn(async move {
            while let Some(state) = conn_events.recv().await {
                if conn_tx.send(SessionEvent::Connection(state)).await.is_err() {
                    break;
                }
            }
        });

        let player_tx = events_tx;
        let player_pump = tokio::spawn(async move {
            while let Some(event) = player_events.recv().await {
                if player_tx.send(SessionEvent::Player(event)).await.is_err() {
                    break;
                }
            }
        });

        let reconciler =
            super::reconciler::spawn(Arc::downgrade(&self.inner), tenant, generation, events_rx);

        *guard = Some(Session {
            channel,
            generation,
            connection_state: ConnectionState::Ready,
            disconnect_seq: 0,
            player_state: PlayerState::Idle,
            stream: None,
            stop_requested: false,
            started_at: Utc::now(),
            engine,
            link,
            transcoder: None,
            pumps: vec![conn_pump, player_pump],
            reconciler: Some(reconciler),
        });

        info!(
            "tenant {} joined channel {} (generation {})",
            tenant, channel, generation
        );
        Ok(())
    }

    /// Tear down `tenant`'s session. Returns false when there was nothing
    /// to tear down; safe to call redundantly and on degraded sessions.
    pub async fn leave(&self, tenant: TenantId) -> bool {
        let Some(slot) = self.inner.existing_slot(tenant).await else {
            return false;
        };
        let mut guard = slot.session.lock().await;
        if guard.is_none() {
            return false;
        }
        self.inner
            .destroy_locked(tenant, &mut guard, DestroyCause::Leave)
            .await;
        true
    }

    pub async fn has_session(&self, tenant: TenantId) -> bool {
        match self.inner.existing_slot(tenant).await {
            Some(slot) => slot.session.lock().await.is_some(),
            None => false,
        }
    }

    pub async fn snapshot(&self, tenant: TenantId) -> Option<SessionSnapshot> {
        let slot = self.inner.existing_slot(tenant).await?;
        let guard = slot.session.lock().await;
        let session = guard.as_ref()?;
        Some(SessionSnapshot {
            tenant,
            channel: session.channel,
            connection_state: session.connection_state,
            player_state: session.player_state,
            stream: session.stream.clone(),
            volume: self.inner.volume_for(tenant).await,
            transcoder_live: session.transcoder.is_some(),
            started_at: session.started_at,
        })
    }

    /// Start streaming `descriptor`, unconditionally replacing whatever was
    /// playing before. The previous transcoder is always reclaimed first,
    /// even when it was perfectly healthy.
    pub async fn play_stream(
        &self,
        tenant: TenantId,
        descriptor: StreamDescriptor,
    ) -> Result<(), VoiceError> {
        let Some(slot) = self.inner.existing_slot(tenant).await else {
            return Err(VoiceError::NoSession(tenant));
        };
        let mut guard = slot.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Err(VoiceError::NoSession(tenant));
        };
        self.inner
            .start_stream_locked(tenant, session, descriptor)
            .await
    }

    /// Pause playback. Only valid from Playing; anything else is a clean
    /// `false` with no state change.
    pub async fn pause(&self, tenant: TenantId) -> bool {
        let Some(slot) = self.inner.existing_slot(tenant).await else {
            return false;
        };
        let mut guard = slot.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return false;
        };
        if session.player_state != PlayerState::Playing {
            return false;
        }
        session.player_state = PlayerState::Paused;
        session.engine.pause().await;
        true
    }

    /// Resume playback. Only valid from Paused.
    pub async fn resume(&self, tenant: TenantId) -> bool {
        let Some(slot) = self.inner.existing_slot(tenant).await else {
            return false;
        };
        let mut guard = slot.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return false;
        };
        if session.player_state != PlayerState::Paused {
            return false;
        }
        session.player_state = PlayerState::Playing;
        session.engine.resume().await;
        true
    }

    /// Stop playback and clear the stream. Valid from Playing or Paused.
    pub async fn stop(&self, tenant: TenantId) -> bool {
        let Some(slot) = self.inner.existing_slot(tenant).await else {
            return false;
        };
        let mut guard = slot.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return false;
        };
        if !matches!(
            session.player_state,
            PlayerState::Playing | PlayerState::Paused
        ) {
            return false;
        }
        session.stop_requested = true;
        session.stream = None;
        session.player_state = PlayerState::Idle;
        if let Some(handle) = session.transcoder.take() {
            handle.terminate();
        }
        session.engine.stop().await;
        true
    }

    /// Record `volume` (clamped to [0.0, 2.0]) for `tenant` and apply it to
    /// the live engine if one exists. The value is recorded either way so it
    /// survives to the tenant's next stream; the return value only says
    /// whether a live engine picked it up immediately.
    pub async fn set_volume(&self, tenant: TenantId, volume: f32) -> bool {
        let clamped = volume.clamp(0.0, 2.0);
        self.inner.volumes.write().await.insert(tenant, clamped);

        if let Some(slot) = self.inner.existing_slot(tenant).await {
            let guard = slot.session.lock().await;
            if let Some(session) = guard.as_ref() {
                session.engine.set_volume(clamped).await;
                return true;
            }
        }
        false
    }

    /// The tenant's persisted volume (1.0 if never set).
    pub async fn volume(&self, tenant: TenantId) -> f32 {
        self.inner.volume_for(tenant).await
    }

    pub async fn player_state(&self, tenant: TenantId) -> Option<PlayerState> {
        let slot = self.inner.existing_slot(tenant).await?;
        let guard = slot.session.lock().await;
        guard.as_ref().map(|s| s.player_state)
    }

    /// Stream of tenants whose sessions were destroyed by unrecoverable
    /// connection loss (not by explicit leave). Consumed by the continuity
    /// policy to drive always-on rejoins.
    pub fn session_loss_events(&self) -> mpsc::UnboundedReceiver<TenantId> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.loss_tx.lock().unwrap() = Some(tx);
        rx
    }

    /// Destroy every live session. Volumes are deliberately kept.
    pub async fn shutdown(&self) {
        let tenants: Vec<TenantId> = self.inner.slots.read().await.keys().copied().collect();
        join_all(tenants.into_iter().map(|tenant| self.leave(tenant))).await;
        info!("voice session manager shut down");
    }
}

impl Inner {
    pub(crate) async fn slot(&self, tenant: TenantId) -> Arc<TenantSlot> {
        if let Some(slot) = self.slots.read().await.get(&tenant) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(tenant).or_insert_with(|| {
            Arc::new(TenantSlot {
                session: Mutex::new(None),
            })
        }))
    }

    pub(crate) async fn existing_slot(&self, tenant: TenantId) -> Option<Arc<TenantSlot>> {
        self.slots.read().await.get(&tenant).cloned()
    }

    pub(crate) async fn volume_for(&self, tenant: TenantId) -> f32 {
        self.volumes
            .read()
            .await
            .get(&tenant)
            .copied()
            .unwrap_or(1.0)
    }

    /// Replace whatever is streaming with `descriptor`. Caller holds the
    /// slot lock. On spawn failure the session is left idle with no stream
    /// and no transcoder.
    pub(crate) async fn start_stream_locked(
        &self,
        tenant: TenantId,
        session: &mut Session,
        descriptor: StreamDescriptor,
    ) -> Result<(), VoiceError> {
        // One transcoder per tenant: always reclaim the previous one first.
        if let Some(old) = session.transcoder.take() {
            old.terminate();
        }

        let active = match self.transcoder.spawn(descriptor.url()).await {
            Ok(active) => active,
            Err(e) => {
                session.stream = None;
                session.player_state = PlayerState::Idle;
                return Err(e);
            }
        };

        let name = descriptor.display_name().to_string();
        session.engine.play(active.pcm).await;
        session.transcoder = Some(active.handle);
        session.stream = Some(descriptor);
        session.stop_requested = false;
        session.player_state = PlayerState::Buffering;

        info!("tenant {} now streaming '{}'", tenant, name);
        Ok(())
    }

    /// Release everything the session owns. Caller holds the slot lock.
    pub(crate) async fn destroy_locked(
        &self,
        tenant: TenantId,
        guard: &mut Option<Session>,
        cause: DestroyCause,
    ) {
        let Some(mut session) = guard.take() else {
            return;
        };

        // Silence the listeners first so no event fires against the dying
        // session. The merged queue's senders die with the pumps.
        for pump in session.pumps.drain(..) {
            pump.abort();
        }

        if let Some(handle) = session.transcoder.take() {
            handle.terminate();
        }

        session.engine.stop().await;
        session.link.destroy().await;

        match cause {
            DestroyCause::ConnectionLost => {
                // The reconciler may be the task running this destroy; it
                // exits on its own once the event queue closes, so it is
                // never aborted from under itself.
                if let Some(tx) = self.loss_tx.lock().unwrap().as_ref() {
                    let _ = tx.send(tenant);
                }
            }
            DestroyCause::Leave | DestroyCause::Replaced => {
                if let Some(handle) = session.reconciler.take() {
                    handle.abort();
                }
            }
        }

        info!(
            "tenant {} session destroyed (cause: {:?}, generation {})",
            tenant, cause, session.generation
        );
    }
}
