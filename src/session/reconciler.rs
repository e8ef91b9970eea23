//! Cross-wires transport and playback events into recovery actions.
//!
//! One reconciler task per session consumes the merged per-tenant event
//! queue. Every delayed action it schedules (recovery expiry, radio
//! restart, error backoff) re-checks the session's generation before
//! acting, so a timer outliving its session is a no-op instead of a
//! resurrection.

use super::registry::{DestroyCause, Inner, Session};
use super::SessionEvent;
use crate::ids::TenantId;
use crate::playback::{PlayerEvent, PlayerState};
use crate::transport::ConnectionState;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub(crate) fn spawn(
    inner: Weak<Inner>,
    tenant: TenantId,
    generation: u64,
    mut events: mpsc::Receiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else { break };
            handle_event(&inner, tenant, generation, event).await;
        }
        debug!(
            "reconciler for tenant {} (generation {}) finished",
            tenant, generation
        );
    })
}

async fn handle_event(inner: &Arc<Inner>, tenant: TenantId, generation: u64, event: SessionEvent) {
    let Some(slot) = inner.existing_slot(tenant).await else {
        return;
    };
    let mut guard = slot.session.lock().await;

    // Events raced against a destroy or a rebuild are stale; drop them.
    match guard.as_ref() {
        Some(session) if session.generation == generation => {}
        _ => return,
    }

    match event {
        SessionEvent::Connection(state) => {
            on_connection(inner, tenant, generation, &mut guard, state).await
        }
        SessionEvent::Player(player_event) => {
            on_player(inner, tenant, generation, &mut guard, player_event).await
        }
    }
}

async fn on_connection(
    inner: &Arc<Inner>,
    tenant: TenantId,
    generation: u64,
    guard: &mut Option<Session>,
    state: ConnectionState,
) {
    let Some(session) = guard.as_mut() else { return };
    let previous = session.connection_state;
    session.connection_state = state;
    if previous != state {
        debug!("tenant {} connection {:?} -> {:?}", tenant, previous, state);
    }

    match state {
        ConnectionState::Disconnected => {
            session.disconnect_seq += 1;
            let episode = session.disconnect_seq;
            info!(
                "tenant {} lost its connection, giving it {:?} to recover",
                tenant, inner.timing.recovery_window
            );
            schedule_recovery_expiry(inner, tenant, generation, episode);
        }
        ConnectionState::Destroyed => {
            info!("tenant {} transport destroyed, tearing the session down", tenant);
            inner
                .destroy_locked(tenant, guard, DestroyCause::ConnectionLost)
                .await;
        }
        _ => {}
    }
}

async fn on_player(
    inner: &Arc<Inner>,
    tenant: TenantId,
    generation: u64,
    guard: &mut Option<Session>,
    event: PlayerEvent,
) {
    let Some(session) = guard.as_mut() else { return };

    match event {
        PlayerEvent::StateChanged(state) => {
            let previous = session.player_state;
            session.player_state = state;
            if previous != state {
                debug!("tenant {} player {:?} -> {:?}", tenant, previous, state);
            }

            if state != PlayerState::Idle {
                return;
            }

            if session.stop_requested {
                // The caller asked for this; stream fields are already clear.
                session.stop_requested = false;
                return;
            }

            let name = session
                .stream
                .as_ref()
                .map(|d| d.display_name().to_string());
            match session.stream.as_ref().map(|d| d.is_radio()) {
                Some(true) => {
                    info!(
                        "tenant {} radio '{}' went idle, restarting in {:?}",
                        tenant,
                        name.unwrap_or_default(),
                        inner.timing.idle_restart
                    );
                    schedule_restart(inner, tenant, generation, inner.timing.idle_restart);
                }
                Some(false) => {
                    // Natural end of a finite item.
                    info!("tenant {} finished '{}'", tenant, name.unwrap_or_default());
                    session.stream = None;
                    if let Some(handle) = session.transcoder.take() {
                        handle.terminate();
                    }
                }
                None => {}
            }
        }
        PlayerEvent::Fatal(reason) => {
            warn!("tenant {} playback engine error: {}", tenant, reason);
            session.player_state = PlayerState::Idle;

            match session.stream.as_ref().map(|d| d.is_radio()) {
                Some(true) => {
                    info!(
                        "tenant {} retrying radio in {:?}",
                        tenant, inner.timing.error_backoff
                    );
                    schedule_restart(inner, tenant, generation, inner.timing.error_backoff);
                }
                Some(false) => {
                    // A finite item that errors may genuinely be broken;
                    // abandon it rather than hammering the source.
                    session.stream = None;
                    if let Some(handle) = session.transcoder.take() {
                        handle.terminate();
                    }
                }
                None => {}
            }
        }
    }
}

fn schedule_recovery_expiry(inner: &Arc<Inner>, tenant: TenantId, generation: u64, episode: u64) {
    let weak = Arc::downgrade(inner);
    let window = inner.timing.recovery_window;
    tokio::spawn(async move {
        tokio::time::sleep(window).await;
        let Some(inner) = weak.upgrade() else { return };
        inner.expire_recovery(tenant, generation, episode).await;
    });
}

fn schedule_restart(inner: &Arc<Inner>, tenant: TenantId, generation: u64, delay: Duration) {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(inner) = weak.upgrade() else { return };
        inner.restart_stream(tenant, generation).await;
    });
}

impl Inner {
    /// Recovery window expired. Destroy the session unless it recovered,
    /// was replaced, or has since entered a newer disconnect episode (which
    /// carries its own timer and deserves its own full window).
    pub(crate) async fn expire_recovery(
        self: &Arc<Self>,
        tenant: TenantId,
        generation: u64,
        episode: u64,
    ) {
        let Some(slot) = self.existing_slot(tenant).await else {
            return;
        };
        let mut guard = slot.session.lock().await;
        match guard.as_ref() {
            Some(session)
                if session.generation == generation
                    && session.disconnect_seq == episode
                    && session.connection_state == ConnectionState::Disconnected => {}
            _ => return,
        }
        info!(
            "tenant {} did not recover within the window, destroying session",
            tenant
        );
        self.destroy_locked(tenant, &mut guard, DestroyCause::ConnectionLost)
            .await;
    }

    /// Delayed radio restart. Only acts when the very session and stream it
    /// was scheduled for are still current and still idle.
    pub(crate) async fn restart_stream(self: &Arc<Self>, tenant: TenantId, generation: u64) {
        let Some(slot) = self.existing_slot(tenant).await else {
            return;
        };
        let mut guard = slot.session.lock().await;
        let Some(session) = guard.as_mut() else { return };
        if session.generation != generation {
            return;
        }
        if session.player_state != PlayerState::Idle {
            // A caller started something else while the timer was pending.
            return;
        }
        let Some(descriptor) = session.stream.clone() else {
            return;
        };
        if !descriptor.is_radio() {
            return;
        }

        info!(
            "tenant {} restarting radio '{}'",
            tenant,
            descriptor.display_name()
        );
        if let Err(e) = self
            .start_stream_locked(tenant, session, descriptor.clone())
            .await
        {
            warn!(
                "tenant {} radio restart failed ({}), retrying in {:?}",
                tenant, e, self.timing.error_backoff
            );
            // The failed start cleared the stream; put the descriptor back
            // so the next attempt still knows what to play.
            session.stream = Some(descriptor);
            schedule_restart(self, tenant, generation, self.timing.error_backoff);
        }
    }
}
