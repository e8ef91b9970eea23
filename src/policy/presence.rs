use super::settings::{ContinuityMode, SettingsStore};
use crate::ids::{ChannelId, TenantId};
use crate::session::VoiceSessionManager;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Evaluates membership changes and session-loss notices against each
/// tenant's continuity mode, and drives the session registry accordingly.
///
/// Evaluation is idempotent under duplicate notifications: decisions are
/// always made against the registry's current state plus a pending-rejoin
/// set, never against remembered event history.
#[derive(Clone)]
pub struct PresencePolicy {
    inner: Arc<PolicyInner>,
}

struct PolicyInner {
    manager: VoiceSessionManager,
    settings: Arc<dyn SettingsStore>,
    rejoin_delay: Duration,
    pending_rejoins: Mutex<HashSet<TenantId>>,
}

impl PresencePolicy {
    pub fn new(
        manager: VoiceSessionManager,
        settings: Arc<dyn SettingsStore>,
        rejoin_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PolicyInner {
                manager,
                settings,
                rejoin_delay,
                pending_rejoins: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Start consuming the manager's session-loss stream. Always-on tenants
    /// get a delayed rejoin scheduled for every unrecoverable loss.
    pub fn watch_session_loss(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let mut losses = inner.manager.session_loss_events();
        tokio::spawn(async move {
            while let Some(tenant) = losses.recv().await {
                let Some(settings) = inner.settings.tenant_settings(tenant).await else {
                    continue;
                };
                if settings.mode != ContinuityMode::AlwaysOn {
                    continue;
                }
                info!("always-on tenant {} lost its session", tenant);
                PolicyInner::schedule_rejoin(&inner, tenant);
            }
        })
    }

    /// Entry point for the external platform layer's occupancy
    /// notifications. `occupants_present` reflects non-automated members of
    /// `channel` after the change.
    pub async fn on_membership_changed(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        occupants_present: bool,
    ) {
        let Some(settings) = self.inner.settings.tenant_settings(tenant).await else {
            debug!("tenant {} has no voice settings, ignoring", tenant);
            return;
        };
        if settings.channel != channel {
            return;
        }

        match settings.mode {
            // Always-on sessions are kept regardless of occupancy; loss
            // handling happens via the session-loss stream.
            ContinuityMode::AlwaysOn => {}
            ContinuityMode::FollowOccupancy => {
                if occupants_present {
                    if self.inner.manager.has_session(tenant).await {
                        return;
                    }
                    info!(
                        "tenant {} channel {} has occupants, joining",
                        tenant, channel
                    );
                    PolicyInner::join_and_resume(&self.inner, tenant).await;
                } else if self.inner.manager.has_session(tenant).await {
                    info!("tenant {} channel {} is empty, leaving", tenant, channel);
                    self.inner.manager.leave(tenant).await;
                }
            }
        }
    }
}

impl PolicyInner {
    /// Schedule a delayed rejoin unless one is already pending. The timer
    /// re-checks registry state when it fires; a session that reappeared in
    /// the meantime makes it a no-op.
    fn schedule_rejoin(inner: &Arc<Self>, tenant: TenantId) {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            {
                let mut pending = inner.pending_rejoins.lock().await;
                if !pending.insert(tenant) {
                    debug!("tenant {} rejoin already pending", tenant);
                    return;
                }
            }

            tokio::time::sleep(inner.rejoin_delay).await;
            inner.pending_rejoins.lock().await.remove(&tenant);

            if inner.manager.has_session(tenant).await {
                debug!("tenant {} reconnected on its own, skipping rejoin", tenant);
                return;
            }
            info!("tenant {} attempting always-on rejoin", tenant);
            Self::join_and_resume(&inner, tenant).await;
        });
    }

    /// Join the tenant's configured channel and resume its default stream.
    async fn join_and_resume(inner: &Arc<Self>, tenant: TenantId) {
        let Some(settings) = inner.settings.tenant_settings(tenant).await else {
            return;
        };

        if let Err(e) = inner.manager.join(tenant, settings.channel).await {
            warn!("tenant {} automatic join failed: {}", tenant, e);
            return;
        }

        if let Some(descriptor) = settings.default_stream {
            if let Err(e) = inner.manager.play_stream(tenant, descriptor).await {
                warn!("tenant {} default stream failed to start: {}", tenant, e);
            }
        }
    }
}
