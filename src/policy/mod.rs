//! Presence and continuity policy
//!
//! Decides, on membership-change notifications and on session-loss events,
//! whether a tenant's session should be created, preserved, or torn down.
//! The per-tenant settings (mode, home channel, default stream) belong to an
//! external durable store; this module only reads them through the
//! [`SettingsStore`] seam.

mod presence;
mod settings;

pub use presence::PresencePolicy;
pub use settings::{ContinuityMode, SettingsStore, StaticSettings, TenantSettings};
