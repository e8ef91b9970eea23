use crate::config::Config;
use crate::ids::{ChannelId, TenantId};
use crate::session::StreamDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether a tenant's session persists with no listeners or follows
/// channel occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityMode {
    /// Keep a session alive around the clock; rejoin after any loss.
    AlwaysOn,
    /// Join when the first occupant arrives, leave when the last one goes.
    #[default]
    FollowOccupancy,
}

/// The durable per-tenant voice settings, as read from the external store.
#[derive(Debug, Clone)]
pub struct TenantSettings {
    pub mode: ContinuityMode,
    /// The channel this tenant's sessions live in.
    pub channel: ChannelId,
    /// Stream resumed automatically on rejoin / first occupancy.
    pub default_stream: Option<StreamDescriptor>,
}

/// Read-only view onto the durable settings store. The policy consults it
/// on every evaluation and never writes back.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn tenant_settings(&self, tenant: TenantId) -> Option<TenantSettings>;
}

/// Settings loaded once from the config file. Stands in for the durable
/// store in the binary and in tests.
#[derive(Debug, Default)]
pub struct StaticSettings {
    entries: HashMap<TenantId, TenantSettings>,
}

impl StaticSettings {
    pub fn new(entries: HashMap<TenantId, TenantSettings>) -> Self {
        Self { entries }
    }

    pub fn from_config(config: &Config) -> Self {
        let entries = config
            .tenants
            .iter()
            .map(|entry| {
                let default_stream = entry.default_stream.as_ref().map(|s| {
                    StreamDescriptor::Radio {
                        url: s.url.clone(),
                        station: s.name.clone(),
                    }
                });
                (
                    TenantId(entry.tenant),
                    TenantSettings {
                        mode: entry.mode,
                        channel: ChannelId(entry.channel),
                        default_stream,
                    },
                )
            })
            .collect();
        Self { entries }
    }
}

#[async_trait::async_trait]
impl SettingsStore for StaticSettings {
    async fn tenant_settings(&self, tenant: TenantId) -> Option<TenantSettings> {
        self.entries.get(&tenant).cloned()
    }
}
