use serde::{Deserialize, Serialize};

/// What a session is currently streaming.
///
/// The tag decides how the reconciler reacts to the engine going idle or
/// erroring out: a radio is theoretically endless, so end-of-stream is a
/// failure to recover from; a catalog item is finite, so end-of-stream is
/// normal completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamDescriptor {
    Radio {
        url: String,
        station: String,
    },
    Catalog {
        url: String,
        title: String,
        artist: String,
        #[serde(default)]
        metadata: serde_json::Value,
    },
}

impl StreamDescriptor {
    pub fn url(&self) -> &str {
        match self {
            StreamDescriptor::Radio { url, .. } => url,
            StreamDescriptor::Catalog { url, .. } => url,
        }
    }

    pub fn is_radio(&self) -> bool {
        matches!(self, StreamDescriptor::Radio { .. })
    }

    /// Human-readable name for logging.
    pub fn display_name(&self) -> &str {
        match self {
            StreamDescriptor::Radio { station, .. } => station,
            StreamDescriptor::Catalog { title, .. } => title,
        }
    }
}
