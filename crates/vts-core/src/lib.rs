//! Polls the NGINX virtual-traffic-status module and renders its counters as
//! Munin multigraph output.
//!
//! Entities that vanish from the live response (an NGINX reload resets the VTS
//! zone) keep being reported from a persisted snapshot for up to 30 days so the
//! supervisor's graphs do not drop out after every reload.

pub mod config;
pub mod emit;
pub mod fetch;
pub mod labels;
pub mod model;
pub mod plugin;
pub mod snapshot;
pub mod util;

pub use config::PluginConfig;
pub use emit::{Document, Emitter, Line, Section};
pub use fetch::StatsFetcher;
pub use labels::{cleanup_name, sanitize_key, short_label};
pub use model::{Connections, EntityMap, EntityRecord, LiveStats, MetricGroup, Snapshot};
pub use plugin::{Plugin, Poll};
pub use snapshot::{reconcile, SnapshotStore, RETENTION_SECS};

use std::path::PathBuf;

/// Errors surfaced by the fetch and persistence layers.
#[derive(thiserror::Error, Debug)]
pub enum VtsError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status from {url}: {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = VtsError> = std::result::Result<T, E>;
