//! Carry-over of entity counters between plugin runs.
//!
//! Each run performs one read of the state file, one pure [`reconcile`] and one
//! write. There is no locking: the supervisor never runs two instances of the
//! plugin against the same state directory at once.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::model::{EntityMap, MetricGroup, Snapshot};
use crate::{Result, VtsError};

/// Absent entities are kept while seen within this window (30 days).
pub const RETENTION_SECS: i64 = 30 * 24 * 60 * 60;

pub const STATE_FILE_NAME: &str = "nginx_vts.json";

/// Merge freshly fetched groups with the previous snapshot.
///
/// Live entities are stamped with `now` and always replace a previous entry
/// with the same key. Entities only present in `previous` survive while
/// `last_seen > now - RETENTION_SECS`.
pub fn reconcile(live: &Snapshot, previous: &Snapshot, now: i64) -> Snapshot {
    let cutoff = now.saturating_sub(RETENTION_SECS);
    let mut merged = Snapshot::default();
    for group in MetricGroup::ALL {
        let fresh = live.group(group);
        let out: &mut EntityMap = merged.group_mut(group);
        for (key, record) in previous.group(group) {
            if fresh.contains_key(key) {
                continue;
            }
            if record.last_seen > cutoff {
                out.insert(key.clone(), record.clone());
            } else {
                debug!(%group, %key, last_seen = record.last_seen, "dropping expired entity");
            }
        }
        for (key, record) in fresh {
            let mut record = record.clone();
            record.last_seen = now;
            out.insert(key.clone(), record);
        }
    }
    merged
}

/// Reads and rewrites the persisted snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: Option<PathBuf>,
}

impl SnapshotStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: Some(dir.join(STATE_FILE_NAME)),
        }
    }

    /// A store that never touches the filesystem; every run starts empty.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the previous snapshot. A missing or unreadable file yields an
    /// empty snapshot.
    pub fn load(&self) -> Snapshot {
        let Some(path) = self.path.as_deref() else {
            return Snapshot::default();
        };
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no previous snapshot");
                return Snapshot::default();
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read snapshot; starting empty");
                return Snapshot::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(path = %path.display(), %err, "corrupt snapshot; starting empty");
                Snapshot::default()
            }
        }
    }

    /// Replace the state file with `snapshot`.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        save_bytes_atomic(path, &bytes).map_err(|source| VtsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), entities = snapshot.len(), "snapshot saved");
        Ok(())
    }
}

fn save_bytes_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    match fs::rename(&tmp, path) {
        Ok(_) => Ok(()),
        Err(_) => {
            let _ = fs::remove_file(path);
            let res = fs::rename(&tmp, path);
            if res.is_err() {
                let _ = fs::remove_file(&tmp);
            }
            res
        }
    }
}
