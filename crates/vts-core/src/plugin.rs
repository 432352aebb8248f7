use tracing::{info, warn};

use crate::config::PluginConfig;
use crate::emit::Emitter;
use crate::fetch::StatsFetcher;
use crate::model::{Connections, Snapshot};
use crate::snapshot::{reconcile, SnapshotStore};
use crate::Result;

pub const AUTOCONF_YES: &str = "yes";
pub const AUTOCONF_NO: &str = "no (no NGINX vts statistics)";

/// Outcome of one fetch / reconcile / save cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Poll {
    /// Whether the live fetch returned anything.
    pub live_present: bool,
    pub merged: Snapshot,
    pub connections: Option<Connections>,
}

impl Poll {
    fn emitter(&self) -> Emitter<'_> {
        Emitter::new(&self.merged, self.connections.as_ref())
    }
}

pub struct Plugin {
    config: PluginConfig,
    fetcher: StatsFetcher,
    store: SnapshotStore,
}

impl Plugin {
    pub fn new(config: PluginConfig) -> Result<Self> {
        let fetcher = StatsFetcher::new(config.url.clone(), config.timeout)?;
        let store = match config.state_dir.as_deref() {
            Some(dir) => SnapshotStore::new(dir),
            None => {
                warn!("no state directory configured; entities will not be carried over");
                SnapshotStore::disabled()
            }
        };
        Ok(Self {
            config,
            fetcher,
            store,
        })
    }

    /// Fetch live data and merge it with the stored snapshot without
    /// writing anything back.
    pub fn collect(&self, now: i64) -> Poll {
        let live = self.fetcher.fetch_or_empty();
        let previous = self.store.load();
        let merged = reconcile(&live.groups, &previous, now);
        info!(
            live = live.groups.len(),
            previous = previous.len(),
            merged = merged.len(),
            "snapshot reconciled"
        );
        Poll {
            live_present: live.has_data(),
            merged,
            connections: live.connections,
        }
    }

    /// Rewrite the state file with the merge. Runs on every poll, even when
    /// nothing changed, because `last_seen` advances.
    pub fn persist(&self, poll: &Poll) -> Result<()> {
        self.store.save(&poll.merged)
    }

    /// [`collect`](Self::collect) followed by [`persist`](Self::persist).
    pub fn poll(&self, now: i64) -> Result<Poll> {
        let poll = self.collect(now);
        self.persist(&poll)?;
        Ok(poll)
    }

    /// Answers from the live fetch only; carried-over entities do not prove
    /// the VTS module is reachable.
    pub fn autoconf(&self, poll: &Poll) -> String {
        if poll.live_present {
            AUTOCONF_YES.to_string()
        } else {
            AUTOCONF_NO.to_string()
        }
    }

    pub fn render_config(&self, poll: &Poll) -> String {
        let emitter = poll.emitter();
        let mut doc = emitter.config();
        if self.config.dirty_config {
            doc.extend(emitter.values());
        }
        doc.render()
    }

    pub fn render_values(&self, poll: &Poll) -> String {
        poll.emitter().values().render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityRecord;
    use crate::snapshot::{RETENTION_SECS, STATE_FILE_NAME};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    const NOW: i64 = 1_760_000_000;

    fn plugin(url: String, dir: &std::path::Path, dirty: bool) -> Plugin {
        Plugin::new(PluginConfig {
            url,
            timeout: Duration::from_secs(2),
            state_dir: Some(dir.to_path_buf()),
            dirty_config: dirty,
        })
        .expect("plugin")
    }

    fn seed(dir: &std::path::Path, key: &str, last_seen: i64) {
        let mut snap = Snapshot::default();
        snap.vhost.insert(
            key.to_string(),
            EntityRecord {
                request_counter: 5,
                in_bytes: 50,
                out_bytes: 60,
                last_seen,
                ..Default::default()
            },
        );
        SnapshotStore::new(dir).save(&snap).expect("seed");
    }

    fn mock_vts(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path("/status/format/json");
            then.status(200).json_body(json!({
                "connections": {"active": 2, "reading": 0, "writing": 1, "waiting": 1},
                "serverZones": {
                    "siteA": {
                        "requestCounter": 10, "inBytes": 100, "outBytes": 200,
                        "responses": {"1xx": 0, "2xx": 10, "3xx": 0, "4xx": 0, "5xx": 0}
                    }
                }
            }));
        });
    }

    #[test]
    fn poll_merges_live_with_carried_entities_and_persists() {
        let server = MockServer::start();
        mock_vts(&server);
        let dir = tempfile::tempdir().expect("tmpdir");
        seed(dir.path(), "siteB", NOW - 10);

        let plugin = plugin(server.url("/status/format/json"), dir.path(), false);
        let poll = plugin.poll(NOW).expect("poll");

        assert!(poll.live_present);
        assert_eq!(poll.merged.vhost.len(), 2);
        assert_eq!(poll.merged.vhost["siteA"].last_seen, NOW);
        assert_eq!(SnapshotStore::new(dir.path()).load(), poll.merged);
        assert_eq!(plugin.autoconf(&poll), "yes");

        let values = plugin.render_values(&poll);
        assert!(values.contains("multigraph nginx_vts_vhost_requests\n"));
        assert!(values.contains("sitea.value 10\n"));
        assert!(values.contains("siteb.value 5\n"));
        assert!(values.contains("active.value 2\n"));
    }

    #[test]
    fn expired_entities_are_pruned_from_disk() {
        let server = MockServer::start();
        mock_vts(&server);
        let dir = tempfile::tempdir().expect("tmpdir");
        seed(dir.path(), "siteB", NOW - RETENTION_SECS - 1);

        let plugin = plugin(server.url("/status/format/json"), dir.path(), false);
        let poll = plugin.poll(NOW).expect("poll");

        assert_eq!(poll.merged.vhost.keys().collect::<Vec<_>>(), vec!["siteA"]);
        let text = std::fs::read_to_string(dir.path().join(STATE_FILE_NAME)).unwrap();
        assert!(!text.contains("siteB"));
    }

    #[test]
    fn server_down_still_reports_carried_entities() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/status/format/json");
            then.status(503);
        });
        let dir = tempfile::tempdir().expect("tmpdir");
        seed(dir.path(), "siteB", NOW - 60);

        let plugin = plugin(server.url("/status/format/json"), dir.path(), false);
        let poll = plugin.poll(NOW).expect("poll");

        assert!(!poll.live_present);
        assert_eq!(plugin.autoconf(&poll), "no (no NGINX vts statistics)");
        let values = plugin.render_values(&poll);
        assert!(values.contains("siteb.value 5\n"));
        assert!(values.contains("active.value U\n"));
        // carried entities keep their original timestamp
        assert_eq!(poll.merged.vhost["siteB"].last_seen, NOW - 60);
    }

    #[test]
    fn dirty_config_appends_values() {
        let server = MockServer::start();
        mock_vts(&server);
        let dir = tempfile::tempdir().expect("tmpdir");

        let clean = plugin(server.url("/status/format/json"), dir.path(), false);
        let poll = clean.poll(NOW).expect("poll");
        let config = clean.render_config(&poll);
        assert!(config.contains("graph_title NGINX requests per virtual host\n"));
        assert!(!config.contains(".value "));

        let dirty = plugin(server.url("/status/format/json"), dir.path(), true);
        let config = dirty.render_config(&poll);
        assert!(config.contains("sitea.label siteA\n"));
        assert!(config.ends_with(&clean.render_values(&poll)));
    }

    #[test]
    fn collect_works_when_state_cannot_be_written() {
        let server = MockServer::start();
        mock_vts(&server);
        let dir = tempfile::tempdir().expect("tmpdir");
        let blocker = dir.path().join("state-file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let plugin = plugin(server.url("/status/format/json"), &blocker, false);
        let poll = plugin.collect(NOW);

        assert_eq!(plugin.autoconf(&poll), "yes");
        assert!(plugin.persist(&poll).is_err());
        assert!(plugin.poll(NOW).is_err());
    }

    #[test]
    fn runs_without_state_directory() {
        let server = MockServer::start();
        mock_vts(&server);
        let plugin = Plugin::new(PluginConfig {
            url: server.url("/status/format/json"),
            ..PluginConfig::default()
        })
        .expect("plugin");

        let poll = plugin.poll(NOW).expect("poll");
        assert_eq!(poll.merged.vhost.len(), 1);
    }
}
