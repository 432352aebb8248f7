//! Typed view of the VTS status document and of the persisted snapshot.
//!
//! The live payload is deserialized into explicit zone structures instead of
//! being walked as untyped JSON. Counter fields missing from a live entity
//! default to zero; a payload whose shape does not match at all fails to
//! deserialize and is treated by the fetcher as "no data".

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Response classes kept for virtual hosts, in render order.
pub const RESPONSE_CLASSES: [&str; 5] = ["1xx", "2xx", "3xx", "4xx", "5xx"];

/// Entities of one group, keyed by their raw name.
pub type EntityMap = BTreeMap<String, EntityRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricGroup {
    Vhost,
    Filter,
    Upstream,
}

impl MetricGroup {
    pub const ALL: [MetricGroup; 3] = [
        MetricGroup::Vhost,
        MetricGroup::Filter,
        MetricGroup::Upstream,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricGroup::Vhost => "vhost",
            MetricGroup::Filter => "filter",
            MetricGroup::Upstream => "upstream",
        }
    }

    /// Noun used in graph titles.
    pub fn title(self) -> &'static str {
        match self {
            MetricGroup::Vhost => "virtual host",
            MetricGroup::Filter => "filter",
            MetricGroup::Upstream => "upstream server",
        }
    }
}

impl fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for a single server zone, filter entry or upstream server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    #[serde(default)]
    pub request_counter: u64,
    #[serde(default)]
    pub in_bytes: u64,
    #[serde(default)]
    pub out_bytes: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub responses: BTreeMap<String, u64>,
    /// UNIX seconds of the last poll this entity was present in.
    #[serde(default)]
    pub last_seen: i64,
}

impl EntityRecord {
    pub fn response(&self, class: &str) -> u64 {
        self.responses.get(class).copied().unwrap_or(0)
    }

    fn keep_response_classes(mut self) -> Self {
        self.responses
            .retain(|class, _| RESPONSE_CLASSES.contains(&class.as_str()));
        self
    }

    fn without_responses(mut self) -> Self {
        self.responses.clear();
        self
    }
}

/// Server-wide connection gauges. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connections {
    #[serde(default)]
    pub active: u64,
    #[serde(default)]
    pub reading: u64,
    #[serde(default)]
    pub writing: u64,
    #[serde(default)]
    pub waiting: u64,
}

/// The three entity groups. This is also the on-disk snapshot format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub vhost: EntityMap,
    #[serde(default)]
    pub filter: EntityMap,
    #[serde(default)]
    pub upstream: EntityMap,
}

impl Snapshot {
    pub fn group(&self, group: MetricGroup) -> &EntityMap {
        match group {
            MetricGroup::Vhost => &self.vhost,
            MetricGroup::Filter => &self.filter,
            MetricGroup::Upstream => &self.upstream,
        }
    }

    pub fn group_mut(&mut self, group: MetricGroup) -> &mut EntityMap {
        match group {
            MetricGroup::Vhost => &mut self.vhost,
            MetricGroup::Filter => &mut self.filter,
            MetricGroup::Upstream => &mut self.upstream,
        }
    }

    pub fn is_empty(&self) -> bool {
        MetricGroup::ALL.iter().all(|g| self.group(*g).is_empty())
    }

    pub fn len(&self) -> usize {
        MetricGroup::ALL.iter().map(|g| self.group(*g).len()).sum()
    }
}

/// Result of one fetch: the entity groups plus the connection gauges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveStats {
    pub groups: Snapshot,
    pub connections: Option<Connections>,
}

impl LiveStats {
    /// True when the server returned anything worth reporting.
    pub fn has_data(&self) -> bool {
        self.connections.is_some() || !self.groups.is_empty()
    }
}

/// The parts of the VTS `format/json` document this plugin consumes.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VtsPayload {
    #[serde(default)]
    pub connections: Option<Connections>,
    #[serde(default)]
    pub server_zones: BTreeMap<String, EntityRecord>,
    /// filter name -> filter key -> counters
    #[serde(default)]
    pub filter_zones: BTreeMap<String, BTreeMap<String, EntityRecord>>,
    /// upstream group -> servers
    #[serde(default)]
    pub upstream_zones: BTreeMap<String, Vec<UpstreamServer>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpstreamServer {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(flatten)]
    pub record: EntityRecord,
}

impl VtsPayload {
    /// Reshape the payload into the three groups.
    ///
    /// Filter entries from all filter zones share one map; a key seen in a
    /// later zone replaces the earlier one. Upstream servers are keyed by
    /// their `server` address across all upstream groups.
    pub fn into_live(self) -> LiveStats {
        let mut groups = Snapshot::default();

        groups.vhost = self
            .server_zones
            .into_iter()
            .map(|(name, record)| (name, record.keep_response_classes()))
            .collect();

        for (_, entries) in self.filter_zones {
            for (name, record) in entries {
                groups.filter.insert(name, record.without_responses());
            }
        }

        for (zone, servers) in self.upstream_zones {
            for entry in servers {
                match entry.server {
                    Some(server) => {
                        groups
                            .upstream
                            .insert(server, entry.record.without_responses());
                    }
                    None => debug!(%zone, "skipping upstream entry without server address"),
                }
            }
        }

        LiveStats {
            groups,
            connections: self.connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> VtsPayload {
        serde_json::from_value(value).expect("payload")
    }

    #[test]
    fn reshapes_vts_document_into_groups() {
        let live = payload(json!({
            "hostName": "web01",
            "connections": {"active": 3, "reading": 0, "writing": 1, "waiting": 2, "accepted": 99},
            "serverZones": {
                "example.com": {
                    "requestCounter": 10, "inBytes": 100, "outBytes": 200,
                    "responses": {"1xx": 0, "2xx": 9, "3xx": 0, "4xx": 1, "5xx": 0, "miss": 4}
                },
                "*": {"requestCounter": 10, "inBytes": 100, "outBytes": 200}
            },
            "filterZones": {
                "country::*": {"KR": {"requestCounter": 1, "inBytes": 2, "outBytes": 3}},
                "ua::*": {"curl": {"requestCounter": 4, "inBytes": 5, "outBytes": 6}}
            },
            "upstreamZones": {
                "backend": [
                    {"server": "10.0.0.1:80", "requestCounter": 7, "inBytes": 8, "outBytes": 9, "weight": 1},
                    {"server": "unix:/run/app.sock", "requestCounter": 1}
                ]
            }
        }))
        .into_live();

        assert_eq!(
            live.connections,
            Some(Connections { active: 3, reading: 0, writing: 1, waiting: 2 })
        );
        let vhost = &live.groups.vhost["example.com"];
        assert_eq!(vhost.request_counter, 10);
        assert_eq!(vhost.response("2xx"), 9);
        assert!(!vhost.responses.contains_key("miss"));
        assert_eq!(live.groups.filter.len(), 2);
        assert_eq!(live.groups.filter["curl"].out_bytes, 6);
        assert_eq!(live.groups.upstream["10.0.0.1:80"].in_bytes, 8);
        assert_eq!(live.groups.upstream["unix:/run/app.sock"].out_bytes, 0);
        assert!(live.has_data());
    }

    #[test]
    fn later_filter_zone_wins_on_collision() {
        let live = payload(json!({
            "filterZones": {
                "a": {"shared": {"requestCounter": 1}},
                "b": {"shared": {"requestCounter": 2}}
            }
        }))
        .into_live();
        assert_eq!(live.groups.filter["shared"].request_counter, 2);
    }

    #[test]
    fn upstream_entries_without_server_are_skipped() {
        let live = payload(json!({
            "upstreamZones": {"::nogroups": [{"requestCounter": 5}]}
        }))
        .into_live();
        assert!(live.groups.upstream.is_empty());
        assert!(!live.has_data());
    }

    #[test]
    fn missing_counters_default_to_zero() {
        let record: EntityRecord = serde_json::from_value(json!({})).unwrap();
        assert_eq!(record, EntityRecord::default());
    }

    #[test]
    fn snapshot_serializes_with_sorted_keys_and_camel_case() {
        let mut snap = Snapshot::default();
        for name in ["zeta", "alpha"] {
            snap.vhost.insert(
                name.to_string(),
                EntityRecord {
                    request_counter: 1,
                    last_seen: 42,
                    ..Default::default()
                },
            );
        }
        let text = serde_json::to_string(&snap).unwrap();
        assert!(text.find("alpha").unwrap() < text.find("zeta").unwrap());
        assert!(text.contains("\"requestCounter\":1"));
        assert!(text.contains("\"lastSeen\":42"));
        assert!(!text.contains("responses"));
        assert_eq!(snap.len(), 2);
    }
}
