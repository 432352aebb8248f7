//! Munin multigraph output.
//!
//! [`Emitter`] assembles a [`Document`] of `(section, key, value)` triples;
//! [`Document::render`] is the only place that knows the line format.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::labels::{display_name, sanitize_key, short_label, WILDCARD};
use crate::model::{Connections, EntityMap, EntityRecord, MetricGroup, Snapshot, RESPONSE_CLASSES};

pub const GRAPH_PREFIX: &str = "nginx_vts";
pub const GRAPH_CATEGORY: &str = "webserver";
/// Munin's marker for an unknown value.
pub const UNKNOWN: &str = "U";

const CONNECTION_FIELDS: [(&str, &str); 4] = [
    ("active", "Open client connections"),
    ("reading", "Connections reading the request header"),
    ("writing", "Connections writing a response"),
    ("waiting", "Idle keep-alive connections"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub key: String,
    pub value: String,
}

/// One `multigraph` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub graph: String,
    pub lines: Vec<Line>,
}

impl Section {
    pub fn new(graph: impl Into<String>) -> Self {
        Self {
            graph: graph.into(),
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.lines.push(Line {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }

    /// Push a `<field>.<attr> <value>` line.
    pub fn attr(&mut self, field: &str, attr: &str, value: impl ToString) -> &mut Self {
        self.push(format!("{field}.{attr}"), value)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|line| line.key == key)
            .map(|line| line.value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub sections: Vec<Section>,
}

impl Document {
    pub fn section(&self, graph: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.graph == graph)
    }

    pub fn graphs(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.graph.as_str()).collect()
    }

    pub fn extend(&mut self, other: Document) {
        self.sections.extend(other.sections);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            let _ = writeln!(out, "multigraph {}", section.graph);
            for line in &section.lines {
                let _ = writeln!(out, "{} {}", line.key, line.value);
            }
        }
        out
    }
}

pub fn requests_graph(group: MetricGroup) -> String {
    format!("{GRAPH_PREFIX}_{group}_requests")
}

pub fn traffic_graph(group: MetricGroup) -> String {
    format!("{GRAPH_PREFIX}_{group}_traffic")
}

/// Builds config and value documents from a reconciled snapshot.
pub struct Emitter<'a> {
    groups: &'a Snapshot,
    connections: Option<&'a Connections>,
}

impl<'a> Emitter<'a> {
    pub fn new(groups: &'a Snapshot, connections: Option<&'a Connections>) -> Self {
        Self {
            groups,
            connections,
        }
    }

    pub fn config(&self) -> Document {
        let mut doc = Document::default();
        doc.sections.push(self.server_config());
        for group in self.non_empty_groups() {
            let fields = field_keys(self.groups.group(group));
            doc.sections.push(requests_config(group, &fields));
            doc.sections.push(traffic_config(group, &fields));
        }
        doc
    }

    pub fn values(&self) -> Document {
        let mut doc = Document::default();
        doc.sections.push(self.server_values());
        for group in self.non_empty_groups() {
            let fields = field_keys(self.groups.group(group));
            let mut requests = Section::new(requests_graph(group));
            let mut traffic = Section::new(traffic_graph(group));
            for field in &fields {
                requests.attr(&field.key, "value", field.record.request_counter);
                traffic.attr(&format!("{}_in", field.key), "value", field.record.in_bytes);
                traffic.attr(&format!("{}_out", field.key), "value", field.record.out_bytes);
            }
            doc.sections.push(requests);
            doc.sections.push(traffic);
        }
        doc
    }

    fn non_empty_groups(&self) -> impl Iterator<Item = MetricGroup> + '_ {
        MetricGroup::ALL
            .into_iter()
            .filter(|g| !self.groups.group(*g).is_empty())
    }

    fn server_config(&self) -> Section {
        let mut s = Section::new(GRAPH_PREFIX);
        s.push("graph_title", "NGINX connections and responses")
            .push("graph_vlabel", "connections / responses per ${graph_period}")
            .push("graph_category", GRAPH_CATEGORY)
            .push("graph_args", "--base 1000 -l 0")
            .push(
                "graph_info",
                "Connection state and response classes summed over all virtual hosts",
            );
        for (field, info) in CONNECTION_FIELDS {
            s.attr(field, "label", field)
                .attr(field, "info", info)
                .attr(field, "type", "GAUGE")
                .attr(field, "min", 0);
        }
        for class in RESPONSE_CLASSES {
            let field = sanitize_key(class);
            s.attr(&field, "label", class)
                .attr(&field, "info", format!("{class} responses"))
                .attr(&field, "type", "DERIVE")
                .attr(&field, "min", 0);
        }
        s
    }

    fn server_values(&self) -> Section {
        let mut s = Section::new(GRAPH_PREFIX);
        match self.connections {
            Some(c) => {
                for (field, value) in [
                    ("active", c.active),
                    ("reading", c.reading),
                    ("writing", c.writing),
                    ("waiting", c.waiting),
                ] {
                    s.attr(field, "value", value);
                }
            }
            None => {
                for (field, _) in CONNECTION_FIELDS {
                    s.attr(field, "value", UNKNOWN);
                }
            }
        }
        let totals = response_totals(&self.groups.vhost);
        for (class, total) in RESPONSE_CLASSES.iter().zip(totals) {
            s.attr(&sanitize_key(class), "value", total);
        }
        s
    }
}

/// Response class counters summed over every vhost except the wildcard
/// aggregate, in [`RESPONSE_CLASSES`] order.
pub fn response_totals(vhosts: &EntityMap) -> [u64; 5] {
    let mut totals = [0u64; 5];
    for (_, record) in vhosts.iter().filter(|(key, _)| key.as_str() != WILDCARD) {
        for (slot, class) in totals.iter_mut().zip(RESPONSE_CLASSES) {
            *slot = slot.saturating_add(record.response(class));
        }
    }
    totals
}

struct Field<'a> {
    key: String,
    raw: &'a str,
    record: &'a EntityRecord,
}

/// Sanitized field names for a group.
///
/// When several raw names sanitize to the same key, the one already equal to
/// the key keeps it and the others get a suffix derived from their own raw
/// name, so a field keeps its name when other colliders come and go.
fn field_keys(entities: &EntityMap) -> Vec<Field<'_>> {
    let bases: Vec<String> = entities.keys().map(|raw| sanitize_key(raw)).collect();
    let mut shared: BTreeMap<&str, usize> = BTreeMap::new();
    for base in &bases {
        *shared.entry(base.as_str()).or_default() += 1;
    }
    let mut used = BTreeSet::new();
    entities
        .iter()
        .zip(&bases)
        .map(|((raw, record), base)| {
            let mut key = if shared[base.as_str()] == 1 || raw == base {
                base.clone()
            } else {
                format!("{base}_{}", key_suffix(raw))
            };
            let mut n = 2;
            while !used.insert(key.clone()) {
                key = format!("{base}_{n}");
                n += 1;
            }
            Field {
                key,
                raw: raw.as_str(),
                record,
            }
        })
        .collect()
}

/// First four bytes of the raw name's SHA-256, as hex.
fn key_suffix(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        let _ = write!(&mut hex, "{:02x}", byte);
    }
    hex
}

fn requests_config(group: MetricGroup, fields: &[Field<'_>]) -> Section {
    let mut s = Section::new(requests_graph(group));
    s.push("graph_title", format!("NGINX requests per {}", group.title()))
        .push("graph_vlabel", "requests per ${graph_period}")
        .push("graph_category", GRAPH_CATEGORY)
        .push("graph_args", "--base 1000 -l 0");
    for field in fields {
        s.attr(&field.key, "label", short_label(field.raw))
            .attr(&field.key, "info", display_name(field.raw))
            .attr(&field.key, "type", "COUNTER")
            .attr(&field.key, "min", 0);
    }
    s
}

fn traffic_config(group: MetricGroup, fields: &[Field<'_>]) -> Section {
    let mut s = Section::new(traffic_graph(group));
    s.push("graph_title", format!("NGINX traffic per {}", group.title()))
        .push("graph_vlabel", "bytes in (-) / out (+) per ${graph_period}")
        .push("graph_category", GRAPH_CATEGORY)
        .push("graph_args", "--base 1024");
    for field in fields {
        let label = short_label(field.raw);
        let inbound = format!("{}_in", field.key);
        let outbound = format!("{}_out", field.key);
        s.attr(&inbound, "label", &label)
            .attr(&inbound, "type", "COUNTER")
            .attr(&inbound, "min", 0)
            .attr(&inbound, "graph", "no");
        s.attr(&outbound, "label", &label)
            .attr(&outbound, "info", format!("Traffic of {}", display_name(field.raw)))
            .attr(&outbound, "type", "COUNTER")
            .attr(&outbound, "min", 0)
            .attr(&outbound, "negative", &inbound);
    }
    s
}
