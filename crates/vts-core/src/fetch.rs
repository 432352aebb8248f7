use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use tracing::{debug, warn};

use crate::model::{LiveStats, VtsPayload};
use crate::{Result, VtsError};

/// Retrieves the VTS JSON document and reshapes it into entity groups.
pub struct StatsFetcher {
    client: Client,
    url: String,
}

impl StatsFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nginx-vts-munin/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Perform one GET and decode the payload.
    pub fn fetch(&self) -> Result<LiveStats> {
        let resp = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(VtsError::Status {
                url: self.url.clone(),
                status,
            });
        }
        let body = resp.bytes()?;
        let payload: VtsPayload = serde_json::from_slice(&body)?;
        let live = payload.into_live();
        debug!(
            url = %self.url,
            vhost = live.groups.vhost.len(),
            filter = live.groups.filter.len(),
            upstream = live.groups.upstream.len(),
            "fetched vts statistics"
        );
        Ok(live)
    }

    /// Like [`fetch`](Self::fetch), but an unreachable server or a malformed
    /// body yields empty groups.
    pub fn fetch_or_empty(&self) -> LiveStats {
        match self.fetch() {
            Ok(live) => live,
            Err(err) => {
                warn!(url = %self.url, %err, "vts statistics unavailable");
                LiveStats::default()
            }
        }
    }
}
