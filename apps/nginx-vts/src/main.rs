use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use tracing::warn;
use vts_core::{Plugin, PluginConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Report whether VTS statistics are available
    Autoconf,
    /// Print graph configuration
    Config,
    /// Print current values (same as no argument)
    Fetch,
}

/// Settings come from the Munin environment (`url`, `timeout`,
/// `MUNIN_PLUGSTATE`, `MUNIN_CAP_DIRTYCONFIG`); flags override them.
#[derive(Debug, Parser)]
#[command(
    name = "nginx-vts",
    version,
    about = "Munin multigraph plugin for the NGINX virtual-traffic-status module"
)]
struct Args {
    /// Munin invocation mode
    #[arg(value_enum)]
    mode: Option<Mode>,
    /// VTS JSON endpoint
    #[arg(long)]
    url: Option<String>,
    /// Fetch timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Directory for the carry-over snapshot
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self, mut config: PluginConfig) -> PluginConfig {
        if let Some(url) = self.url {
            config.url = url;
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(dir) = self.state_dir {
            config.state_dir = Some(dir);
        }
        config
    }
}

fn main() -> Result<()> {
    let _log_guard = vts_log::init();
    let args = Args::parse();
    let mode = args.mode.unwrap_or(Mode::Fetch);
    let plugin = Plugin::new(args.into_config(PluginConfig::from_env()))
        .context("building http client")?;

    let poll = plugin.collect(Utc::now().timestamp());
    let out = match mode {
        Mode::Autoconf => {
            // autoconf always answers; a broken state dir only costs carry-over
            if let Err(err) = plugin.persist(&poll) {
                warn!(%err, "failed to save vts snapshot");
            }
            format!("{}\n", plugin.autoconf(&poll))
        }
        Mode::Config | Mode::Fetch => {
            plugin.persist(&poll).context("updating vts snapshot")?;
            if mode == Mode::Config {
                plugin.render_config(&poll)
            } else {
                plugin.render_values(&poll)
            }
        }
    };
    tracing::debug!(?mode, bytes = out.len(), "writing plugin output");

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(out.as_bytes())
        .and_then(|_| stdout.flush())
        .context("writing plugin output")?;
    Ok(())
}
