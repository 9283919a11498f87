//! fleetwatch agent.
//!
//! Run with: cargo run -p fleetwatch-agent -- --filelist files.txt

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use fleetwatch_agent::{
    AgentConfig, AgentTls, ClientTls, FileTailer, Uplink, WatchedFile, bootstrap, config,
    connect_plain, connect_tls, load_filelist,
};
use fleetwatch_executor::CommandExecutor;
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "fleetwatch-agent", version, about = "Streams local log files to a fleetwatch hub")]
struct Args {
    /// Connect to the hub over TLS
    #[arg(long)]
    tls: bool,

    /// PEM bundle of trusted roots (with --tls)
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Hub address
    #[arg(long, default_value = config::DEFAULT_HUB_ADDR)]
    addr: String,

    /// Name expected in the hub's certificate
    #[arg(long, default_value = config::DEFAULT_SERVER_HOST)]
    server_host_override: String,

    /// File listing the paths to tail, one per line
    #[arg(long)]
    filelist: Option<PathBuf>,

    /// Default command timeout in seconds
    #[arg(long, default_value_t = fleetwatch_executor::DEFAULT_TIMEOUT_SECS)]
    command_timeout: u64,
}

impl Args {
    fn into_config(self) -> anyhow::Result<AgentConfig> {
        let tls = if self.tls {
            let Some(ca_file) = self.ca_file else {
                bail!("--tls requires --ca-file");
            };
            Some(AgentTls {
                ca_file,
                server_host: self.server_host_override,
            })
        } else {
            None
        };

        let files = match &self.filelist {
            Some(path) => load_filelist(path)?,
            None => Vec::new(),
        };

        Ok(AgentConfig {
            hub_addr: self.addr,
            tls,
            files,
            command_timeout_secs: self.command_timeout,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Args::parse().into_config()?;

    tokio::select! {
        result = run(config) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    let tls = config
        .tls
        .as_ref()
        .map(ClientTls::load)
        .transpose()
        .context("failed to load TLS material")?;

    let connection_id = bootstrap(&config.hub_addr, tls.as_ref())
        .await
        .context("session bootstrap failed")?;
    tracing::info!(%connection_id, hub = %config.hub_addr, "Session established");

    let files = open_files(&config.files).await;
    let uplink = Uplink::new(connection_id, CommandExecutor::new(config.command_timeout_secs));

    let result = if let Some(tls) = &tls {
        let (sink, stream) = connect_tls(&config.hub_addr, tls)
            .await
            .context("failed to open stream")?
            .split();
        uplink.run(sink, stream, files).await
    } else {
        let (sink, stream) = connect_plain(&config.hub_addr)
            .await
            .context("failed to open stream")?
            .split();
        uplink.run(sink, stream, files).await
    };
    result.context("uplink terminated")
}

/// Open a tailer per path; a path that cannot be opened is skipped.
async fn open_files(paths: &[PathBuf]) -> Vec<WatchedFile> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        match FileTailer::open(path).await {
            Ok(tailer) => {
                tracing::info!(path = %path.display(), "Tailing");
                files.push(WatchedFile::new(path.display().to_string(), Box::new(tailer)));
            }
            Err(e) => tracing::warn!(path = %path.display(), "Cannot tail file: {e}"),
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Args::parse_from(["fleetwatch-agent"]).into_config().unwrap();
        assert_eq!(config.hub_addr, "localhost:51001");
        assert_eq!(config.command_timeout_secs, 10);
        assert!(config.tls.is_none());
        assert!(config.files.is_empty());
    }

    #[test]
    fn test_tls_requires_ca() {
        let err = Args::parse_from(["fleetwatch-agent", "--tls"]).into_config().unwrap_err();
        assert!(err.to_string().contains("--ca-file"));

        let config = Args::parse_from(["fleetwatch-agent", "--tls", "--ca-file", "ca.pem"])
            .into_config()
            .unwrap();
        assert_eq!(config.tls.unwrap().server_host, "x.test.example.com");
    }
}
