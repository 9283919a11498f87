//! fleetwatch hub.
//!
//! Run with: cargo run -p fleetwatch-hub -- --log-dir ./logs

use std::{future::Future, net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use clap::Parser;
use fleetwatch_core::ConnectionRegistry;
use fleetwatch_hub::{
    AppState, HubConfig, TlsFiles, TlsListener, config, control_router, load_server_config,
    stream_router,
};
use fleetwatch_logwriter::{LogWriterConfig, RotatingLogWriter};
use tokio::{net::TcpListener, sync::watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "fleetwatch-hub", version, about = "Collects agent log streams and dispatches commands")]
struct Args {
    /// Serve the agent stream over TLS
    #[arg(long)]
    tls: bool,

    /// PEM certificate chain (with --tls)
    #[arg(long)]
    cert_file: Option<PathBuf>,

    /// PEM private key (with --tls)
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Agent stream port
    #[arg(long, default_value_t = config::DEFAULT_STREAM_PORT)]
    port: u16,

    /// Control-plane port
    #[arg(long, default_value_t = config::DEFAULT_CONTROL_PORT)]
    http_port: u16,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    #[arg(long, default_value = "fleetwatch")]
    log_filename_prefix: String,

    #[arg(long, default_value = "./logs")]
    log_dir: PathBuf,

    /// Lines per file before rotation
    #[arg(long, default_value_t = 1000)]
    log_max_lines: usize,

    /// Seconds between time-triggered rotations
    #[arg(long, default_value_t = 600)]
    log_rotation_time: u64,
}

impl Args {
    fn into_config(self) -> anyhow::Result<HubConfig> {
        let tls = if self.tls {
            let (Some(cert_file), Some(key_file)) = (self.cert_file, self.key_file) else {
                bail!("--tls requires --cert-file and --key-file");
            };
            Some(TlsFiles {
                cert_file,
                key_file,
            })
        } else {
            None
        };

        Ok(HubConfig {
            bind: self.bind,
            stream_port: self.port,
            control_port: self.http_port,
            tls,
            log: LogWriterConfig {
                log_dir: self.log_dir,
                filename_prefix: self.log_filename_prefix,
                max_lines: self.log_max_lines,
                rotation_interval: Duration::from_secs(self.log_rotation_time),
            },
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
    run(config).await
}

async fn run(config: HubConfig) -> anyhow::Result<()> {
    let writer = Arc::new(
        RotatingLogWriter::open(config.log.clone())
            .await
            .context("failed to open log writer")?,
    );
    let registry = Arc::new(ConnectionRegistry::new());
    let state = AppState::new(Arc::clone(&registry), Arc::clone(&writer));

    let stream_tcp = TcpListener::bind(config.stream_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.stream_addr()))?;
    let control_tcp = TcpListener::bind(config.control_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.control_addr()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let stream_app = stream_router(state);
    let stream_shutdown = wait_for(shutdown_rx.clone());
    let stream_server = async {
        if let Some(files) = &config.tls {
            let tls = load_server_config(files).context("failed to load TLS material")?;
            tracing::info!("Agent stream listening on wss://{}", config.stream_addr());
            axum::serve(TlsListener::new(stream_tcp, tls), stream_app)
                .with_graceful_shutdown(stream_shutdown)
                .await
                .context("stream server failed")
        } else {
            tracing::info!("Agent stream listening on ws://{}", config.stream_addr());
            axum::serve(stream_tcp, stream_app)
                .with_graceful_shutdown(stream_shutdown)
                .await
                .context("stream server failed")
        }
    };

    tracing::info!("Control plane listening on http://{}", config.control_addr());
    let control_server = axum::serve(control_tcp, control_router(registry))
        .with_graceful_shutdown(wait_for(shutdown_rx));

    let signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            return;
        }
        tracing::info!("Shutting down");
        let _ = shutdown_tx.send(true);
    };
    tokio::spawn(signal);

    let result = tokio::try_join!(stream_server, async {
        control_server.await.context("control server failed")
    });

    writer.shutdown().await;
    result.map(|_| ())
}

fn wait_for(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Args::parse_from(["fleetwatch-hub"]).into_config().unwrap();
        assert_eq!(config.stream_port, 51001);
        assert_eq!(config.control_port, 8084);
        assert_eq!(config.log.filename_prefix, "fleetwatch");
        assert_eq!(config.log.rotation_interval, Duration::from_secs(600));
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_tls_requires_material() {
        let err = Args::parse_from(["fleetwatch-hub", "--tls"]).into_config().unwrap_err();
        assert!(err.to_string().contains("--cert-file"));

        let config = Args::parse_from([
            "fleetwatch-hub",
            "--tls",
            "--cert-file",
            "cert.pem",
            "--key-file",
            "key.pem",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.tls.unwrap().key_file, PathBuf::from("key.pem"));
    }
}
