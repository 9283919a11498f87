//! Dialing the hub: session bootstrap over HTTP(S), then the WebSocket stream.
//!
//! With TLS, both the bootstrap request and the stream verify the hub's
//! certificate against the configured roots and expected server name,
//! independent of the address actually dialed.

use std::{
    fs,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use fleetwatch_core::{ConnectionId, UuidResponse};
use rustls::{ClientConfig, RootCertStore, crypto::ring, pki_types::ServerName};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, client::TlsStream};
use tokio_tungstenite::{WebSocketStream, client_async, tungstenite};

use crate::config::AgentTls;

/// Connection error.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Failed to read CA file {path}: {source}")]
    ReadCa { path: PathBuf, source: io::Error },
    #[error("No certificates found in {0}")]
    NoCertificates(PathBuf),
    #[error("Invalid server name: {0}")]
    ServerName(String),
    #[error("Invalid hub address: {0}")]
    Address(String),
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("Session bootstrap failed: {0}")]
    Bootstrap(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
}

/// Loaded client TLS material.
#[derive(Clone)]
pub struct ClientTls {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
    server_host: String,
    ca_pem: Vec<u8>,
}

impl ClientTls {
    /// Load trusted roots from a PEM bundle.
    ///
    /// # Errors
    /// Returns error if the bundle is unreadable or empty, or the server
    /// name is not a valid DNS name or IP address.
    pub fn load(tls: &AgentTls) -> Result<Self, ConnectError> {
        let ca_pem = fs::read(&tls.ca_file).map_err(|source| ConnectError::ReadCa {
            path: tls.ca_file.clone(),
            source,
        })?;
        let roots = root_store(&ca_pem, &tls.ca_file)?;

        let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
        let server_name = ServerName::try_from(tls.server_host.clone())
            .map_err(|e| ConnectError::ServerName(format!("{}: {e}", tls.server_host)))?;

        Ok(Self {
            config: Arc::new(config),
            server_name,
            server_host: tls.server_host.clone(),
            ca_pem,
        })
    }
}

fn root_store(pem: &[u8], path: &Path) -> Result<RootCertStore, ConnectError> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &pem[..]) {
        let cert = cert.map_err(|source| ConnectError::ReadCa {
            path: path.to_path_buf(),
            source,
        })?;
        roots.add(cert)?;
    }
    if roots.is_empty() {
        return Err(ConnectError::NoCertificates(path.to_path_buf()));
    }
    Ok(roots)
}

async fn resolve(hub_addr: &str) -> Result<SocketAddr, ConnectError> {
    tokio::net::lookup_host(hub_addr)
        .await?
        .next()
        .ok_or_else(|| ConnectError::Address(hub_addr.to_string()))
}

/// Ask the hub for a connection id (`POST /uuid`).
///
/// # Errors
/// Returns error if the hub cannot be reached or answers with a non-success
/// status or an unexpected body.
pub async fn bootstrap(hub_addr: &str, tls: Option<&ClientTls>) -> Result<ConnectionId, ConnectError> {
    let builder = reqwest::Client::builder();
    let (client, url) = match tls {
        Some(tls) => {
            let addr = resolve(hub_addr).await?;
            let mut builder = builder
                .use_rustls_tls()
                .tls_built_in_root_certs(false)
                .resolve(&tls.server_host, addr);
            for cert in reqwest::Certificate::from_pem_bundle(&tls.ca_pem)? {
                builder = builder.add_root_certificate(cert);
            }
            let url = format!("https://{}:{}/uuid", tls.server_host, addr.port());
            (builder.build()?, url)
        }
        None => (builder.build()?, format!("http://{hub_addr}/uuid")),
    };

    let reply: UuidResponse = client
        .post(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(reply.connection_id())
}

/// Open the stream over plain TCP.
///
/// # Errors
/// Returns error if the connection or the WebSocket handshake fails.
pub async fn connect_plain(hub_addr: &str) -> Result<WebSocketStream<TcpStream>, ConnectError> {
    let tcp = TcpStream::connect(hub_addr).await?;
    let (ws, _) = client_async(format!("ws://{hub_addr}/stream"), tcp).await?;
    Ok(ws)
}

/// Open the stream over TLS, verifying the hub as `tls.server_name`.
///
/// # Errors
/// Returns error if the connection, TLS handshake or WebSocket handshake fails.
pub async fn connect_tls(
    hub_addr: &str,
    tls: &ClientTls,
) -> Result<WebSocketStream<TlsStream<TcpStream>>, ConnectError> {
    let addr = resolve(hub_addr).await?;
    let tcp = TcpStream::connect(addr).await?;
    let stream = TlsConnector::from(Arc::clone(&tls.config))
        .connect(tls.server_name.clone(), tcp)
        .await?;
    let url = format!("wss://{}:{}/stream", tls.server_host, addr.port());
    let (ws, _) = client_async(url, stream).await?;
    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ca_file() {
        let tls = AgentTls {
            ca_file: PathBuf::from("/nonexistent/ca.pem"),
            server_host: "hub.example.com".to_string(),
        };
        assert!(matches!(ClientTls::load(&tls), Err(ConnectError::ReadCa { .. })));
    }

    #[test]
    fn test_bundle_without_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.pem");
        std::fs::write(&path, "nothing to see here\n").unwrap();
        let tls = AgentTls {
            ca_file: path,
            server_host: "hub.example.com".to_string(),
        };
        assert!(matches!(
            ClientTls::load(&tls),
            Err(ConnectError::NoCertificates(_))
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_address() {
        let err = resolve("no-port-given").await.unwrap_err();
        assert!(matches!(err, ConnectError::Io(_) | ConnectError::Address(_)));
    }
}
