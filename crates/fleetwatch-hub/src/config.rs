//! Hub configuration.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use fleetwatch_logwriter::LogWriterConfig;

/// Default agent stream port.
pub const DEFAULT_STREAM_PORT: u16 = 51001;
/// Default control-plane port.
pub const DEFAULT_CONTROL_PORT: u16 = 8084;

/// PEM material for the stream listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Listen address for both listeners.
    pub bind: IpAddr,
    /// Agent stream and bootstrap listener.
    pub stream_port: u16,
    /// Control-plane listener (always plain HTTP).
    pub control_port: u16,
    /// Serve the stream listener over TLS when set.
    pub tls: Option<TlsFiles>,
    pub log: LogWriterConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            stream_port: DEFAULT_STREAM_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            tls: None,
            log: LogWriterConfig::default(),
        }
    }
}

impl HubConfig {
    #[must_use]
    pub const fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.stream_port)
    }

    #[must_use]
    pub const fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.control_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_addresses() {
        let config = HubConfig::default();
        assert_eq!(config.stream_addr().to_string(), "127.0.0.1:51001");
        assert_eq!(config.control_addr().to_string(), "127.0.0.1:8084");
        assert!(config.tls.is_none());
        assert_eq!(config.log.max_lines, 1000);
    }
}
