//! Agent configuration.

use std::{
    io,
    path::{Path, PathBuf},
};

use fleetwatch_executor::DEFAULT_TIMEOUT_SECS;
use thiserror::Error;

/// Default hub address.
pub const DEFAULT_HUB_ADDR: &str = "localhost:51001";
/// Default identity expected in the hub's certificate.
pub const DEFAULT_SERVER_HOST: &str = "x.test.example.com";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file list {path}: {source}")]
    FileList { path: PathBuf, source: io::Error },
}

/// TLS settings for the hub connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTls {
    /// PEM bundle of trusted roots.
    pub ca_file: PathBuf,
    /// Name the hub's certificate must carry.
    pub server_host: String,
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hub `host:port`.
    pub hub_addr: String,
    pub tls: Option<AgentTls>,
    /// Files to tail.
    pub files: Vec<PathBuf>,
    pub command_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hub_addr: DEFAULT_HUB_ADDR.to_string(),
            tls: None,
            files: Vec::new(),
            command_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Parse a file list: one path per line, blank lines and `#` comments ignored.
#[must_use]
pub fn parse_filelist(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

/// Read and parse a file list.
///
/// # Errors
/// Returns error if the file cannot be read.
pub fn load_filelist(path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileList {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_filelist(&contents))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filelist_skips_comments_and_blanks() {
        let files = parse_filelist("/var/log/syslog\n\n# app logs\n  /srv/app/out.log  \n");
        assert_eq!(
            files,
            vec![
                PathBuf::from("/var/log/syslog"),
                PathBuf::from("/srv/app/out.log")
            ]
        );
    }

    #[test]
    fn test_load_filelist_missing() {
        let err = load_filelist(Path::new("/nonexistent/filelist.txt")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/filelist.txt"));
    }

    #[test]
    fn test_load_filelist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files.txt");
        std::fs::write(&path, "/a.log\n/b.log\n").unwrap();
        assert_eq!(load_filelist(&path).unwrap().len(), 2);
    }
}
