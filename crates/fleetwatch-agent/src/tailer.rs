//! File following.
//!
//! [`LineSource`] is what the uplink consumes; [`FileTailer`] is the polling
//! implementation. It starts at the current end of the file, so only lines
//! appended afterwards are produced, and reopens the path when the file is
//! truncated or replaced (log rotation).

use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncSeekExt, BufReader},
};

/// Default delay between polls at end of file.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A producer of complete lines.
#[async_trait]
pub trait LineSource: Send {
    /// Next line, without its terminator. `Ok(None)` when the source is finished.
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Follows one file by polling.
pub struct FileTailer {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    identity: Option<u64>,
    pending: Vec<u8>,
    poll_interval: Duration,
}

impl FileTailer {
    /// Open `path` positioned at its current end.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await?;
        let position = file.seek(SeekFrom::End(0)).await?;
        let identity = file_identity(&file.metadata().await?);
        Ok(Self {
            path,
            reader: BufReader::new(file),
            position,
            identity,
            pending: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reopen or rewind if the path no longer matches what we are reading.
    async fn check_rotation(&mut self) -> io::Result<()> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            // Removed; keep waiting for it to be recreated.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        if file_identity(&metadata) != self.identity {
            let file = File::open(&self.path).await?;
            self.identity = file_identity(&file.metadata().await?);
            self.reader = BufReader::new(file);
            self.position = 0;
            self.discard_pending("replaced");
        } else if metadata.len() < self.position {
            self.reader.seek(SeekFrom::Start(0)).await?;
            self.position = 0;
            self.discard_pending("truncated");
        }
        Ok(())
    }

    fn discard_pending(&mut self, why: &str) {
        tracing::debug!(path = %self.path.display(), "File {why}, reading from start");
        self.pending.clear();
    }
}

#[async_trait]
impl LineSource for FileTailer {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.pending).await?;
            self.position += read as u64;

            if self.pending.last() == Some(&b'\n') {
                let line = String::from_utf8_lossy(&self.pending);
                let line = line.trim_end_matches('\n').trim_end_matches('\r').to_string();
                self.pending.clear();
                return Ok(Some(line));
            }

            if read == 0 {
                self.check_rotation().await?;
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}

#[cfg(unix)]
fn file_identity(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_identity(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}
