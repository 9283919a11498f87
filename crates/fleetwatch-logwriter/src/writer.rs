//! Rotating log writer.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Serialize;
use thiserror::Error;
use tokio::{
    fs::File,
    io::AsyncWriteExt,
    sync::Mutex,
    task::JoinHandle,
    time::Instant,
};

use crate::{ARCHIVE_DIR_NAME, archive};

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct LogWriterConfig {
    /// Directory holding the active file; archives go to `<log_dir>/archive`.
    pub log_dir: PathBuf,
    /// Active files are named `<prefix>_<timestamp>.log`.
    pub filename_prefix: String,
    /// Rotate once this many lines have been written to the active file.
    pub max_lines: usize,
    /// Rotate when this much time has passed since the last rotation.
    pub rotation_interval: Duration,
}

impl Default for LogWriterConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            filename_prefix: "fleetwatch".to_string(),
            max_lines: 1000,
            rotation_interval: Duration::from_secs(600),
        }
    }
}

/// Log writer error.
#[derive(Debug, Error)]
pub enum LogWriterError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("Failed to create log file in {dir}: {source}")]
    CreateFile { dir: PathBuf, source: io::Error },
    #[error("Failed to write log record: {0}")]
    Write(io::Error),
    #[error("Failed to archive {path}: {source}")]
    Compress { path: PathBuf, source: io::Error },
    #[error("Failed to remove rotated file {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

struct State {
    file: File,
    path: PathBuf,
    line_count: usize,
    deadline: Instant,
}

struct Inner {
    config: LogWriterConfig,
    archive_dir: PathBuf,
    /// Append and rotation both run under this lock.
    state: Mutex<State>,
}

/// Append-only JSON-lines writer with count and time triggered rotation.
///
/// Owns a background task that performs the time-triggered rotations; the
/// task stops on [`shutdown`](Self::shutdown) or when the writer is dropped.
pub struct RotatingLogWriter {
    inner: Arc<Inner>,
    timer: JoinHandle<()>,
}

impl RotatingLogWriter {
    /// Create the log directory, open the first file and start the rotation timer.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the directory or
    /// first file cannot be created.
    pub async fn open(config: LogWriterConfig) -> Result<Self, LogWriterError> {
        if config.max_lines == 0 {
            return Err(LogWriterError::InvalidConfig(
                "max_lines must be at least 1".to_string(),
            ));
        }
        if config.rotation_interval.is_zero() {
            return Err(LogWriterError::InvalidConfig(
                "rotation_interval must be non-zero".to_string(),
            ));
        }
        let Some(deadline) = Instant::now().checked_add(config.rotation_interval) else {
            return Err(LogWriterError::InvalidConfig(format!(
                "rotation_interval of {}s is out of range",
                config.rotation_interval.as_secs()
            )));
        };

        let archive_dir = config.log_dir.join(ARCHIVE_DIR_NAME);
        let (file, path) = open_active(&config).await?;
        tracing::info!(path = %path.display(), "Opened log file");

        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                file,
                path,
                line_count: 0,
                deadline,
            }),
            archive_dir,
            config,
        });

        let timer = tokio::spawn(run_timer(Arc::clone(&inner)));

        Ok(Self { inner, timer })
    }

    /// Serialize `record` as one JSON line and append it.
    ///
    /// When the append brings the active file to `max_lines`, the file is
    /// rotated before this returns and the time trigger restarts.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails, or if the
    /// count-triggered rotation fails. In the latter case the record is
    /// already durable in the still-open active file.
    pub async fn append<T: Serialize + ?Sized>(&self, record: &T) -> Result<(), LogWriterError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut state = self.inner.state.lock().await;
        state.file.write_all(&line).await.map_err(LogWriterError::Write)?;
        state.file.flush().await.map_err(LogWriterError::Write)?;
        state.line_count += 1;

        if state.line_count >= self.inner.config.max_lines {
            self.inner.rotate_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Rotate now, regardless of count or deadline.
    ///
    /// # Errors
    /// Returns error if archival or opening the next file fails.
    pub async fn rotate(&self) -> Result<(), LogWriterError> {
        let mut state = self.inner.state.lock().await;
        self.inner.rotate_locked(&mut state).await
    }

    /// Path of the file currently receiving appends.
    pub async fn current_path(&self) -> PathBuf {
        self.inner.state.lock().await.path.clone()
    }

    /// Lines written to the active file since it was opened.
    pub async fn line_count(&self) -> usize {
        self.inner.state.lock().await.line_count
    }

    /// Directory receiving compressed archives.
    #[must_use]
    pub fn archive_dir(&self) -> &Path {
        &self.inner.archive_dir
    }

    /// Stop the rotation timer and flush the active file.
    ///
    /// The active file is left in place, unarchived.
    pub async fn shutdown(&self) {
        self.timer.abort();
        let mut state = self.inner.state.lock().await;
        if let Err(e) = state.file.sync_all().await {
            tracing::warn!(error = %e, "Failed to sync log file on shutdown");
        }
    }
}

impl Drop for RotatingLogWriter {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

impl Inner {
    /// Archive the active file and switch to a new one.
    ///
    /// Order matters: open the replacement, compress, swap, then delete the
    /// old file. Any failure before the swap leaves the old file open and
    /// receiving appends, and no archive or replacement file behind.
    async fn rotate_locked(&self, state: &mut State) -> Result<(), LogWriterError> {
        state.file.sync_all().await.map_err(LogWriterError::Write)?;

        let (file, path) = open_active(&self.config).await?;

        let src = state.path.clone();
        let archive_dir = self.archive_dir.clone();
        let compressed = tokio::task::spawn_blocking(move || archive::compress_into(&src, &archive_dir))
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)));
        let archived = match compressed {
            Ok(archived) => archived,
            Err(source) => {
                drop(file);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove unused log file");
                }
                return Err(LogWriterError::Compress {
                    path: state.path.clone(),
                    source,
                });
            }
        };

        let old_file = std::mem::replace(&mut state.file, file);
        let old_path = std::mem::replace(&mut state.path, path);
        state.line_count = 0;
        state.deadline = next_deadline(self.config.rotation_interval);
        drop(old_file);

        tracing::info!(
            archived = %archived.display(),
            current = %state.path.display(),
            "Rotated log file"
        );

        tokio::fs::remove_file(&old_path)
            .await
            .map_err(|source| LogWriterError::Remove {
                path: old_path,
                source,
            })
    }
}

/// `interval` from now, saturating at the far end of the clock.
fn next_deadline(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

async fn open_active(config: &LogWriterConfig) -> Result<(File, PathBuf), LogWriterError> {
    tokio::fs::create_dir_all(&config.log_dir)
        .await
        .map_err(|source| LogWriterError::CreateDir {
            path: config.log_dir.clone(),
            source,
        })?;

    let dir = config.log_dir.clone();
    let prefix = config.filename_prefix.clone();
    let (file, path) = tokio::task::spawn_blocking(move || archive::create_active_file(&dir, &prefix))
        .await
        .map_err(|e| LogWriterError::CreateFile {
            dir: config.log_dir.clone(),
            source: io::Error::other(e),
        })?
        .map_err(|source| LogWriterError::CreateFile {
            dir: config.log_dir.clone(),
            source,
        })?;

    Ok((File::from_std(file), path))
}

/// Time trigger: sleep until the shared deadline, then rotate under the lock.
///
/// A count-triggered rotation pushes the deadline forward, so waking early
/// just means going back to sleep.
async fn run_timer(inner: Arc<Inner>) {
    loop {
        let deadline = inner.state.lock().await.deadline;
        tokio::time::sleep_until(deadline).await;

        let mut state = inner.state.lock().await;
        let now = Instant::now();
        if now < state.deadline {
            continue;
        }
        if state.line_count == 0 {
            state.deadline = next_deadline(inner.config.rotation_interval);
            continue;
        }
        if let Err(e) = inner.rotate_locked(&mut state).await {
            tracing::error!(error = %e, "Time-triggered rotation failed");
            state.deadline = next_deadline(inner.config.rotation_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Read};

    use flate2::read::GzDecoder;
    use serde_json::json;

    use super::*;

    fn config(dir: &Path, max_lines: usize, rotation_interval: Duration) -> LogWriterConfig {
        LogWriterConfig {
            log_dir: dir.to_path_buf(),
            filename_prefix: "test_log".to_string(),
            max_lines,
            rotation_interval,
        }
    }

    fn archives(writer: &RotatingLogWriter) -> Vec<PathBuf> {
        match fs::read_dir(writer.archive_dir()) {
            Ok(entries) => {
                let mut paths: Vec<PathBuf> =
                    entries.filter_map(Result::ok).map(|e| e.path()).collect();
                paths.sort();
                paths
            }
            Err(_) => Vec::new(),
        }
    }

    fn active_logs(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
            .count()
    }

    fn gunzip(path: &Path) -> String {
        let mut out = String::new();
        GzDecoder::new(fs::File::open(path).unwrap())
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_below_threshold_single_file_no_archive() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingLogWriter::open(config(dir.path(), 10, Duration::from_secs(3600)))
            .await
            .unwrap();

        for i in 0..9 {
            writer.append(&json!({ "message": format!("entry {i}") })).await.unwrap();
        }

        assert!(archives(&writer).is_empty());
        let contents = fs::read_to_string(writer.current_path().await).unwrap();
        assert_eq!(contents.lines().count(), 9);
        assert_eq!(writer.line_count().await, 9);
    }

    #[tokio::test]
    async fn test_size_rotation_completes_before_append_returns() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingLogWriter::open(config(dir.path(), 3, Duration::from_secs(3600)))
            .await
            .unwrap();
        let first = writer.current_path().await;

        writer.append("one").await.unwrap();
        writer.append("two").await.unwrap();
        assert!(archives(&writer).is_empty());

        writer.append("three").await.unwrap();
        let archived = archives(&writer);
        assert_eq!(archived.len(), 1);
        assert!(!first.exists());
        assert_ne!(writer.current_path().await, first);
        assert_eq!(writer.line_count().await, 0);
    }

    #[tokio::test]
    async fn test_five_appends_with_max_two() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingLogWriter::open(config(dir.path(), 2, Duration::from_secs(3600)))
            .await
            .unwrap();

        for i in 0..5 {
            writer.append(&json!({ "message": format!("log entry {i}") })).await.unwrap();
        }

        assert_eq!(archives(&writer).len(), 2);
        let contents = fs::read_to_string(writer.current_path().await).unwrap();
        assert_eq!(contents, "{\"message\":\"log entry 4\"}\n");

        assert_eq!(active_logs(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_archive_matches_rotated_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingLogWriter::open(config(dir.path(), 2, Duration::from_secs(3600)))
            .await
            .unwrap();

        writer.append(&json!({ "message": "log entry 0" })).await.unwrap();
        writer.append(&json!({ "message": "log entry 1" })).await.unwrap();

        let archived = archives(&writer);
        assert_eq!(archived.len(), 1);
        assert!(
            archived[0]
                .file_name()
                .unwrap()
                .to_string_lossy()
                .ends_with(".log.gz")
        );
        assert_eq!(
            gunzip(&archived[0]),
            "{\"message\":\"log entry 0\"}\n{\"message\":\"log entry 1\"}\n"
        );
    }

    #[tokio::test]
    async fn test_time_based_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingLogWriter::open(config(dir.path(), 100, Duration::from_millis(400)))
            .await
            .unwrap();

        writer.append(&json!({ "message": "log entry 1" })).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        writer.append(&json!({ "message": "log entry 2" })).await.unwrap();

        assert_eq!(archives(&writer).len(), 1);
        let contents = fs::read_to_string(writer.current_path().await).unwrap();
        assert_eq!(contents, "{\"message\":\"log entry 2\"}\n");
    }

    #[tokio::test]
    async fn test_idle_timer_does_not_archive_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingLogWriter::open(config(dir.path(), 100, Duration::from_millis(100)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert!(archives(&writer).is_empty());
    }

    #[tokio::test]
    async fn test_failed_compression_keeps_active_file() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the archive directory should go.
        fs::write(dir.path().join(ARCHIVE_DIR_NAME), b"").unwrap();

        let writer = RotatingLogWriter::open(config(dir.path(), 2, Duration::from_secs(3600)))
            .await
            .unwrap();
        let path = writer.current_path().await;

        writer.append("first").await.unwrap();
        let err = writer.append("second").await.unwrap_err();
        assert!(matches!(err, LogWriterError::Compress { .. }));

        assert_eq!(writer.current_path().await, path);
        assert_eq!(fs::read_to_string(&path).unwrap(), "\"first\"\n\"second\"\n");

        // Still accepting appends; each retries the rotation.
        assert!(writer.append("third").await.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);
        assert_eq!(active_logs(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_failed_open_leaves_no_archive() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let mut cfg = config(dir.path(), 2, Duration::from_secs(3600));
        cfg.filename_prefix = "sub/test_log".to_string();

        let writer = RotatingLogWriter::open(cfg).await.unwrap();
        writer.append("first").await.unwrap();
        fs::remove_dir_all(&sub).unwrap();

        let err = writer.append("second").await.unwrap_err();
        assert!(matches!(err, LogWriterError::CreateFile { .. }));
        assert!(archives(&writer).is_empty());
    }

    #[tokio::test]
    async fn test_failed_time_rotation_keeps_lines_and_timer_survives() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join(ARCHIVE_DIR_NAME);
        fs::write(&blocker, b"").unwrap();

        let writer = RotatingLogWriter::open(config(dir.path(), 100, Duration::from_millis(300)))
            .await
            .unwrap();
        let path = writer.current_path().await;

        writer.append("first").await.unwrap();
        writer.append("second").await.unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert_eq!(writer.current_path().await, path);
        assert_eq!(fs::read_to_string(&path).unwrap(), "\"first\"\n\"second\"\n");
        assert_eq!(writer.line_count().await, 2);
        assert_eq!(active_logs(dir.path()), 1);

        fs::remove_file(&blocker).unwrap();
        writer.append("third").await.unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;

        let archived = archives(&writer);
        assert_eq!(archived.len(), 1);
        assert_eq!(gunzip(&archived[0]), "\"first\"\n\"second\"\n\"third\"\n");
        assert_ne!(writer.current_path().await, path);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(
            RotatingLogWriter::open(config(dir.path(), 25, Duration::from_secs(3600)))
                .await
                .unwrap(),
        );

        let mut tasks = Vec::new();
        for task in 0..8 {
            let writer = Arc::clone(&writer);
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    writer
                        .append(&json!({ "task": task, "seq": i, "pad": "x".repeat(64) }))
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut all = String::new();
        for archive in archives(&writer) {
            all.push_str(&gunzip(&archive));
        }
        all.push_str(&fs::read_to_string(writer.current_path().await).unwrap());

        let lines: Vec<&str> = all.lines().collect();
        assert_eq!(lines.len(), 400);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value.get("seq").is_some());
        }
        assert_eq!(archives(&writer).len(), 16);
    }

    #[tokio::test]
    async fn test_zero_max_lines_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = RotatingLogWriter::open(config(dir.path(), 0, Duration::from_secs(1))).await;
        assert!(matches!(result, Err(LogWriterError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_out_of_range_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            RotatingLogWriter::open(config(dir.path(), 10, Duration::from_secs(u64::MAX))).await;
        assert!(matches!(result, Err(LogWriterError::InvalidConfig(_))));
    }
}
