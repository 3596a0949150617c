//! Follows a growing log file and hands denial lines to a handler.
//!
//! The follower starts at the current end of the file, so nothing written
//! before the watch began is ever delivered. Reads and handler calls happen
//! on one task: a slow handler holds back the lines behind it.

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_stream::try_stream;
use futures::{pin_mut, Stream, StreamExt};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use dw_protocol::{DenialEvent, LogLine};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const READ_CHUNK: usize = 8 * 1024;

/// How long a missing path may stay missing while rotation is followed.
/// Rename-then-create rotation leaves a short gap with no file.
const MISSING_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum WatchError {
    /// The file could not be opened when the watch started.
    #[error("cannot watch {}: {source}", path.display())]
    Startup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The followed file went away or stopped being readable.
    #[error("lost {}: {reason}", path.display())]
    StreamFailure { path: PathBuf, reason: String },
    /// The handler returned an error; passed through untouched.
    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn StdError + Send + Sync>),
}

/// Watch `path` with default settings, calling `on_event` for every line
/// containing `marker`.
pub async fn watch<F, Fut, E>(
    path: impl Into<PathBuf>,
    marker: impl Into<String>,
    on_event: F,
) -> Result<(), WatchError>
where
    F: FnMut(DenialEvent) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    Watcher::new(path, marker).run(on_event).await
}

/// Configured denial watcher.
#[derive(Debug, Clone)]
pub struct Watcher {
    path: PathBuf,
    marker: String,
    poll_interval: Duration,
    follow_rotation: bool,
}

impl Watcher {
    pub fn new(path: impl Into<PathBuf>, marker: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            marker: marker.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            follow_rotation: true,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// When disabled, a file replaced under the same path ends the watch.
    pub fn with_follow_rotation(mut self, follow: bool) -> Self {
        self.follow_rotation = follow;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Open the file and position at its end.
    pub async fn open(&self) -> Result<Tail, WatchError> {
        Tail::open(&self.path, self.poll_interval, self.follow_rotation).await
    }

    /// Open the file and process lines until the stream or the handler fails.
    pub async fn run<F, Fut, E>(&self, on_event: F) -> Result<(), WatchError>
    where
        F: FnMut(DenialEvent) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let tail = self.open().await?;
        self.run_on(tail, on_event).await
    }

    /// Process lines from an already opened [`Tail`].
    pub async fn run_on<F, Fut, E>(&self, tail: Tail, mut on_event: F) -> Result<(), WatchError>
    where
        F: FnMut(DenialEvent) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        info!(path = %self.path.display(), marker = %self.marker, "watching for denials");

        let lines = tail.into_stream();
        pin_mut!(lines);

        let mut sequence = 0u64;
        while let Some(line) = lines.next().await {
            let line = line?;
            let Some(event) = DenialEvent::from_line(line, &self.marker, sequence + 1) else {
                continue;
            };
            sequence = event.sequence;
            debug!(sequence, "denial matched");
            on_event(event)
                .await
                .map_err(|e| WatchError::Handler(e.into()))?;
        }

        Ok(())
    }
}

/// Move every complete line in `chunk` to `ready`, keeping any unterminated
/// remainder in `pending`.
fn split_lines(chunk: &[u8], pending: &mut Vec<u8>, ready: &mut VecDeque<LogLine>) {
    let mut rest = chunk;
    while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
        pending.extend_from_slice(&rest[..=pos]);
        ready.push_back(LogLine::from_bytes(pending));
        pending.clear();
        rest = &rest[pos + 1..];
    }
    pending.extend_from_slice(rest);
}

/// Identity of the file behind a path, used to notice rename rotation.
#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}

/// What the end-of-file check found.
enum PathState {
    Unchanged,
    Moved,
}

/// An open, positioned follower over one path.
pub struct Tail {
    path: PathBuf,
    file: File,
    offset: u64,
    identity: Option<(u64, u64)>,
    buf: Vec<u8>,
    pending: Vec<u8>,
    ready: VecDeque<LogLine>,
    missing_since: Option<Instant>,
    poll_interval: Duration,
    follow_rotation: bool,
}

impl Tail {
    pub async fn open(
        path: &Path,
        poll_interval: Duration,
        follow_rotation: bool,
    ) -> Result<Self, WatchError> {
        let startup = |source: io::Error| WatchError::Startup {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).await.map_err(startup)?;
        let meta = file.metadata().await.map_err(startup)?;
        if meta.is_dir() {
            return Err(startup(io::Error::new(
                io::ErrorKind::InvalidInput,
                "is a directory",
            )));
        }
        let offset = file.seek(SeekFrom::End(0)).await.map_err(startup)?;

        debug!(path = %path.display(), offset, "opened at end of file");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            offset,
            identity: file_id(&meta),
            buf: vec![0u8; READ_CHUNK],
            pending: Vec::new(),
            ready: VecDeque::new(),
            missing_since: None,
            poll_interval,
            follow_rotation,
        })
    }

    /// Byte offset of the next read in the current file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Wait for the next complete line.
    pub async fn next_line(&mut self) -> Result<LogLine, WatchError> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(line);
            }

            let n = self
                .file
                .read(&mut self.buf)
                .await
                .map_err(|e| self.failure(e.to_string()))?;
            if n > 0 {
                self.offset += n as u64;
                split_lines(&self.buf[..n], &mut self.pending, &mut self.ready);
                continue;
            }

            match self.check_path().await? {
                PathState::Moved => continue,
                PathState::Unchanged => sleep(self.poll_interval).await,
            }
        }
    }

    /// Lazy, unbounded stream of lines. Ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<LogLine, WatchError>> {
        let mut tail = self;
        try_stream! {
            loop {
                let line = tail.next_line().await?;
                yield line;
            }
        }
    }

    /// Called at end of file: detect removal, truncation and replacement.
    async fn check_path(&mut self) -> Result<PathState, WatchError> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let since = *self.missing_since.get_or_insert_with(Instant::now);
                if !self.follow_rotation || since.elapsed() >= MISSING_GRACE {
                    return Err(self.failure("file was removed".to_string()));
                }
                return Ok(PathState::Unchanged);
            }
            Err(e) => return Err(self.failure(e.to_string())),
        };

        self.missing_since = None;

        let identity = file_id(&meta);
        if identity != self.identity {
            if !self.follow_rotation {
                return Err(self.failure("file was replaced".to_string()));
            }
            info!(path = %self.path.display(), "file replaced, reopening from start");
            self.reopen(identity).await?;
            return Ok(PathState::Moved);
        }

        if meta.len() < self.offset {
            warn!(
                path = %self.path.display(),
                previous = self.offset,
                current = meta.len(),
                "file truncated, reading from start"
            );
            self.file
                .seek(SeekFrom::Start(0))
                .await
                .map_err(|e| self.failure(e.to_string()))?;
            self.offset = 0;
            self.pending.clear();
            return Ok(PathState::Moved);
        }

        Ok(PathState::Unchanged)
    }

    async fn reopen(&mut self, identity: Option<(u64, u64)>) -> Result<(), WatchError> {
        // Lines written to the old file before the rename still count.
        loop {
            let n = self
                .file
                .read(&mut self.buf)
                .await
                .map_err(|e| self.failure(e.to_string()))?;
            if n == 0 {
                break;
            }
            self.offset += n as u64;
            split_lines(&self.buf[..n], &mut self.pending, &mut self.ready);
        }
        debug!(path = %self.path.display(), offset = self.offset, "drained replaced file");

        // An unterminated tail of the old file is still a line.
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.ready.push_back(LogLine::from_bytes(&tail));
        }

        self.file = File::open(&self.path)
            .await
            .map_err(|e| self.failure(e.to_string()))?;
        self.offset = 0;
        self.identity = identity;
        Ok(())
    }

    fn failure(&self, reason: String) -> WatchError {
        WatchError::StreamFailure {
            path: self.path.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    async fn open_fast(path: &Path) -> Tail {
        Tail::open(path, Duration::from_millis(10), true).await.unwrap()
    }

    async fn next(tail: &mut Tail) -> LogLine {
        tokio::time::timeout(Duration::from_secs(5), tail.next_line())
            .await
            .expect("timed out waiting for line")
            .unwrap()
    }

    #[tokio::test]
    async fn missing_file_is_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Watcher::new(dir.path().join("nope.log"), "x")
            .open()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WatchError::Startup { .. }));
    }

    #[tokio::test]
    async fn directory_is_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Watcher::new(dir.path(), "x").open().await.err().unwrap();
        assert!(matches!(err, WatchError::Startup { .. }));
    }

    #[tokio::test]
    async fn opens_at_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "old line\n").unwrap();

        let mut tail = open_fast(&path).await;
        assert_eq!(tail.offset(), 9);

        append(&path, "new line\n");
        assert_eq!(next(&mut tail).await.as_str(), "new line");
    }

    #[tokio::test]
    async fn partial_line_waits_for_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "").unwrap();

        let mut tail = open_fast(&path).await;
        append(&path, "avc:  den");
        let pending = tokio::time::timeout(Duration::from_millis(100), tail.next_line()).await;
        assert!(pending.is_err(), "partial line must not be emitted");

        append(&path, "ied { read }\n");
        assert_eq!(next(&mut tail).await.as_str(), "avc:  denied { read }");
    }

    #[tokio::test]
    async fn truncation_restarts_from_beginning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "a long line that will be truncated away\n").unwrap();

        let mut tail = open_fast(&path).await;
        std::fs::write(&path, "short\n").unwrap();
        assert_eq!(next(&mut tail).await.as_str(), "short");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rotation_reopens_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "").unwrap();

        let mut tail = open_fast(&path).await;
        append(&path, "before rotate\n");
        assert_eq!(next(&mut tail).await.as_str(), "before rotate");

        std::fs::hard_link(&path, dir.path().join("audit.log.1")).unwrap();
        let fresh = dir.path().join("audit.log.new");
        std::fs::write(&fresh, "after rotate\n").unwrap();
        std::fs::rename(&fresh, &path).unwrap();
        assert_eq!(next(&mut tail).await.as_str(), "after rotate");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rotation_drains_old_file_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "").unwrap();

        let mut tail = open_fast(&path).await;
        append(&path, "avc:  denied last in old\n");
        std::fs::rename(&path, dir.path().join("audit.log.1")).unwrap();
        std::fs::write(&path, "first in new\n").unwrap();

        assert!(matches!(tail.check_path().await.unwrap(), PathState::Moved));
        assert_eq!(next(&mut tail).await.as_str(), "avc:  denied last in old");
        assert_eq!(next(&mut tail).await.as_str(), "first in new");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rotation_flushes_unterminated_old_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "").unwrap();

        let mut tail = open_fast(&path).await;
        append(&path, "no newline");
        std::fs::rename(&path, dir.path().join("audit.log.1")).unwrap();
        std::fs::write(&path, "fresh\n").unwrap();

        assert_eq!(next(&mut tail).await.as_str(), "no newline");
        assert_eq!(next(&mut tail).await.as_str(), "fresh");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rotation_is_failure_when_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "").unwrap();

        let mut tail = Tail::open(&path, Duration::from_millis(10), false)
            .await
            .unwrap();
        let fresh = dir.path().join("audit.log.new");
        std::fs::write(&fresh, "").unwrap();
        std::fs::rename(&fresh, &path).unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), tail.next_line())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, WatchError::StreamFailure { .. }));
    }

    #[tokio::test]
    async fn removal_drains_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "").unwrap();

        let mut tail = open_fast(&path).await;
        append(&path, "last words\n");
        std::fs::remove_file(&path).unwrap();

        assert_eq!(next(&mut tail).await.as_str(), "last words");
        let err = tokio::time::timeout(Duration::from_secs(5), tail.next_line())
            .await
            .unwrap()
            .unwrap_err();
        match err {
            WatchError::StreamFailure { reason, .. } => assert_eq!(reason, "file was removed"),
            other => panic!("expected stream failure, got {other:?}"),
        }
    }

    #[test]
    fn split_lines_keeps_remainder() {
        let mut pending = Vec::new();
        let mut ready = VecDeque::new();
        split_lines(b"one\ntw", &mut pending, &mut ready);
        split_lines(b"o\nthree", &mut pending, &mut ready);
        let lines: Vec<_> = ready.iter().map(|l| l.as_str().to_string()).collect();
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(pending, b"three");
    }

    #[test]
    fn watcher_builder() {
        let w = Watcher::new("/var/log/audit/audit.log", "avc:  denied")
            .with_poll_interval(Duration::from_millis(50))
            .with_follow_rotation(false);
        assert_eq!(w.path(), Path::new("/var/log/audit/audit.log"));
        assert_eq!(w.marker(), "avc:  denied");
        assert_eq!(w.poll_interval, Duration::from_millis(50));
        assert!(!w.follow_rotation);
    }

    #[test]
    fn handler_error_message() {
        let err = WatchError::Handler("boom".into());
        assert_eq!(err.to_string(), "handler failed: boom");
    }
}
