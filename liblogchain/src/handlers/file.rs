/*
 * Rotating file handler
 *
 * Records are appended to `{prefix-}YYYY-MM-DD[.N].log` inside the target
 * directory. The active file is replaced when:
 * - no file is open yet
 * - the next write would push it past `max_size`
 * - the record belongs to a later calendar day than the open file
 *
 * Writes can optionally go through an in-memory buffer that a background
 * task flushes on a fixed interval. The open file, the byte counter and the
 * buffer all live in one FileState behind one mutex, so rotation, writes,
 * the flush timer and close never interleave.
 */

use chrono::{DateTime, Local, TimeZone, Timelike};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::LogError;
use crate::formatter::Formatter;
use crate::handler::Handler;
use crate::level::Level;
use crate::record::Record;
use crate::runtime::{runtime, wait};
use crate::supervisor::supervise_async;

pub const DEFAULT_MAX_SIZE: u64 = 256 << 20;
pub const DEFAULT_PERM: u32 = 0o666;

enum Output {
    Direct(File),
    Buffered(BufWriter<File>),
}

impl Output {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Output::Direct(file) => file.write_all(bytes),
            Output::Buffered(writer) => writer.write_all(bytes),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Direct(_) => Ok(()),
            Output::Buffered(writer) => writer.flush(),
        }
    }

    /// Flushes whatever is buffered and hands back the bare file.
    fn into_file(self) -> io::Result<File> {
        match self {
            Output::Direct(file) => Ok(file),
            Output::Buffered(writer) => writer.into_inner().map_err(|e| e.into_error()),
        }
    }
}

#[derive(Default)]
struct FileState {
    output: Option<Output>,
    path: Option<PathBuf>,
    written: u64,
    /// Unix time of 23:59:59 on the open file's day
    day_end: i64,
    buffer_capacity: Option<usize>,
    closed: bool,
}

impl FileState {
    fn flush(&mut self) -> io::Result<()> {
        match self.output.as_mut() {
            Some(output) => output.flush(),
            None => Ok(()),
        }
    }
}

struct Flusher {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

fn lock(state: &Mutex<FileState>) -> MutexGuard<'_, FileState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct FileHandler {
    level: Level,
    formatter: Arc<dyn Formatter>,
    bubble: bool,
    dir: PathBuf,
    prefix: Option<String>,
    max_size: u64,
    perm: u32,
    state: Arc<Mutex<FileState>>,
    flusher: Mutex<Option<Flusher>>,
}

impl FileHandler {
    /// Creates the handler and its target directory.
    ///
    /// A relative `dir` is resolved against the current working directory.
    pub fn new(level: Level, formatter: Arc<dyn Formatter>, dir: impl AsRef<Path>) -> Result<Self, LogError> {
        let dir = dir.as_ref();
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(dir)
        };
        fs::create_dir_all(&dir).map_err(|e| LogError::Config {
            field: "dir".to_string(),
            reason: format!("failed to create log directory '{}': {}", dir.display(), e),
        })?;

        Ok(FileHandler {
            level,
            formatter,
            bubble: false,
            dir,
            prefix: None,
            max_size: DEFAULT_MAX_SIZE,
            perm: DEFAULT_PERM,
            state: Arc::new(Mutex::new(FileState::default())),
            flusher: Mutex::new(None),
        })
    }

    pub fn with_bubble(mut self, bubble: bool) -> Self {
        self.bubble = bubble;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = if prefix.is_empty() { None } else { Some(prefix) };
        self
    }

    /// Maximum bytes per file, 0 disables size based rotation.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Unix permission bits for newly created files.
    pub fn with_perm(mut self, perm: u32) -> Self {
        self.perm = perm;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file currently open for writing, if any.
    pub fn current_path(&self) -> Option<PathBuf> {
        lock(&self.state).path.clone()
    }

    /// Enables buffered writes flushed every `flush_interval`.
    ///
    /// Only the first call has an effect.
    pub fn set_buffer(&self, size: usize, flush_interval: Duration) -> Result<(), LogError> {
        let mut flusher = self.flusher.lock().unwrap_or_else(PoisonError::into_inner);
        if flusher.is_some() {
            return Ok(());
        }
        {
            let mut state = lock(&self.state);
            if state.closed || state.buffer_capacity.is_some() {
                return Ok(());
            }
            state.buffer_capacity = Some(size);
            // Rebind an already open file to the new buffer
            if let Some(output) = state.output.take() {
                let file = output.into_file()?;
                state.output = Some(Output::Buffered(BufWriter::with_capacity(size, file)));
            }
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let state = Arc::clone(&self.state);
        let task = runtime()?.spawn(async move {
            supervise_async("file buffer flush", Duration::ZERO, || {
                flush_periodically(Arc::clone(&state), token.clone(), flush_interval)
            })
            .await
        });
        *flusher = Some(Flusher { cancel, task });
        Ok(())
    }

    fn write_locked(&self, state: &mut FileState, record: &Record, bytes: &[u8]) -> Result<(), LogError> {
        let incoming = bytes.len() as u64;
        if self.needs_rotation(state, record, incoming) {
            self.rotate(state, record, incoming)?;
        }
        let output = state.output.as_mut().ok_or(LogError::Closed)?;
        output.write_all(bytes)?;
        state.written += incoming;
        Ok(())
    }

    fn needs_rotation(&self, state: &FileState, record: &Record, incoming: u64) -> bool {
        state.output.is_none()
            || (self.max_size > 0 && state.written > 0 && state.written + incoming > self.max_size)
            || record.timestamp.timestamp() > state.day_end
    }

    fn rotate(&self, state: &mut FileState, record: &Record, incoming: u64) -> Result<(), LogError> {
        if let Some(output) = state.output.take() {
            // The previous file is done with either way
            if let Err(e) = output.into_file() {
                tracing::warn!(
                    path = ?state.path,
                    error = %e,
                    "failed to flush log file before rotation"
                );
            }
        }
        state.path = None;

        let date = record.timestamp.format("%Y-%m-%d").to_string();
        let path = self.select_file(&date, incoming)?;
        let file = self.open(&path)?;
        state.written = file.metadata()?.len();
        state.day_end = end_of_day(&record.timestamp);
        state.output = Some(match state.buffer_capacity {
            Some(capacity) => Output::Buffered(BufWriter::with_capacity(capacity, file)),
            None => Output::Direct(file),
        });
        tracing::debug!(path = %path.display(), size = state.written, "opened log file");
        state.path = Some(path);
        Ok(())
    }

    fn stem(&self, date: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}-{}", prefix, date),
            None => date.to_string(),
        }
    }

    /// Picks the file a record of `incoming` bytes dated `date` goes to.
    fn select_file(&self, date: &str, incoming: u64) -> Result<PathBuf, LogError> {
        let stem = self.stem(date);
        let index = highest_index(&self.dir, &stem)?;
        let candidate = self.dir.join(file_name(&stem, index));
        match fs::metadata(&candidate) {
            Ok(meta) if self.max_size > 0 && meta.len() > 0 && meta.len() + incoming > self.max_size => {
                let next = index.map_or(0, |n| n + 1);
                Ok(self.dir.join(file_name(&stem, Some(next))))
            }
            Ok(_) => Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(candidate),
            Err(e) => Err(e.into()),
        }
    }

    fn open(&self, path: &Path) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.perm);
        }
        options.open(path)
    }
}

impl Handler for FileHandler {
    fn accepts(&self, level: Level) -> bool {
        level.is_at_least(self.level)
    }

    fn handle(&self, record: &Record) -> bool {
        let bytes = match self.formatter.to_bytes(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "file handler failed to format record");
                return true;
            }
        };

        let mut state = lock(&self.state);
        if state.closed {
            return true;
        }
        match self.write_locked(&mut state, record, &bytes) {
            Ok(()) => self.bubble,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "file handler failed to write record");
                true
            }
        }
    }

    fn close(&self) -> Result<(), LogError> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }

        // The flush task needs the state lock, so wait for it unlocked
        let flusher = self.flusher.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(flusher) = flusher {
            flusher.cancel.cancel();
            if let Err(e) = wait(flusher.task) {
                tracing::warn!(error = %e, "file buffer flush task ended abnormally");
            }
        }

        let mut state = lock(&self.state);
        state.buffer_capacity = None;
        state.path = None;
        match state.output.take() {
            Some(output) => output.into_file().map(drop).map_err(LogError::from),
            None => Ok(()),
        }
    }
}

impl Drop for FileHandler {
    fn drop(&mut self) {
        // Without close the flush task would keep the state alive forever
        let flusher = self.flusher.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(flusher) = flusher {
            flusher.cancel.cancel();
        }
        flush_now(&self.state);
    }
}

async fn flush_periodically(state: Arc<Mutex<FileState>>, cancel: CancellationToken, every: Duration) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    // The first tick fires immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => flush_now(&state),
        }
    }
}

fn flush_now(state: &Mutex<FileState>) {
    if let Err(e) = lock(state).flush() {
        tracing::warn!(error = %e, "failed to flush log buffer");
    }
}

fn file_name(stem: &str, index: Option<u32>) -> String {
    match index {
        Some(n) => format!("{}.{}.log", stem, n),
        None => format!("{}.log", stem),
    }
}

/// Highest `N` among `{stem}.N.log` files in `dir`.
fn highest_index(dir: &Path, stem: &str) -> io::Result<Option<u32>> {
    let mut highest = None;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(digits) = name
            .strip_prefix(stem)
            .and_then(|rest| rest.strip_suffix(".log"))
            .and_then(|rest| rest.strip_prefix('.'))
        else {
            continue;
        };
        if let Ok(n) = digits.parse::<u32>() {
            // Reject forms like "01" or "+1" that do not name a file we created
            if n.to_string() == digits && highest.map_or(true, |h| n > h) {
                highest = Some(n);
            }
        }
    }
    Ok(highest)
}

fn end_of_day(timestamp: &DateTime<Local>) -> i64 {
    let end = timestamp.date_naive().and_hms_opt(23, 59, 59);
    match end.and_then(|end| Local.from_local_datetime(&end).latest()) {
        Some(end) => end.timestamp(),
        // 23:59:59 skipped by a DST change; close enough to midnight
        None => timestamp.timestamp() + 86_400 - i64::from(timestamp.time().num_seconds_from_midnight()),
    }
}
