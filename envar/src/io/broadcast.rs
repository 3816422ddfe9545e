//! Change notification for processes that cache their environment.
//!
//! Processes copy their variables at start and never re-read the persisted
//! store, so a successful write is followed by a broadcast. Listeners register
//! a record in a shared directory; the broadcaster bumps a generation counter
//! and waits, bounded by a timeout, until every live listener acknowledged it:
//!
//! ```text
//! <dir>/generation.json          {"category": "Environment", "generation": 7}
//! <dir>/listeners/<id>.json      {"id": "4242", "pid": 4242, "start_time": 913, "acknowledged": 7}
//! ```
//!
//! Both sides block on a [`notify`] poll watcher over the directory rather than
//! sleeping between reads. Listeners whose process is gone, or whose pid now
//! belongs to a process with a different start time, are pruned. A listener
//! whose process is stopped is considered hung and aborts the wait early with
//! a timeout.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use notify::{PollWatcher, RecursiveMode, Watcher};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::EnvarError;
use crate::io::process::{ProcessInfo, ProcessInspector, ProcessState};

/// Category carried by variable-store change notifications.
pub const ENVIRONMENT_CATEGORY: &str = "Environment";

pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_millis(15_000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

const GENERATION_FILE: &str = "generation.json";
const LISTENERS_DIR: &str = "listeners";

/// Longest stretch the broadcaster waits on file events before re-checking
/// listener processes, which can exit or stop without touching their record.
const LIVENESS_RECHECK: Duration = Duration::from_millis(500);

/// Notify every interested listener that the persisted store changed.
pub trait Broadcaster {
    fn notify_change(&self, category: &str) -> Result<BroadcastReport, EnvarError>;
}

/// Outcome of a broadcast that every live listener acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub generation: u64,
    pub acknowledged: usize,
    /// Records removed because their process no longer exists.
    pub pruned: usize,
}

/// A notification observed by a [`Listener`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub category: String,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ListenerRecord {
    id: String,
    pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_time: Option<u64>,
    acknowledged: u64,
}

impl ListenerRecord {
    /// Whether `info` shows the registering process is gone: reaped, or its
    /// pid reused by a process started at another time.
    fn is_stale(&self, info: &ProcessInfo) -> bool {
        if info.state == ProcessState::Zombie {
            return true;
        }
        matches!(
            (self.start_time, info.start_time),
            (Some(recorded), Some(actual)) if recorded != actual
        )
    }
}

/// Broadcaster over a shared directory, inspecting listener liveness via `P`.
#[derive(Debug, Clone)]
pub struct FileBroadcaster<P> {
    dir: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    inspector: P,
}

impl<P: ProcessInspector> FileBroadcaster<P> {
    pub fn new(dir: impl Into<PathBuf>, inspector: P) -> Self {
        Self {
            dir: dir.into(),
            timeout: DEFAULT_BROADCAST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            inspector,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    fn timed_out(&self) -> EnvarError {
        EnvarError::Timeout {
            timeout_ms: self.timeout_ms(),
        }
    }
}

impl<P: ProcessInspector> Broadcaster for FileBroadcaster<P> {
    #[instrument(skip(self), fields(dir = %self.dir.display(), timeout_ms = self.timeout_ms()))]
    fn notify_change(&self, category: &str) -> Result<BroadcastReport, EnvarError> {
        let listeners_dir = self.dir.join(LISTENERS_DIR);
        fs::create_dir_all(&listeners_dir).map_err(|err| EnvarError::broadcast_io(&err))?;
        // Watch before publishing so no acknowledgement can slip past.
        let acks = DirWatch::new(&listeners_dir, self.poll_interval)?;

        let generation = current_generation(&self.dir)? + 1;
        write_json_atomic(
            &self.dir.join(GENERATION_FILE),
            &ChangeNotice {
                category: category.to_string(),
                generation,
            },
        )?;
        debug!(generation, "generation published");

        let deadline = Instant::now() + self.timeout;
        let mut pruned = 0usize;
        loop {
            let mut acknowledged = 0usize;
            let mut pending = Vec::new();
            for (path, record) in read_listeners(&listeners_dir)? {
                if record.acknowledged >= generation {
                    acknowledged += 1;
                    continue;
                }
                match self.inspector.process_info(record.pid) {
                    Err(EnvarError::ProcessNotFound { .. }) => {
                        prune(&path, &record);
                        pruned += 1;
                    }
                    Ok(info) if record.is_stale(&info) => {
                        prune(&path, &record);
                        pruned += 1;
                    }
                    Ok(info) if info.state == ProcessState::Stopped => {
                        warn!(id = %record.id, pid = record.pid, "listener is hung, aborting wait");
                        return Err(self.timed_out());
                    }
                    _ => pending.push(record.id),
                }
            }

            if pending.is_empty() {
                info!(generation, acknowledged, pruned, "broadcast acknowledged");
                return Ok(BroadcastReport {
                    generation,
                    acknowledged,
                    pruned,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(?pending, "listeners did not acknowledge before the deadline");
                return Err(self.timed_out());
            }
            acks.wait(Some(LIVENESS_RECHECK.min(deadline - now)))?;
        }
    }
}

/// A process-side registration that receives change notifications.
#[derive(Debug)]
pub struct Listener {
    dir: PathBuf,
    id: String,
    pid: u32,
    start_time: Option<u64>,
    seen: u64,
}

impl Listener {
    /// Register under `id` for the process `pid` started at `start_time`.
    /// Notifications published before this call are not reported.
    pub fn register(
        dir: &Path,
        id: impl Into<String>,
        pid: u32,
        start_time: Option<u64>,
    ) -> Result<Self, EnvarError> {
        let id = id.into();
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(EnvarError::validation(format!("invalid listener id '{id}'")));
        }
        let listeners_dir = dir.join(LISTENERS_DIR);
        fs::create_dir_all(&listeners_dir).map_err(|err| EnvarError::broadcast_io(&err))?;
        let listener = Self {
            dir: dir.to_path_buf(),
            id,
            pid,
            start_time,
            seen: current_generation(dir)?,
        };
        listener.write_record()?;
        debug!(id = %listener.id, pid, seen = listener.seen, "listener registered");
        Ok(listener)
    }

    /// The newest notification not yet acknowledged, if any.
    pub fn poll(&self) -> Result<Option<ChangeNotice>, EnvarError> {
        match read_json::<ChangeNotice>(&self.dir.join(GENERATION_FILE))? {
            Some(notice) if notice.generation > self.seen => Ok(Some(notice)),
            _ => Ok(None),
        }
    }

    /// Block until a notification arrives; `None` when `timeout` elapses first.
    ///
    /// `poll_interval` is how often the underlying watcher scans the directory.
    pub fn wait(
        &self,
        timeout: Option<Duration>,
        poll_interval: Duration,
    ) -> Result<Option<ChangeNotice>, EnvarError> {
        let changes = DirWatch::new(&self.dir, poll_interval)?;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if let Some(notice) = self.poll()? {
                return Ok(Some(notice));
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            changes.wait(remaining)?;
        }
    }

    pub fn acknowledge(&mut self, notice: &ChangeNotice) -> Result<(), EnvarError> {
        self.seen = self.seen.max(notice.generation);
        self.write_record()?;
        debug!(id = %self.id, generation = self.seen, "notification acknowledged");
        Ok(())
    }

    pub fn unregister(self) -> Result<(), EnvarError> {
        match fs::remove_file(self.record_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EnvarError::broadcast_io(&err)),
        }
    }

    fn record_path(&self) -> PathBuf {
        self.dir
            .join(LISTENERS_DIR)
            .join(format!("{}.json", self.id))
    }

    fn write_record(&self) -> Result<(), EnvarError> {
        write_json_atomic(
            &self.record_path(),
            &ListenerRecord {
                id: self.id.clone(),
                pid: self.pid,
                start_time: self.start_time,
                acknowledged: self.seen,
            },
        )
    }
}

/// Change events for the direct children of one directory.
struct DirWatch {
    // Dropping the watcher stops its scan thread.
    _watcher: PollWatcher,
    events: Receiver<notify::Result<notify::Event>>,
}

impl DirWatch {
    fn new(dir: &Path, poll_interval: Duration) -> Result<Self, EnvarError> {
        let (tx, events) = mpsc::channel();
        let config = notify::Config::default()
            .with_poll_interval(poll_interval)
            .with_compare_contents(true);
        let mut watcher = PollWatcher::new(tx, config).map_err(watch_error)?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;
        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Block until something in the directory changes. Returns `false` when
    /// `timeout` elapsed first; `None` waits indefinitely.
    fn wait(&self, timeout: Option<Duration>) -> Result<bool, EnvarError> {
        let received = match timeout {
            Some(timeout) => match self.events.recv_timeout(timeout) {
                Ok(received) => received,
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => return Err(watcher_stopped()),
            },
            None => self.events.recv().map_err(|_| watcher_stopped())?,
        };
        match received {
            Ok(event) => trace!(kind = ?event.kind, paths = ?event.paths, "change observed"),
            Err(err) => warn!(err = %err, "directory watch reported an error"),
        }
        // Coalesce a burst (temp file write + rename) into one wakeup.
        while self.events.try_recv().is_ok() {}
        Ok(true)
    }
}

fn watch_error(err: notify::Error) -> EnvarError {
    match &err.kind {
        notify::ErrorKind::Io(io) => EnvarError::broadcast_io(io),
        _ => EnvarError::Broadcast {
            code: -1,
            message: format!("watch broadcast directory: {err}"),
        },
    }
}

fn watcher_stopped() -> EnvarError {
    EnvarError::Broadcast {
        code: -1,
        message: "broadcast directory watcher stopped".to_string(),
    }
}

fn current_generation(dir: &Path) -> Result<u64, EnvarError> {
    Ok(read_json::<ChangeNotice>(&dir.join(GENERATION_FILE))?
        .map(|notice| notice.generation)
        .unwrap_or(0))
}

fn read_listeners(dir: &Path) -> Result<Vec<(PathBuf, ListenerRecord)>, EnvarError> {
    let mut records = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| EnvarError::broadcast_io(&err))? {
        let path = entry.map_err(|err| EnvarError::broadcast_io(&err))?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        match read_json::<ListenerRecord>(&path) {
            Ok(Some(record)) => records.push((path, record)),
            // Unregistered between listing and reading.
            Ok(None) => {}
            Err(err) => warn!(path = %path.display(), err = %err, "skipping unreadable listener record"),
        }
    }
    records.sort_by(|a, b| a.1.id.cmp(&b.1.id));
    Ok(records)
}

fn prune(path: &Path, record: &ListenerRecord) {
    debug!(id = %record.id, pid = record.pid, "pruning stale listener");
    if let Err(err) = fs::remove_file(path)
        && err.kind() != ErrorKind::NotFound
    {
        warn!(path = %path.display(), err = %err, "failed to prune listener record");
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, EnvarError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(EnvarError::broadcast_io(&err)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|err| EnvarError::Broadcast {
            code: -1,
            message: format!("parse {}: {err}", path.display()),
        })
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), EnvarError> {
    let mut buf = serde_json::to_string_pretty(value).map_err(|err| EnvarError::Broadcast {
        code: -1,
        message: format!("serialize {}: {err}", path.display()),
    })?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).map_err(|err| EnvarError::broadcast_io(&err))?;
    fs::rename(&tmp_path, path).map_err(|err| EnvarError::broadcast_io(&err))?;
    Ok(())
}
