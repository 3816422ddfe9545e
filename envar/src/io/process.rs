//! Read-only inspection of running processes through `/proc`.
//!
//! A process's environment block is the snapshot captured when it was
//! created. Pids are reused once a process exits, so the block read for a pid
//! may belong to an unrelated, newer process; callers should warn about this.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::core::variable_set::VariableSet;
use crate::error::EnvarError;

/// Scheduler state of a process as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Sleeping,
    DiskSleep,
    /// Stopped by a signal or a tracer; it will not respond until resumed.
    Stopped,
    Zombie,
    Other(char),
}

impl ProcessState {
    fn from_code(code: char) -> Self {
        match code {
            'R' => ProcessState::Running,
            'S' | 'I' => ProcessState::Sleeping,
            'D' => ProcessState::DiskSleep,
            'T' | 't' => ProcessState::Stopped,
            'Z' | 'X' => ProcessState::Zombie,
            other => ProcessState::Other(other),
        }
    }

    pub fn label(self) -> String {
        match self {
            ProcessState::Running => "Running".to_string(),
            ProcessState::Sleeping => "Sleeping".to_string(),
            ProcessState::DiskSleep => "DiskSleep".to_string(),
            ProcessState::Stopped => "Stopped".to_string(),
            ProcessState::Zombie => "Zombie".to_string(),
            ProcessState::Other(code) => format!("Other({code})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub state: ProcessState,
    /// Resolved executable path, when the kernel lets us see it.
    pub executable: Option<PathBuf>,
    /// Clock ticks since boot at which the process started (`stat` field 22).
    /// Together with the pid it identifies one process across pid reuse.
    pub start_time: Option<u64>,
}

pub trait ProcessInspector {
    /// Environment block of `pid`, as captured at process creation.
    fn read_variables(&self, pid: u32) -> Result<VariableSet, EnvarError>;

    fn process_info(&self, pid: u32) -> Result<ProcessInfo, EnvarError>;
}

/// Inspector over a procfs mount (normally `/proc`).
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn process_dir(&self, pid: u32) -> Result<PathBuf, EnvarError> {
        let dir = self.root.join(pid.to_string());
        if !dir.is_dir() {
            return Err(EnvarError::ProcessNotFound { pid });
        }
        Ok(dir)
    }

    fn read_file(&self, pid: u32, path: &Path) -> Result<Vec<u8>, EnvarError> {
        fs::read(path).map_err(|err| match err.kind() {
            // The process exited between the directory check and the read.
            ErrorKind::NotFound => EnvarError::ProcessNotFound { pid },
            _ => EnvarError::from_io(path.display().to_string(), &err),
        })
    }
}

impl ProcessInspector for ProcFs {
    #[instrument(skip(self))]
    fn read_variables(&self, pid: u32) -> Result<VariableSet, EnvarError> {
        let dir = self.process_dir(pid)?;
        let raw = self.read_file(pid, &dir.join("environ"))?;
        let set = parse_environ(&raw);
        debug!(count = set.len(), "process environment read");
        Ok(set)
    }

    fn process_info(&self, pid: u32) -> Result<ProcessInfo, EnvarError> {
        let dir = self.process_dir(pid)?;
        let stat = self.read_file(pid, &dir.join("stat"))?;
        let stat = String::from_utf8_lossy(&stat);
        let state = parse_stat_state(&stat).ok_or_else(|| EnvarError::StoreUnavailable {
            location: dir.join("stat").display().to_string(),
            reason: "unrecognized stat format".to_string(),
        })?;
        let name = match fs::read_to_string(dir.join("comm")) {
            Ok(comm) => comm.trim_end().to_string(),
            Err(_) => parse_stat_name(&stat).unwrap_or_default().to_string(),
        };
        let executable = fs::read_link(dir.join("exe")).ok();
        Ok(ProcessInfo {
            pid,
            name,
            state,
            executable,
            start_time: parse_stat_start_time(&stat),
        })
    }
}

/// Parse a NUL-separated `NAME=value` block. Entries without `=` are skipped.
pub fn parse_environ(raw: &[u8]) -> VariableSet {
    let mut set = VariableSet::new();
    for entry in raw.split(|byte| *byte == 0) {
        if entry.is_empty() {
            continue;
        }
        let entry = String::from_utf8_lossy(entry);
        // A leading '=' belongs to the name (e.g. `=C:` drive entries).
        let Some(split) = entry.char_indices().skip(1).find(|(_, ch)| *ch == '=') else {
            continue;
        };
        let (name, value) = (&entry[..split.0], &entry[split.0 + 1..]);
        if !set.insert(name, value) {
            warn!(name, "duplicate process variable differing only in case, keeping first");
        }
    }
    set
}

/// State code from `/proc/<pid>/stat`: the first field after the `(comm)`.
fn parse_stat_state(stat: &str) -> Option<ProcessState> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.trim_start().chars().next().map(ProcessState::from_code)
}

/// Field 22 of `/proc/<pid>/stat`, counting the state code as field 3.
fn parse_stat_start_time(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(22 - 3)?.parse().ok()
}

fn parse_stat_name(stat: &str) -> Option<&str> {
    let start = stat.find('(')? + 1;
    let end = stat.rfind(')')?;
    stat.get(start..end)
}
