//! Test-only fakes for the store, broadcaster and procfs seams.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;

use tempfile::TempDir;

use crate::core::types::PersistedScope;
use crate::core::variable_set::VariableSet;
use crate::error::EnvarError;
use crate::io::broadcast::{BroadcastReport, Broadcaster};
use crate::io::process::ProcFs;
use crate::io::store::VariableStore;

/// In-memory store implementing the same contract as `FileStore`.
///
/// A scope that was never seeded behaves like a missing backing file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    scopes: RefCell<HashMap<PersistedScope, Vec<(String, String)>>>,
    deny_writes: Cell<bool>,
    writes: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `scope` holding `vars` (possibly none).
    pub fn with_scope(self, scope: PersistedScope, vars: &[(&str, &str)]) -> Self {
        self.scopes.borrow_mut().insert(
            scope,
            vars.iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        );
        self
    }

    pub fn deny_writes(self) -> Self {
        self.deny_writes.set(true);
        self
    }

    pub fn value(&self, scope: PersistedScope, name: &str) -> Option<String> {
        self.read_one(scope, name).ok().flatten()
    }

    /// Raw entries of `scope`, in insertion order.
    pub fn entries(&self, scope: PersistedScope) -> Option<Vec<(String, String)>> {
        self.scopes.borrow().get(&scope).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.get()
    }
}

impl VariableStore for MemoryStore {
    fn location(&self, scope: PersistedScope) -> String {
        format!("memory:{scope}")
    }

    fn read(&self, scope: PersistedScope) -> Result<VariableSet, EnvarError> {
        let scopes = self.scopes.borrow();
        let entries = scopes
            .get(&scope)
            .ok_or_else(|| EnvarError::StoreUnavailable {
                location: self.location(scope),
                reason: "store does not exist".to_string(),
            })?;
        let mut set = VariableSet::new();
        for (name, value) in entries {
            set.insert(name.as_str(), value.as_str());
        }
        Ok(set)
    }

    fn read_one(&self, scope: PersistedScope, name: &str) -> Result<Option<String>, EnvarError> {
        Ok(self.scopes.borrow().get(&scope).and_then(|entries| {
            entries
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        }))
    }

    fn write(&self, scope: PersistedScope, name: &str, value: &str) -> Result<(), EnvarError> {
        if self.deny_writes.get() {
            return Err(EnvarError::PermissionDenied {
                location: self.location(scope),
            });
        }
        let mut scopes = self.scopes.borrow_mut();
        let entries = scopes.entry(scope).or_default();
        match entries
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => entries.push((name.to_string(), value.to_string())),
        }
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn remove(&self, scope: PersistedScope, name: &str) -> Result<bool, EnvarError> {
        if self.deny_writes.get() {
            return Err(EnvarError::PermissionDenied {
                location: self.location(scope),
            });
        }
        let mut scopes = self.scopes.borrow_mut();
        let Some(entries) = scopes.get_mut(&scope) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        let removed = entries.len() != before;
        if removed {
            self.writes.set(self.writes.get() + 1);
        }
        Ok(removed)
    }
}

/// Broadcaster returning queued outcomes; succeeds once the queue is empty.
#[derive(Debug, Default)]
pub struct ScriptedBroadcaster {
    outcomes: RefCell<VecDeque<Result<BroadcastReport, EnvarError>>>,
    categories: RefCell<Vec<String>>,
}

impl ScriptedBroadcaster {
    pub fn new(outcomes: Vec<Result<BroadcastReport, EnvarError>>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            categories: RefCell::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Categories passed to `notify_change`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.categories.borrow().clone()
    }
}

impl Broadcaster for ScriptedBroadcaster {
    fn notify_change(&self, category: &str) -> Result<BroadcastReport, EnvarError> {
        self.categories.borrow_mut().push(category.to_string());
        let generation = self.categories.borrow().len() as u64;
        self.outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(BroadcastReport {
                generation,
                acknowledged: 0,
                pruned: 0,
            }))
    }
}

/// Scratch procfs tree with hand-written `stat`, `comm` and `environ` files.
#[derive(Debug)]
pub struct FakeProc {
    root: TempDir,
}

impl FakeProc {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            root: tempfile::tempdir()?,
        })
    }

    pub fn inspector(&self) -> ProcFs {
        ProcFs::new(self.root.path())
    }

    /// Start time (`stat` field 22) recorded for every fake `pid`.
    pub fn start_time(pid: u32) -> u64 {
        1_000 + u64::from(pid)
    }

    /// Add a process in state `state` (a `/proc/<pid>/stat` code like `'S'`).
    pub fn add_process(
        &self,
        pid: u32,
        name: &str,
        state: char,
        vars: &[(&str, &str)],
    ) -> io::Result<()> {
        let dir = self.root.path().join(pid.to_string());
        fs::create_dir_all(&dir)?;
        let start = Self::start_time(pid);
        fs::write(
            dir.join("stat"),
            format!(
                "{pid} ({name}) {state} 1 {pid} {pid} 0 -1 4194560 0 0 0 0 0 0 0 0 20 0 1 0 {start} 0\n"
            ),
        )?;
        fs::write(dir.join("comm"), format!("{name}\n"))?;
        let mut environ = Vec::new();
        for (key, value) in vars {
            environ.extend_from_slice(key.as_bytes());
            environ.push(b'=');
            environ.extend_from_slice(value.as_bytes());
            environ.push(0);
        }
        fs::write(dir.join("environ"), environ)
    }
}
