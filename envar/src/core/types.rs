//! Shared deterministic types for scopes and mutation requests.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace a variable set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    User,
    Machine,
    /// Read-only snapshot of a running process, selected by pid.
    Process(u32),
}

impl Scope {
    /// The mutable persisted scope, or `None` for process snapshots.
    pub fn persisted(self) -> Option<PersistedScope> {
        match self {
            Scope::User => Some(PersistedScope::User),
            Scope::Machine => Some(PersistedScope::Machine),
            Scope::Process(_) => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::User => f.write_str("user"),
            Scope::Machine => f.write_str("machine"),
            Scope::Process(pid) => write!(f, "process {pid}"),
        }
    }
}

/// Scopes backed by a persisted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistedScope {
    User,
    Machine,
}

impl From<PersistedScope> for Scope {
    fn from(scope: PersistedScope) -> Self {
        match scope {
            PersistedScope::User => Scope::User,
            PersistedScope::Machine => Scope::Machine,
        }
    }
}

impl fmt::Display for PersistedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Scope::from(*self).fmt(f)
    }
}

/// Conflict resolution for a variable that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Append,
    Overwrite,
}

/// Mode applied when a request names none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultMode {
    #[default]
    Append,
    /// No default: an existing variable requires an explicit mode.
    None,
}

impl DefaultMode {
    pub fn resolve(self, requested: Option<Mode>) -> Option<Mode> {
        match (requested, self) {
            (Some(mode), _) => Some(mode),
            (None, DefaultMode::Append) => Some(Mode::Append),
            (None, DefaultMode::None) => None,
        }
    }
}

/// A single create/append/overwrite request.
///
/// `scope` may name a process so that the engine, not the parser, rejects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub scope: Scope,
    pub name: String,
    pub value: String,
    pub mode: Option<Mode>,
}

/// What the engine did to the stored variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    Created,
    Appended,
    Overwritten,
    Removed,
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationAction::Created => f.write_str("created"),
            MutationAction::Appended => f.write_str("appended"),
            MutationAction::Overwritten => f.write_str("overwritten"),
            MutationAction::Removed => f.write_str("removed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_mode_wins_over_default() {
        assert_eq!(
            DefaultMode::Append.resolve(Some(Mode::Overwrite)),
            Some(Mode::Overwrite)
        );
        assert_eq!(DefaultMode::None.resolve(Some(Mode::Append)), Some(Mode::Append));
    }

    #[test]
    fn missing_mode_follows_default() {
        assert_eq!(DefaultMode::Append.resolve(None), Some(Mode::Append));
        assert_eq!(DefaultMode::None.resolve(None), None);
    }

    #[test]
    fn process_scope_is_not_persisted() {
        assert_eq!(Scope::Process(42).persisted(), None);
        assert_eq!(Scope::Machine.persisted(), Some(PersistedScope::Machine));
    }

    #[test]
    fn actions_display_lowercase() {
        assert_eq!(MutationAction::Appended.to_string(), "appended");
        assert_eq!(MutationAction::Removed.to_string(), "removed");
    }
}
