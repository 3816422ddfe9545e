//! Persisted variable stores for the user and machine scopes.
//!
//! Each scope is a flat TOML table of string values:
//!
//! ```toml
//! PATH = "/usr/local/bin;/opt/tools/bin"
//! EDITOR = "vim"
//! ```
//!
//! Writes edit the document in place, so comments, key order and quoting of
//! untouched entries survive an upsert or removal.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use toml_edit::DocumentMut;
use tracing::{debug, instrument, warn};

use crate::core::types::PersistedScope;
use crate::core::variable_set::VariableSet;
use crate::error::EnvarError;

/// Read/write contract over the persisted variable collections.
///
/// Implementations perform no change notification; that is layered on top.
pub trait VariableStore {
    /// Human-readable location of the scope's backing store.
    fn location(&self, scope: PersistedScope) -> String;

    /// All variables of `scope`. An existing but empty store yields an empty set.
    fn read(&self, scope: PersistedScope) -> Result<VariableSet, EnvarError>;

    /// Current value of `name`, matched case-insensitively.
    fn read_one(&self, scope: PersistedScope, name: &str) -> Result<Option<String>, EnvarError>;

    /// Upsert a single key, leaving every other key untouched.
    fn write(&self, scope: PersistedScope, name: &str, value: &str) -> Result<(), EnvarError>;

    /// Delete `name` (matched case-insensitively). Returns whether a key was removed.
    fn remove(&self, scope: PersistedScope, name: &str) -> Result<bool, EnvarError>;
}

/// TOML-file backed store, one file per scope.
#[derive(Debug, Clone)]
pub struct FileStore {
    user_path: PathBuf,
    machine_path: PathBuf,
}

impl FileStore {
    pub fn new(user_path: impl Into<PathBuf>, machine_path: impl Into<PathBuf>) -> Self {
        Self {
            user_path: user_path.into(),
            machine_path: machine_path.into(),
        }
    }

    pub fn path(&self, scope: PersistedScope) -> &Path {
        match scope {
            PersistedScope::User => &self.user_path,
            PersistedScope::Machine => &self.machine_path,
        }
    }

    fn load_contents(&self, scope: PersistedScope) -> Result<Option<String>, EnvarError> {
        let path = self.path(scope);
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(EnvarError::from_io(path.display().to_string(), &err)),
        }
    }

    /// Parse the scope's table; `Ok(None)` when the file does not exist.
    fn load_table(&self, scope: PersistedScope) -> Result<Option<toml::Table>, EnvarError> {
        let Some(contents) = self.load_contents(scope)? else {
            return Ok(None);
        };
        let table: toml::Table = toml::from_str(&contents)
            .map_err(|err| self.unavailable(scope, format!("parse store: {}", err.message())))?;
        Ok(Some(table))
    }

    /// Format-preserving view of the scope's file, for edits.
    fn load_document(&self, scope: PersistedScope) -> Result<Option<DocumentMut>, EnvarError> {
        let Some(contents) = self.load_contents(scope)? else {
            return Ok(None);
        };
        let document = contents
            .parse::<DocumentMut>()
            .map_err(|err| self.unavailable(scope, format!("parse store: {}", err.message())))?;
        Ok(Some(document))
    }

    fn unavailable(&self, scope: PersistedScope, reason: impl Into<String>) -> EnvarError {
        EnvarError::StoreUnavailable {
            location: self.location(scope),
            reason: reason.into(),
        }
    }
}

impl VariableStore for FileStore {
    fn location(&self, scope: PersistedScope) -> String {
        self.path(scope).display().to_string()
    }

    #[instrument(skip(self), fields(path = %self.path(scope).display()))]
    fn read(&self, scope: PersistedScope) -> Result<VariableSet, EnvarError> {
        let table = self
            .load_table(scope)?
            .ok_or_else(|| self.unavailable(scope, "store does not exist"))?;

        let mut set = VariableSet::new();
        for (name, value) in table {
            let toml::Value::String(value) = value else {
                return Err(self.unavailable(scope, format!("variable '{name}' is not a string")));
            };
            if !set.insert(name.as_str(), value) {
                warn!(%scope, name = %name, "duplicate variable name differing only in case, keeping first");
            }
        }
        debug!(count = set.len(), "store read");
        Ok(set)
    }

    fn read_one(&self, scope: PersistedScope, name: &str) -> Result<Option<String>, EnvarError> {
        let Some(table) = self.load_table(scope)? else {
            return Ok(None);
        };
        for (key, value) in table {
            if !key.eq_ignore_ascii_case(name) {
                continue;
            }
            return match value {
                toml::Value::String(value) => Ok(Some(value)),
                _ => Err(self.unavailable(scope, format!("variable '{key}' is not a string"))),
            };
        }
        Ok(None)
    }

    #[instrument(skip(self, value), fields(path = %self.path(scope).display()))]
    fn write(&self, scope: PersistedScope, name: &str, value: &str) -> Result<(), EnvarError> {
        let mut document = self.load_document(scope)?.unwrap_or_default();
        let key = stored_key(&document, name).unwrap_or_else(|| name.to_string());

        match document.get_mut(&key).and_then(toml_edit::Item::as_value_mut) {
            Some(existing) => {
                let decor = existing.decor().clone();
                *existing = toml_edit::Value::from(value);
                *existing.decor_mut() = decor;
            }
            None => {
                document.insert(&key, toml_edit::value(value));
            }
        }

        write_atomic(self.path(scope), &document.to_string())?;
        debug!(key = %key, "store written");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path(scope).display()))]
    fn remove(&self, scope: PersistedScope, name: &str) -> Result<bool, EnvarError> {
        let Some(mut document) = self.load_document(scope)? else {
            return Ok(false);
        };
        let Some(key) = stored_key(&document, name) else {
            return Ok(false);
        };
        document.remove(&key);

        write_atomic(self.path(scope), &document.to_string())?;
        debug!(key = %key, "store entry removed");
        Ok(true)
    }
}

/// Key of `name` as stored in the document, if present under any casing.
fn stored_key(document: &DocumentMut, name: &str) -> Option<String> {
    document
        .iter()
        .map(|(key, _)| key)
        .find(|key| key.eq_ignore_ascii_case(name))
        .map(str::to_string)
}

/// Replace `path` with `contents` via temp file + rename.
fn write_atomic(path: &Path, contents: &str) -> Result<(), EnvarError> {
    let location = || path.display().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| EnvarError::from_io(location(), &err))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents).map_err(|err| EnvarError::from_io(location(), &err))?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(EnvarError::from_io(location(), &err));
    }
    Ok(())
}
