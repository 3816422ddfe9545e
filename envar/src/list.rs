//! Orchestration and rendering for `envar -l`.

use std::fmt::Write as _;

use tracing::debug;

use crate::core::tokens::split_tokens;
use crate::core::types::{PersistedScope, Scope};
use crate::core::variable_set::VariableSet;
use crate::error::EnvarError;
use crate::io::process::{ProcessInfo, ProcessInspector};
use crate::io::store::VariableStore;

/// Variables whose list values render one token per `"; "` separator.
const LIST_VARIABLES: [&str; 2] = ["Path", "PSModulePath"];

const LIST_SEPARATOR: &str = "; ";

const PID_REUSE_NOTE: &str = "Note: process ids are reused once a process exits; \
     this block may belong to a different process than the one you expect.";

/// Where a listed variable set came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListSource {
    Store { location: String },
    Process(ProcessInfo),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub source: ListSource,
    pub variables: VariableSet,
}

/// Read the variable set of `scope` fresh from its source.
pub fn list_scope<S, P>(store: &S, inspector: &P, scope: Scope) -> Result<Listing, EnvarError>
where
    S: VariableStore + ?Sized,
    P: ProcessInspector + ?Sized,
{
    let listing = match scope {
        Scope::User => store_listing(store, PersistedScope::User)?,
        Scope::Machine => store_listing(store, PersistedScope::Machine)?,
        Scope::Process(pid) => {
            let info = inspector.process_info(pid)?;
            let variables = inspector.read_variables(pid)?;
            Listing {
                source: ListSource::Process(info),
                variables,
            }
        }
    };
    debug!(%scope, count = listing.variables.len(), "scope listed");
    Ok(listing)
}

fn store_listing<S: VariableStore + ?Sized>(
    store: &S,
    scope: PersistedScope,
) -> Result<Listing, EnvarError> {
    Ok(Listing {
        source: ListSource::Store {
            location: store.location(scope),
        },
        variables: store.read(scope)?,
    })
}

/// Header plus aligned `name : value` lines.
pub fn render_listing(listing: &Listing) -> String {
    let mut out = String::new();
    match &listing.source {
        ListSource::Store { location } => {
            let _ = writeln!(out, "Path: {location}");
        }
        ListSource::Process(info) => {
            let file = info
                .executable
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "?".to_string());
            let _ = writeln!(
                out,
                "Name: {:<15} Pid: {:>5} Status: {:<10} File: {}",
                info.name,
                info.pid,
                info.state.label(),
                file
            );
            let _ = writeln!(out, "{PID_REUSE_NOTE}");
        }
    }
    out.push('\n');
    out.push_str(&render_variables(&listing.variables));
    out
}

pub fn render_variables(set: &VariableSet) -> String {
    if set.is_empty() {
        return "(no variables)\n".to_string();
    }
    let width = set.name_width();
    let mut out = String::new();
    for var in set.iter() {
        let value = if is_list_variable(&var.name) {
            split_tokens(&var.value)
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR)
        } else {
            var.value.clone()
        };
        let _ = writeln!(out, "{:<width$} : {}", var.name, value);
    }
    out
}

fn is_list_variable(name: &str) -> bool {
    LIST_VARIABLES
        .iter()
        .any(|list| list.eq_ignore_ascii_case(name))
}
