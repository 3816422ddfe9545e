//! Orchestration for `envar -s`: validate, read, plan, write, broadcast.
//!
//! One invocation performs at most one store read, one store write and one
//! broadcast. No lock is held between the read and the write, so two
//! concurrent invocations against the same scope can lose an update.

use tracing::{debug, info, instrument};

use crate::core::mutation::{plan_mutation, validate_request};
use crate::core::types::{DefaultMode, MutationAction, MutationRequest, PersistedScope};
use crate::error::EnvarError;
use crate::io::broadcast::{BroadcastReport, Broadcaster, ENVIRONMENT_CATEGORY};
use crate::io::store::VariableStore;

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub scope: PersistedScope,
    pub name: String,
    pub action: MutationAction,
    pub previous: Option<String>,
    /// Value now persisted; `None` after a removal.
    pub stored: Option<String>,
}

/// Apply `request` to the store without notifying listeners.
///
/// Conflicts never silently overwrite or no-op: a duplicate append token or an
/// existing variable without a mode is reported and nothing is written.
#[instrument(skip_all, fields(scope = %request.scope, name = %request.name, mode = ?request.mode))]
pub fn apply_mutation<S: VariableStore + ?Sized>(
    store: &S,
    request: &MutationRequest,
    default_mode: DefaultMode,
) -> Result<MutationOutcome, EnvarError> {
    let scope = validate_request(request)?;
    let previous = store.read_one(scope, &request.name)?;
    debug!(exists = previous.is_some(), "current value read");

    let plan = plan_mutation(previous.as_deref(), request, default_mode)?;
    match &plan.value {
        Some(value) => store.write(scope, &request.name, value)?,
        None => {
            if !store.remove(scope, &request.name)? {
                debug!("variable vanished before removal");
            }
        }
    }
    info!(action = %plan.action, "variable written");

    Ok(MutationOutcome {
        scope,
        name: request.name.clone(),
        action: plan.action,
        previous,
        stored: plan.value,
    })
}

/// Apply `request`, then broadcast the change.
///
/// A broadcast failure is reported after the write has already been persisted.
pub fn set_variable<S, B>(
    store: &S,
    broadcaster: &B,
    request: &MutationRequest,
    default_mode: DefaultMode,
) -> Result<(MutationOutcome, BroadcastReport), EnvarError>
where
    S: VariableStore + ?Sized,
    B: Broadcaster + ?Sized,
{
    let outcome = apply_mutation(store, request, default_mode)?;
    let report = broadcaster.notify_change(ENVIRONMENT_CATEGORY)?;
    Ok((outcome, report))
}

/// Broadcast-only command: notify listeners without touching any store.
pub fn broadcast_only<B: Broadcaster + ?Sized>(broadcaster: &B) -> Result<BroadcastReport, EnvarError> {
    broadcaster.notify_change(ENVIRONMENT_CATEGORY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Mode, Scope};
    use crate::test_support::{MemoryStore, ScriptedBroadcaster};

    fn request(name: &str, value: &str, mode: Option<Mode>) -> MutationRequest {
        MutationRequest {
            scope: Scope::User,
            name: name.to_string(),
            value: value.to_string(),
            mode,
        }
    }

    fn user_store(vars: &[(&str, &str)]) -> MemoryStore {
        MemoryStore::new().with_scope(PersistedScope::User, vars)
    }

    #[test]
    fn append_to_path_scenario() {
        let store = user_store(&[("PATH", r"C:\A;C:\B")]);
        let broadcaster = ScriptedBroadcaster::succeeding();
        let (outcome, _) = set_variable(
            &store,
            &broadcaster,
            &request("PATH", r"C:\Tools", Some(Mode::Append)),
            DefaultMode::Append,
        )
        .expect("set");

        assert_eq!(outcome.action, MutationAction::Appended);
        assert_eq!(
            store.value(PersistedScope::User, "PATH").as_deref(),
            Some(r"C:\A;C:\B;C:\Tools")
        );
        assert_eq!(broadcaster.calls(), vec![ENVIRONMENT_CATEGORY.to_string()]);
    }

    #[test]
    fn overwrite_path_scenario() {
        let store = user_store(&[("PATH", r"C:\A;C:\B")]);
        let (outcome, _) = set_variable(
            &store,
            &ScriptedBroadcaster::succeeding(),
            &request("PATH", r"C:\Tools", Some(Mode::Overwrite)),
            DefaultMode::Append,
        )
        .expect("set");

        assert_eq!(outcome.previous.as_deref(), Some(r"C:\A;C:\B"));
        assert_eq!(
            store.value(PersistedScope::User, "PATH").as_deref(),
            Some(r"C:\Tools")
        );
    }

    #[test]
    fn repeated_overwrite_is_stable() {
        let store = user_store(&[("EDITOR", "nano")]);
        let req = request("EDITOR", "vim", Some(Mode::Overwrite));
        apply_mutation(&store, &req, DefaultMode::Append).expect("first");
        let after_first = store.entries(PersistedScope::User);
        apply_mutation(&store, &req, DefaultMode::Append).expect("second");
        assert_eq!(store.entries(PersistedScope::User), after_first);
    }

    #[test]
    fn sequential_appends_preserve_order() {
        let store = user_store(&[("LIST", "A")]);
        for value in ["B", "C"] {
            apply_mutation(&store, &request("LIST", value, None), DefaultMode::Append)
                .expect("append");
        }
        assert_eq!(
            store.value(PersistedScope::User, "LIST").as_deref(),
            Some("A;B;C")
        );
    }

    #[test]
    fn absent_variable_is_created_in_any_mode() {
        for mode in [Some(Mode::Append), Some(Mode::Overwrite), None] {
            let store = user_store(&[]);
            let outcome = apply_mutation(&store, &request("NEW", "1", mode), DefaultMode::None)
                .expect("create");
            assert_eq!(outcome.action, MutationAction::Created);
            assert_eq!(store.value(PersistedScope::User, "NEW").as_deref(), Some("1"));
        }
    }

    #[test]
    fn empty_value_removes_variable_and_broadcasts() {
        let store = user_store(&[("EDITOR", "vim"), ("Path", "/bin")]);
        let broadcaster = ScriptedBroadcaster::succeeding();
        let (outcome, _) = set_variable(
            &store,
            &broadcaster,
            &request("PATH", "", Some(Mode::Overwrite)),
            DefaultMode::Append,
        )
        .expect("remove");

        assert_eq!(outcome.action, MutationAction::Removed);
        assert_eq!(outcome.previous.as_deref(), Some("/bin"));
        assert_eq!(outcome.stored, None);
        assert_eq!(
            store.entries(PersistedScope::User),
            Some(vec![("EDITOR".to_string(), "vim".to_string())])
        );
        assert_eq!(broadcaster.calls().len(), 1);
    }

    #[test]
    fn empty_append_and_absent_removal_write_nothing() {
        let store = user_store(&[("PATH", "/bin")]);
        let broadcaster = ScriptedBroadcaster::succeeding();
        for req in [
            request("PATH", "", Some(Mode::Append)),
            request("MISSING", "", None),
        ] {
            let err = set_variable(&store, &broadcaster, &req, DefaultMode::Append)
                .expect_err("rejected");
            assert!(matches!(err, EnvarError::Validation(_)), "{err:?}");
        }
        assert_eq!(store.write_count(), 0);
        assert!(broadcaster.calls().is_empty());
    }

    #[test]
    fn duplicate_append_leaves_store_unchanged() {
        let store = user_store(&[("PATH", r"C:\x;C:\Y")]);
        let broadcaster = ScriptedBroadcaster::succeeding();
        let err = set_variable(
            &store,
            &broadcaster,
            &request("PATH", r"c:\y", Some(Mode::Append)),
            DefaultMode::Append,
        )
        .expect_err("duplicate");

        assert!(matches!(err, EnvarError::ValueAlreadyExists { .. }));
        assert_eq!(store.write_count(), 0);
        assert_eq!(
            store.value(PersistedScope::User, "PATH").as_deref(),
            Some(r"C:\x;C:\Y")
        );
        assert!(broadcaster.calls().is_empty());
    }

    #[test]
    fn existing_variable_without_mode_or_default_is_rejected() {
        let store = user_store(&[("PATH", "/bin")]);
        let err = apply_mutation(&store, &request("PATH", "/opt", None), DefaultMode::None)
            .expect_err("ambiguous");
        assert_eq!(
            err,
            EnvarError::VariableExists {
                name: "PATH".to_string()
            }
        );
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn process_scope_is_rejected_before_any_io() {
        let store = MemoryStore::new();
        let req = MutationRequest {
            scope: Scope::Process(4242),
            ..request("PATH", "/opt", Some(Mode::Overwrite))
        };
        let err = apply_mutation(&store, &req, DefaultMode::Append).expect_err("process");
        assert!(matches!(err, EnvarError::Validation(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn write_failure_skips_broadcast() {
        let store = user_store(&[]).deny_writes();
        let broadcaster = ScriptedBroadcaster::succeeding();
        let err = set_variable(
            &store,
            &broadcaster,
            &request("PATH", "/opt", None),
            DefaultMode::Append,
        )
        .expect_err("denied");
        assert!(matches!(err, EnvarError::PermissionDenied { .. }));
        assert!(broadcaster.calls().is_empty());
    }

    #[test]
    fn broadcast_timeout_is_reported_after_write() {
        let store = user_store(&[]);
        let broadcaster =
            ScriptedBroadcaster::new(vec![Err(EnvarError::Timeout { timeout_ms: 15_000 })]);
        let err = set_variable(
            &store,
            &broadcaster,
            &request("PATH", "/opt", None),
            DefaultMode::Append,
        )
        .expect_err("timeout");
        assert_eq!(err, EnvarError::Timeout { timeout_ms: 15_000 });
        assert_eq!(store.value(PersistedScope::User, "PATH").as_deref(), Some("/opt"));
    }

    #[test]
    fn broadcast_only_never_touches_store() {
        let store = user_store(&[("PATH", "/bin")]);
        let before = store.entries(PersistedScope::User);
        let broadcaster = ScriptedBroadcaster::succeeding();
        broadcast_only(&broadcaster).expect("broadcast");
        assert_eq!(store.entries(PersistedScope::User), before);
        assert_eq!(store.write_count(), 0);
        assert_eq!(broadcaster.calls().len(), 1);
    }

    #[test]
    fn broadcast_error_is_propagated() {
        let broadcaster = ScriptedBroadcaster::new(vec![Err(EnvarError::Broadcast {
            code: 13,
            message: "Permission denied".to_string(),
        })]);
        let err = broadcast_only(&broadcaster).expect_err("error");
        assert!(matches!(err, EnvarError::Broadcast { code: 13, .. }));
    }
}
