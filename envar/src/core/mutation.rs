//! Append/overwrite/create/remove decision for a single variable.
//!
//! Planning is pure: given the current value (if any) and the request, decide
//! the value to write or the error to raise. The caller performs the write.
//!
//! An empty value deletes the variable unless appending was asked for
//! explicitly, which is rejected.

use crate::core::tokens::{contains_token, join_token};
use crate::core::types::{DefaultMode, Mode, MutationAction, MutationRequest, PersistedScope};
use crate::error::EnvarError;

/// Value to write and how it was derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationPlan {
    pub action: MutationAction,
    /// `None` removes the variable.
    pub value: Option<String>,
}

/// Reject requests that must never reach the store.
///
/// Returns the persisted scope the request targets.
pub fn validate_request(request: &MutationRequest) -> Result<PersistedScope, EnvarError> {
    let scope = request
        .scope
        .persisted()
        .ok_or_else(|| EnvarError::validation("process scope is read-only"))?;
    if request.name.is_empty() {
        return Err(EnvarError::validation("a variable name must not be empty"));
    }
    if request.name.contains('=') || request.name.contains('\0') {
        return Err(EnvarError::validation(format!(
            "invalid variable name '{}': names must not contain '=' or NUL",
            request.name.escape_debug()
        )));
    }
    if request.value.is_empty() && request.mode == Some(Mode::Append) {
        return Err(EnvarError::validation(
            "an empty value cannot be appended; use -o to delete the variable",
        ));
    }
    if request.value.contains('\0') {
        return Err(EnvarError::validation("a variable value must not contain NUL"));
    }
    Ok(scope)
}

/// Decide what to write for `request` given the `current` stored value.
pub fn plan_mutation(
    current: Option<&str>,
    request: &MutationRequest,
    default_mode: DefaultMode,
) -> Result<MutationPlan, EnvarError> {
    if request.value.is_empty() {
        return match current {
            Some(_) => Ok(MutationPlan {
                action: MutationAction::Removed,
                value: None,
            }),
            None => Err(EnvarError::validation(format!(
                "variable '{}' does not exist; nothing to remove",
                request.name
            ))),
        };
    }

    let Some(current) = current else {
        return Ok(MutationPlan {
            action: MutationAction::Created,
            value: Some(request.value.clone()),
        });
    };

    match default_mode.resolve(request.mode) {
        Some(Mode::Overwrite) => Ok(MutationPlan {
            action: MutationAction::Overwritten,
            value: Some(request.value.clone()),
        }),
        Some(Mode::Append) => {
            if contains_token(current, &request.value) {
                return Err(EnvarError::ValueAlreadyExists {
                    name: request.name.clone(),
                    value: request.value.clone(),
                });
            }
            Ok(MutationPlan {
                action: MutationAction::Appended,
                value: Some(join_token(current, &request.value)),
            })
        }
        None => Err(EnvarError::VariableExists {
            name: request.name.clone(),
        }),
    }
}
