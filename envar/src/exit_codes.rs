//! Exit codes for envar CLI commands.
//!
//! Only success and failure are distinguished; the error message printed to
//! stderr carries the detail.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed (validation, store, process or broadcast error).
pub const FAILURE: i32 = 1;
