//! Inspect and mutate persisted environment variables.
//!
//! Variables live in a persisted store scoped to the current user or to the
//! whole machine, and every running process carries its own snapshot taken at
//! creation. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (scopes, variable sets, the
//!   append/overwrite/create decision). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (store files, `/proc`, the change
//!   broadcast directory). Each sits behind a trait so tests can swap in fakes.
//!
//! Orchestration modules ([`mutate`], [`list`], [`cli`]) coordinate core logic
//! with I/O to implement CLI commands.

pub mod cli;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod list;
pub mod logging;
pub mod mutate;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::EnvarError;
