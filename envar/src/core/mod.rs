//! Deterministic, pure logic shared by envar commands.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod mutation;
pub mod tokens;
pub mod types;
pub mod variable_set;
