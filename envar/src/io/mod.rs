//! I/O adapters for envar commands.

pub mod broadcast;
pub mod config;
pub mod process;
pub mod store;
