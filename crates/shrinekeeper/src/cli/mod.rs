//! CLI command implementations, one module per command.

pub mod config;
pub mod event;
pub mod scan;
