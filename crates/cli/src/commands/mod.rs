//! Subcommand handlers. Each one owns its output formatting.

pub mod check;
pub mod export_types;
pub mod init;
pub mod simulate;
