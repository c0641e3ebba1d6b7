//! CLI surface for warden.

pub mod commands;

pub use commands::Cli;
