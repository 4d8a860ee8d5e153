//! Command-line interface for pocket-player.
//!
//! This module provides commands for refreshing the library, listing it and
//! playing from it without a UI.

mod commands;

pub use commands::{Cli, Commands, run_command};
