//! Pocket Player - playback engine and library synchronizer for a local
//! music collection.
//!
//! The [`player`] module owns the play queue, repeat policy and playback
//! state, driving a [`player::MediaBackend`]. The [`library`] module keeps
//! the stored library in step with what a [`scanner::DeviceScanner`] finds.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod model;
pub mod player;
pub mod scanner;
pub mod streams;
#[cfg(test)]
pub mod test_utils;

pub use error::{Error, Result};
