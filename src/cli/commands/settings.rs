//! Effective configuration and audio device listing.

use std::path::Path;

use super::database_path;
use crate::config::{self, Config};
use crate::db;
use crate::player::{current_audio_device, list_audio_devices};

/// Print the config file location, its effective contents and the output
/// devices the audio host reports.
pub fn cmd_config(config: &Config, db: Option<&Path>) -> anyhow::Result<()> {
    match config::config_path() {
        Some(path) if path.exists() => println!("Config file: {}", path.display()),
        Some(path) => println!("Config file: {} (not created yet)", path.display()),
        None => println!("Config file: unavailable on this platform"),
    }
    println!("Database: {}", db::db_url(database_path(config, db)));
    println!();
    println!("{}", toml::to_string_pretty(config)?);

    let default_device = current_audio_device();
    println!("Output devices:");
    for name in list_audio_devices() {
        let marker = if default_device.as_deref() == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("  {}{}", name, marker);
    }
    Ok(())
}
