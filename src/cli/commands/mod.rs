//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `scan`: Library refresh and listing
//! - `play`: Playback on the local output device
//! - `settings`: Effective configuration and audio devices

mod play;
mod scan;
mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::db;
use crate::library::{LibrarySynchronizer, SqliteLibraryStore};
use crate::player::RepeatMode;
use crate::scanner::FsScanner;

pub use play::cmd_play;
pub use scan::{cmd_list, cmd_scan};
pub use settings::cmd_config;

/// Pocket Player CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Database path (overrides `library.database` in the config file)
    #[arg(long, global = true, env = "POCKET_PLAYER_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Refresh the library from the music directories
    Scan {
        /// Directories to scan (defaults to `library.paths`)
        paths: Vec<PathBuf>,
        /// Keep files below the minimum size
        #[arg(long)]
        no_size_filter: bool,
        /// Keep tracks below the minimum duration
        #[arg(long)]
        no_duration_filter: bool,
    },
    /// List all tracks in the library
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Play the library on the default output device
    Play {
        /// Track to start from (defaults to the first)
        #[arg(long)]
        id: Option<i64>,
        /// Repeat policy (overrides `playback.repeat_mode`)
        #[arg(long, value_enum)]
        repeat: Option<RepeatMode>,
    },
    /// Show the effective configuration
    Config,
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let config = config::load();

    match &cli.command {
        Commands::Scan {
            paths,
            no_size_filter,
            no_duration_filter,
        } => {
            let rt = Runtime::new()?;
            cmd_scan(
                &rt,
                &config,
                cli.db.as_deref(),
                paths,
                *no_size_filter,
                *no_duration_filter,
            )
        }
        Commands::List { json } => {
            let rt = Runtime::new()?;
            cmd_list(&rt, &config, cli.db.as_deref(), *json)
        }
        Commands::Play { id, repeat } => {
            let rt = Runtime::new()?;
            cmd_play(&rt, &config, cli.db.as_deref(), *id, *repeat)
        }
        Commands::Config => cmd_config(&config, cli.db.as_deref()),
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Database path in effect: the flag, then the config file, then the default.
pub(crate) fn database_path<'a>(config: &'a Config, db: Option<&'a Path>) -> Option<&'a Path> {
    db.or(config.library.database.as_deref())
}

/// Open the stored library and load it into a synchronizer scanning `roots`.
pub(crate) async fn open_library(
    config: &Config,
    db: Option<&Path>,
    roots: Vec<PathBuf>,
) -> anyhow::Result<Arc<LibrarySynchronizer>> {
    let url = db::db_url(database_path(config, db));
    let pool = db::init_db(&url)
        .await
        .with_context(|| format!("Failed to open database {}", url))?;
    let store = SqliteLibraryStore::open(pool).await?;
    let scanner = FsScanner::new(roots, config.library.thresholds());

    let library = LibrarySynchronizer::new(
        Arc::new(store),
        Arc::new(scanner),
        config.library.scan_filter(),
    );
    library.hydrate().await?;
    Ok(Arc::new(library))
}
