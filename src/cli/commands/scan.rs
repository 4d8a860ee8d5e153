//! Library refresh and listing commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::info;

use super::open_library;
use crate::config::Config;
use crate::player::format_duration;

/// Refresh the library once and print what changed.
pub fn cmd_scan(
    rt: &Runtime,
    config: &Config,
    db: Option<&Path>,
    paths: &[PathBuf],
    no_size_filter: bool,
    no_duration_filter: bool,
) -> anyhow::Result<()> {
    let roots = if paths.is_empty() {
        config.library.paths.clone()
    } else {
        paths.to_vec()
    };
    if roots.is_empty() {
        anyhow::bail!("No music directories given; pass paths or set library.paths in the config file");
    }

    rt.block_on(async {
        let library = open_library(config, db, roots.clone()).await?;

        let mut filter = library.filter();
        filter.min_size &= !no_size_filter;
        filter.min_duration &= !no_duration_filter;
        library.set_filter(filter);

        for root in &roots {
            println!("Scanning directory: {}", root.display());
        }
        let report = library.refresh().await?;
        info!(
            target: "library::sync",
            inserted = report.inserted,
            deleted = report.deleted,
            total = report.total,
            "Scan finished"
        );
        println!(
            "Scan complete: {} added, {} removed, {} tracks in library.",
            report.inserted, report.deleted, report.total
        );
        Ok(())
    })
}

/// List all tracks in the library
pub fn cmd_list(
    rt: &Runtime,
    config: &Config,
    db: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = open_library(config, db, Vec::new()).await?;
        let tracks = library.snapshot().to_list();

        if json {
            println!("{}", serde_json::to_string_pretty(&tracks)?);
            return Ok(());
        }

        for track in &tracks {
            println!(
                "{:>20}  {} - {} ({})",
                track.id,
                track.artist,
                track.title,
                format_duration(Duration::from_millis(track.duration_ms.max(0) as u64))
            );
        }
        println!("{} tracks", tracks.len());
        Ok(())
    })
}
