//! Playback on the local output device.

use std::io::Write;
use std::path::Path;

use anyhow::anyhow;
use tokio::runtime::Runtime;
use tracing::debug;

use super::open_library;
use crate::config::Config;
use crate::player::{NativeBackend, PlaySource, Player, PlayerState, RepeatMode};

/// Play the library from `id` (or the first track) until it ends or Ctrl-C.
pub fn cmd_play(
    rt: &Runtime,
    config: &Config,
    db: Option<&Path>,
    id: Option<i64>,
    repeat: Option<RepeatMode>,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = open_library(config, db, config.library.paths.clone()).await?;
        let snapshot = library.snapshot();
        let track = match id {
            Some(id) => snapshot
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow!("No track with id {} in the library", id))?,
            None => snapshot
                .tracks()
                .next()
                .cloned()
                .ok_or_else(|| anyhow!("Library is empty; run `pocket-player scan` first"))?,
        };

        let backend = NativeBackend::new(&config.audio)?;
        let mut playback = config.playback.clone();
        if let Some(mode) = repeat {
            playback.repeat_mode = mode;
        }
        let player = Player::spawn(backend, library, &playback);
        player.play(track, PlaySource::Library, None)?;
        println!("Press Ctrl+C to stop.");

        let mut states = player.subscribe();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut shown: Option<i64> = None;

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    println!();
                    break;
                }
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = states.borrow_and_update().clone();
                    if report(&state, &mut shown) {
                        println!("\nPlayback finished.");
                        break;
                    }
                }
            }
        }

        player.shutdown().await;
        debug!(target: "player", "Play command finished");
        Ok(())
    })
}

/// Print a state change. Returns true once a started session has ended.
fn report(state: &PlayerState, shown: &mut Option<i64>) -> bool {
    if state.current_track.is_none() {
        return shown.is_some();
    }

    if *shown != Some(state.current_track.id) {
        *shown = Some(state.current_track.id);
        println!(
            "\n[{}/{}] {} - {}",
            state.current_index + 1,
            state.queue.len(),
            state.current_track.artist,
            state.current_track.title
        );
    }
    let marker = if state.is_paused() { " (paused)" } else { "" };
    print!(
        "\r{} / {}{}    ",
        state.position_str(),
        state.duration_str(),
        marker
    );
    let _ = std::io::stdout().flush();
    false
}
