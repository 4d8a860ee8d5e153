//! Player state and command types.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::queue::{QueueMode, RepeatMode};
use crate::model::Track;

/// Current playback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Where playback was started from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum PlaySource {
    #[default]
    Library,
    Playlist(String),
    Album(String),
    Artist(String),
}

/// Published player state.
///
/// `current_track` is the sentinel whenever nothing is selected.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerState {
    pub current_track: Track,
    pub queue: Arc<[Track]>,
    /// Index of `current_track` in `queue` (0 when nothing is selected)
    pub current_index: usize,
    pub queue_mode: QueueMode,
    pub source: PlaySource,
    pub status: PlaybackStatus,
    pub position_ms: i64,
    pub repeat_mode: RepeatMode,
}

impl PlayerState {
    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.status == PlaybackStatus::Paused
    }

    /// Format position as MM:SS.
    pub fn position_str(&self) -> String {
        format_duration(Duration::from_millis(self.position_ms.max(0) as u64))
    }

    /// Format duration as MM:SS.
    pub fn duration_str(&self) -> String {
        format_duration(Duration::from_millis(
            self.current_track.duration_ms.max(0) as u64,
        ))
    }
}

/// Format a duration as MM:SS or HH:MM:SS.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}

/// Commands sent to the engine task.
#[derive(Debug, Clone)]
pub enum PlayerCommand {
    /// Start a track, optionally with an explicit queue
    Play {
        track: Track,
        source: PlaySource,
        queue: Option<Vec<Track>>,
    },
    /// Play the queue item at an index
    PlayAt(usize),
    Pause,
    Resume,
    Stop,
    Next,
    Previous,
    /// Seek to a position; only user seeks reach the backend
    Seek { position_ms: i64, from_user: bool },
    /// Replace the queue contents
    UpdateQueue(Vec<Track>),
    SetRepeatMode(RepeatMode),
    /// Stop the backend and end the engine task
    Shutdown,
}
