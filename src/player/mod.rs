//! Playback engine, its handle and the native audio backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Player (handle, any task)                   │
//! │        sends commands, exposes watch-backed state streams       │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ tokio mpsc
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   PlaybackEngine (one tokio task)               │
//! │   queue, repeat policy, status, position tick, library swaps    │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ MediaBackend calls / BackendEvents
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │             NativeBackend (decoder thread + cpal)               │
//! │          symphonia decode, rubato resample, device out          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod backend;
mod decoder;
mod engine;
mod native;
mod queue;
mod resampler;
mod state;

pub use backend::{BackendEvent, BackendEventSender, MediaBackend};
pub use decoder::AudioDecoder;
pub use engine::PlaybackEngine;
pub use native::{NativeBackend, current_audio_device, list_audio_devices};
pub use queue::{Direction, PlayQueue, QueueMode, RepeatMode, next_index, previous_index};
pub use resampler::AudioResampler;
pub use state::{PlaySource, PlaybackStatus, PlayerCommand, PlayerState, format_duration};

use std::sync::Arc;

use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::PlaybackConfig;
use crate::library::{LibrarySynchronizer, SyncReport};
use crate::model::Track;
use crate::streams::{distinct, watch_stream};

/// Handle to a running playback engine.
///
/// Commands return as soon as they are queued; published state catches up
/// once the engine has processed them. Dropping every handle shuts the
/// engine down.
pub struct Player {
    commands: mpsc::UnboundedSender<PlayerCommand>,
    state: watch::Receiver<PlayerState>,
    library: Arc<LibrarySynchronizer>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    /// Start an engine driving `backend` on the current tokio runtime.
    pub fn spawn<B>(
        backend: B,
        library: Arc<LibrarySynchronizer>,
        config: &PlaybackConfig,
    ) -> Self
    where
        B: MediaBackend + 'static,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (published, state) = watch::channel(PlayerState::default());

        let mut snapshots = library.subscribe();
        let snapshot = snapshots.borrow_and_update().clone();

        let engine = PlaybackEngine::new(backend, events, snapshot, config.repeat_mode, published);
        let task = tokio::spawn(engine.run(
            command_rx,
            event_rx,
            snapshots,
            config.poll_interval(),
        ));

        tracing::debug!(target: "player", "Playback engine started");
        Self {
            commands,
            state,
            library,
            task: Mutex::new(Some(task)),
        }
    }

    fn send(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        self.commands
            .send(command)
            .map_err(|_| PlayerError::ChannelClosed)
    }

    /// Play `track`. Without a queue the library is stepped through.
    pub fn play(
        &self,
        track: Track,
        source: PlaySource,
        queue: Option<Vec<Track>>,
    ) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Play {
            track,
            source,
            queue,
        })
    }

    /// Play the queue item at `index` (clamped).
    pub fn play_at(&self, index: usize) -> Result<(), PlayerError> {
        self.send(PlayerCommand::PlayAt(index))
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Pause)
    }

    pub fn resume(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Resume)
    }

    pub fn stop(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Stop)
    }

    pub fn next(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Next)
    }

    pub fn previous(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Previous)
    }

    /// Seek within the current track. Only user seeks move the backend.
    pub fn seek(&self, position_ms: i64, from_user: bool) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Seek {
            position_ms,
            from_user,
        })
    }

    /// Replace the queue contents.
    pub fn update_queue(&self, tracks: Vec<Track>) -> Result<(), PlayerError> {
        self.send(PlayerCommand::UpdateQueue(tracks))
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SetRepeatMode(mode))
    }

    /// Run one library synchronization pass.
    ///
    /// The engine sees the result through the snapshot stream.
    pub async fn refresh_library(&self) -> crate::Result<SyncReport> {
        self.library.refresh().await
    }

    /// Get current playback state snapshot.
    pub fn state(&self) -> PlayerState {
        self.state.borrow().clone()
    }

    /// Receiver for every published state.
    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.state.clone()
    }

    /// Stream of whole states, starting with the current one.
    pub fn states(&self) -> BoxStream<'static, PlayerState> {
        watch_stream(self.state.clone())
    }

    pub fn current_track(&self) -> BoxStream<'static, Track> {
        distinct(self.state.clone(), |s| s.current_track.clone())
    }

    pub fn queue(&self) -> BoxStream<'static, Arc<[Track]>> {
        distinct(self.state.clone(), |s| Arc::clone(&s.queue))
    }

    pub fn current_index(&self) -> BoxStream<'static, usize> {
        distinct(self.state.clone(), |s| s.current_index)
    }

    pub fn is_playing(&self) -> BoxStream<'static, bool> {
        distinct(self.state.clone(), PlayerState::is_playing)
    }

    pub fn is_paused(&self) -> BoxStream<'static, bool> {
        distinct(self.state.clone(), PlayerState::is_paused)
    }

    pub fn position_ms(&self) -> BoxStream<'static, i64> {
        distinct(self.state.clone(), |s| s.position_ms)
    }

    /// Stop playback and wait for the engine task to finish.
    pub async fn shutdown(&self) {
        let _ = self.send(PlayerCommand::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(target: "player", error = %e, "Engine task ended abnormally");
            }
        }
    }
}

/// Player errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayerError {
    #[error("Audio output initialization failed: {0}")]
    AudioInit(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Audio channel closed")]
    ChannelClosed,

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}
