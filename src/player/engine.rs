//! The playback engine: queue, repeat policy and playback state.
//!
//! One [`PlaybackEngine`] owns one [`MediaBackend`]. All mutation happens on
//! the task running [`PlaybackEngine::run`], which multiplexes backend
//! events, library snapshot swaps, the position tick and user commands.
//! Everything observers see goes through the `watch` channel passed to
//! [`PlaybackEngine::new`].

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use super::backend::{BackendEvent, BackendEventSender, MediaBackend};
use super::queue::{Direction, PlayQueue, QueueMode, RepeatMode};
use super::state::{PlayerCommand, PlaybackStatus, PlaySource, PlayerState};
use crate::model::{LibrarySnapshot, Track};

pub struct PlaybackEngine<B: MediaBackend> {
    backend: B,
    library: Arc<LibrarySnapshot>,
    queue: PlayQueue,
    /// Items last passed to the backend; transition indices refer to these
    loaded: Vec<Track>,
    source: PlaySource,
    repeat: RepeatMode,
    status: PlaybackStatus,
    position_ms: i64,
    /// Bumped on every (re)start so the position tick restarts with it
    generation: u64,
    published: watch::Sender<PlayerState>,
}

impl<B: MediaBackend> PlaybackEngine<B> {
    pub fn new(
        mut backend: B,
        events: BackendEventSender,
        library: Arc<LibrarySnapshot>,
        repeat: RepeatMode,
        published: watch::Sender<PlayerState>,
    ) -> Self {
        backend.attach(events);
        let queue = PlayQueue::library(library.to_list());
        let engine = Self {
            backend,
            library,
            queue,
            loaded: Vec::new(),
            source: PlaySource::Library,
            repeat,
            status: PlaybackStatus::Idle,
            position_ms: 0,
            generation: 0,
            published,
        };
        engine.publish();
        engine
    }

    /// Current state as observers would see it.
    pub fn state(&self) -> PlayerState {
        PlayerState {
            current_track: self.queue.current().cloned().unwrap_or_default(),
            queue: self.queue.shared_items(),
            current_index: self.queue.current_index().unwrap_or(0),
            queue_mode: self.queue.mode(),
            source: self.source.clone(),
            status: self.status,
            position_ms: self.position_ms,
            repeat_mode: self.repeat,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    fn publish(&self) {
        let next = self.state();
        self.published.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Apply one command. Breaks on shutdown.
    pub fn handle_command(&mut self, command: PlayerCommand) -> ControlFlow<()> {
        match command {
            PlayerCommand::Play {
                track,
                source,
                queue,
            } => self.play(track, source, queue),
            PlayerCommand::PlayAt(index) => self.play_at(index),
            PlayerCommand::Pause => self.pause(),
            PlayerCommand::Resume => self.resume(),
            PlayerCommand::Stop => self.stop(),
            PlayerCommand::Next => self.skip(Direction::Forward),
            PlayerCommand::Previous => self.skip(Direction::Backward),
            PlayerCommand::Seek {
                position_ms,
                from_user,
            } => self.seek(position_ms, from_user),
            PlayerCommand::UpdateQueue(tracks) => self.update_queue(tracks),
            PlayerCommand::SetRepeatMode(mode) => {
                self.repeat = mode;
                self.publish();
            }
            PlayerCommand::Shutdown => {
                self.shutdown();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Apply one backend notification.
    pub fn handle_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::PlayingChanged(playing) => self.on_playing_changed(playing),
            BackendEvent::ItemTransitioned(index) => self.on_item_transitioned(index),
            BackendEvent::PlaybackEnded => self.on_playback_ended(),
            BackendEvent::Error(message) => self.on_backend_error(message),
        }
    }

    /// Swap in a new library snapshot.
    ///
    /// A library-mode queue is rebuilt from it; if the current track is gone
    /// playback stops.
    pub fn set_library(&mut self, library: Arc<LibrarySnapshot>) {
        self.library = library;
        if self.queue.mode() != QueueMode::Library {
            return;
        }

        let had_current = self.queue.current().is_some();
        let kept = self
            .queue
            .replace_items(self.library.to_list(), QueueMode::Library);
        if had_current && !kept {
            tracing::info!(target: "player::engine", "Current track left the library, stopping");
            self.halt();
        } else {
            self.publish();
        }
    }

    /// Refresh the published position from the backend. Only while playing.
    pub fn poll_position(&mut self) {
        if self.status != PlaybackStatus::Playing {
            return;
        }
        let backend_duration = self.backend.duration_ms();
        self.position_ms = if backend_duration <= 0 {
            0
        } else {
            let track_duration = self.queue.current().map(|t| t.duration_ms).unwrap_or(0);
            let limit = if track_duration > 0 {
                track_duration
            } else {
                backend_duration
            };
            self.backend.current_position_ms().clamp(0, limit)
        };
        self.publish();
    }

    fn play(&mut self, track: Track, source: PlaySource, queue: Option<Vec<Track>>) {
        if track.is_none() {
            tracing::debug!(target: "player::engine", "Ignoring play of the empty track");
            return;
        }

        self.queue = match queue {
            Some(mut items) => {
                items.retain(|t| !t.is_none());
                if !items.iter().any(|t| t.id == track.id) {
                    items.insert(0, track.clone());
                }
                PlayQueue::explicit(items)
            }
            None if self.library.contains(track.id) => PlayQueue::library(self.library.to_list()),
            None => PlayQueue::explicit(vec![track.clone()]),
        };
        let index = self.queue.position_of(track.id).unwrap_or(0);
        self.queue.jump_to(index);
        self.source = source;
        self.start_current(0);
    }

    fn play_at(&mut self, index: usize) {
        if self.queue.jump_to(index).is_none() {
            tracing::debug!(target: "player::engine", index, "Ignoring play_at on an empty queue");
            return;
        }
        self.start_current(0);
    }

    /// Load the current track into the backend and start it.
    fn start_current(&mut self, start_position_ms: i64) {
        let Some(track) = self.queue.current().cloned() else {
            self.halt();
            return;
        };
        let index = self.queue.current_index().unwrap_or(0);

        // Explicit queues go to the backend whole so it can move gaplessly
        let (items, start_index) =
            if self.queue.mode() == QueueMode::Explicit && self.repeat != RepeatMode::One {
                (self.queue.items().to_vec(), index)
            } else {
                (vec![track.clone()], 0)
            };

        self.backend.set_queue(&items, start_index, start_position_ms);
        self.loaded = items;
        self.backend.play();

        self.status = PlaybackStatus::Playing;
        self.position_ms = start_position_ms;
        self.generation = self.generation.wrapping_add(1);
        tracing::debug!(target: "player::engine", track_id = track.id, index, "Playing track");
        self.publish();
    }

    fn pause(&mut self) {
        if self.status != PlaybackStatus::Playing {
            return;
        }
        self.backend.pause();
        self.position_ms = self.clamp_position(self.backend.current_position_ms());
        self.status = PlaybackStatus::Paused;
        self.publish();
    }

    fn resume(&mut self) {
        match self.status {
            PlaybackStatus::Playing => {}
            PlaybackStatus::Paused => {
                self.backend.play();
                self.status = PlaybackStatus::Playing;
                self.generation = self.generation.wrapping_add(1);
                self.publish();
            }
            PlaybackStatus::Idle if self.queue.current().is_some() => self.start_current(0),
            PlaybackStatus::Idle => {
                tracing::debug!(target: "player::engine", "Nothing to resume");
            }
        }
    }

    /// Stop but keep the current track selected.
    fn stop(&mut self) {
        self.backend.stop();
        self.loaded.clear();
        self.status = PlaybackStatus::Idle;
        self.position_ms = 0;
        self.publish();
    }

    /// Stop and select nothing.
    fn halt(&mut self) {
        self.backend.stop();
        self.loaded.clear();
        self.queue.clear_position();
        self.status = PlaybackStatus::Idle;
        self.position_ms = 0;
        self.publish();
    }

    fn shutdown(&mut self) {
        self.stop();
        tracing::debug!(target: "player::engine", "Engine shut down");
    }

    fn skip(&mut self, direction: Direction) {
        if self.queue.len() <= 1 {
            if self.queue.current().is_some() {
                self.start_current(0);
            }
            return;
        }
        if let Some(index) = self.queue.advance_index(direction) {
            self.queue.jump_to(index);
            self.start_current(0);
        }
    }

    fn seek(&mut self, position_ms: i64, from_user: bool) {
        if self.queue.current().is_none() {
            tracing::debug!(target: "player::engine", "Ignoring seek with no current track");
            return;
        }
        let position_ms = self.clamp_position(position_ms);
        self.position_ms = position_ms;
        if from_user {
            self.backend.seek_to(position_ms);
        }
        self.publish();
    }

    fn update_queue(&mut self, tracks: Vec<Track>) {
        let tracks: Vec<Track> = tracks.into_iter().filter(|t| !t.is_none()).collect();
        let had_current = self.queue.current().is_some();

        if !self.queue.replace_items(tracks, QueueMode::Explicit) {
            tracing::info!(target: "player::engine", "Current track not in the new queue, stopping");
            self.halt();
            return;
        }

        // Keep the backend's loaded list in step with the new queue
        if had_current && self.status != PlaybackStatus::Idle && self.repeat != RepeatMode::One {
            let position_ms = self.clamp_position(self.backend.current_position_ms());
            let index = self.queue.current_index().unwrap_or(0);
            let items = self.queue.items().to_vec();
            self.backend.set_queue(&items, index, position_ms);
            self.loaded = items;
            if self.status == PlaybackStatus::Playing {
                self.backend.play();
            }
            self.position_ms = position_ms;
        }
        self.publish();
    }

    fn on_playing_changed(&mut self, playing: bool) {
        let has_track = self.queue.current().is_some();
        let status = match (playing, has_track) {
            (true, true) => PlaybackStatus::Playing,
            (true, false) => {
                tracing::debug!(target: "player::engine", "Backend playing with no current track");
                return;
            }
            (false, true) if self.status != PlaybackStatus::Idle => PlaybackStatus::Paused,
            (false, _) => PlaybackStatus::Idle,
        };
        if status == self.status {
            return;
        }
        if status != PlaybackStatus::Playing {
            self.position_ms = self.clamp_position(self.backend.current_position_ms());
        }
        self.status = status;
        self.publish();
    }

    fn on_item_transitioned(&mut self, index: usize) {
        // A reload since the event was raised makes it stale
        if self.backend.current_item_index() != Some(index) {
            tracing::debug!(target: "player::engine", index, "Ignoring stale transition");
            return;
        }
        let Some(track) = self.loaded.get(index).cloned() else {
            tracing::debug!(target: "player::engine", index, "Transition to an unknown item");
            return;
        };

        if self.repeat == RepeatMode::One
            && self.queue.current().is_some_and(|current| current.id != track.id)
        {
            self.start_current(0);
            return;
        }

        match self.queue.position_of(track.id) {
            Some(position) => {
                self.queue.jump_to(position);
                self.position_ms = 0;
                tracing::debug!(target: "player::engine", track_id = track.id, index = position, "Backend advanced");
                self.publish();
            }
            None => {
                tracing::debug!(target: "player::engine", track_id = track.id, "Transitioned track is not queued");
            }
        }
    }

    fn on_backend_error(&mut self, message: String) {
        // A failed load clears the backend's item; one still reported means a
        // newer load superseded the failing one
        if self.backend.current_item_index().is_some() {
            tracing::debug!(target: "player::engine", error = %message, "Ignoring stale backend error");
            return;
        }
        tracing::warn!(target: "player::engine", error = %message, "Backend failed, stopping playback");
        self.halt();
    }

    fn on_playback_ended(&mut self) {
        if self.backend.current_item_index().is_some() {
            tracing::debug!(target: "player::engine", "Ignoring stale end of playback");
            return;
        }
        // Ending after a stop is terminal whatever the repeat mode
        if self.queue.current().is_none() || self.status == PlaybackStatus::Idle {
            self.halt();
            return;
        }
        match self.repeat {
            RepeatMode::One => self.start_current(0),
            RepeatMode::All => self.skip(Direction::Forward),
            RepeatMode::Off => {
                tracing::debug!(target: "player::engine", "End of track, stopping");
                self.halt();
            }
        }
    }

    fn clamp_position(&self, position_ms: i64) -> i64 {
        let duration = self.queue.current().map(|t| t.duration_ms).unwrap_or(0);
        if duration > 0 {
            position_ms.clamp(0, duration)
        } else {
            position_ms.max(0)
        }
    }

    /// Run the engine until shutdown or until every command sender is gone.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PlayerCommand>,
        mut events: mpsc::UnboundedReceiver<BackendEvent>,
        mut library: watch::Receiver<Arc<LibrarySnapshot>>,
        poll_every: Duration,
    ) {
        let mut poll: Option<Interval> = None;
        let mut polling_for: Option<u64> = None;
        let mut library_open = true;

        loop {
            // The tick only exists while playing and restarts with each play
            let wanted = self.is_playing().then_some(self.generation);
            if wanted != polling_for {
                poll = wanted.map(|_| {
                    let mut interval = interval_at(Instant::now() + poll_every, poll_every);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    interval
                });
                polling_for = wanted;
            }

            tokio::select! {
                biased;

                Some(event) = events.recv() => self.handle_event(event),

                changed = library.changed(), if library_open => match changed {
                    Ok(()) => {
                        let snapshot = library.borrow_and_update().clone();
                        self.set_library(snapshot);
                    }
                    Err(_) => library_open = false,
                },

                _ = tick(&mut poll) => self.poll_position(),

                command = commands.recv() => {
                    let command = command.unwrap_or(PlayerCommand::Shutdown);
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
            }
        }

        tracing::info!(target: "player::engine", "Playback engine stopped");
    }
}

async fn tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
