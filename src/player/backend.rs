//! The media backend seam.
//!
//! The engine drives a [`MediaBackend`] synchronously and learns about
//! asynchronous changes (gapless transitions, end of queue, pause from a
//! headset button) through [`BackendEvent`]s sent on the channel handed over
//! by [`MediaBackend::attach`].

use tokio::sync::mpsc;

use crate::model::Track;

/// Asynchronous notifications from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The backend moved to another item of the list last passed to
    /// [`MediaBackend::set_queue`]
    ItemTransitioned(usize),
    /// The last loaded item finished
    PlaybackEnded,
    /// The backend started or stopped producing audio
    PlayingChanged(bool),
    /// Decode or output failure
    Error(String),
}

/// Sending half handed to the backend.
pub type BackendEventSender = mpsc::UnboundedSender<BackendEvent>;

/// Audio decode and output engine.
///
/// Calls return immediately; the effect is confirmed through events.
pub trait MediaBackend: Send {
    /// Install the event channel. Called once before any other method.
    fn attach(&mut self, events: BackendEventSender);

    /// Replace the loaded items and prepare `start_index` at
    /// `start_position_ms`. Does not start playback.
    fn set_queue(&mut self, items: &[Track], start_index: usize, start_position_ms: i64);

    fn play(&mut self);

    fn pause(&mut self);

    /// Stop and unload.
    fn stop(&mut self);

    fn seek_to(&mut self, position_ms: i64);

    fn current_position_ms(&self) -> i64;

    /// Index into the last loaded items, if any is active.
    fn current_item_index(&self) -> Option<usize>;

    /// Duration of the active item; 0 or negative when unknown.
    fn duration_ms(&self) -> i64;
}
