//! Play queue management.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::Track;

/// Repeat mode for end-of-track transitions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Replay the current track
    One,
    /// Advance and wrap around
    All,
    /// Stop after the current track
    #[default]
    Off,
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RepeatMode::One => "one",
            RepeatMode::All => "all",
            RepeatMode::Off => "off",
        };
        f.write_str(name)
    }
}

/// Where the queue contents came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum QueueMode {
    /// Derived from the library snapshot, rebuilt when it changes
    #[default]
    Library,
    /// Supplied by the caller
    Explicit,
}

/// Direction for index advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Index after `current` going forward, wrapping from the last index to 0.
pub fn next_index(len: usize, current: usize) -> usize {
    if len == 0 || current + 1 >= len {
        0
    } else {
        current + 1
    }
}

/// Index before `current`, wrapping from 0 to the last index.
///
/// An out-of-range `current` is treated as 0.
pub fn previous_index(len: usize, current: usize) -> usize {
    if len == 0 {
        return 0;
    }
    if current == 0 || current >= len {
        len - 1
    } else {
        current - 1
    }
}

/// The play queue with current position tracking.
///
/// While a position is set it always points at a valid item.
#[derive(Debug, Clone, Default)]
pub struct PlayQueue {
    items: Arc<[Track]>,
    position: Option<usize>,
    mode: QueueMode,
}

impl PlayQueue {
    /// Create an empty library-mode queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue over the full library list, nothing selected.
    pub fn library(items: Vec<Track>) -> Self {
        Self {
            items: items.into(),
            position: None,
            mode: QueueMode::Library,
        }
    }

    /// Caller-supplied queue, nothing selected.
    pub fn explicit(items: Vec<Track>) -> Self {
        Self {
            items: items.into(),
            position: None,
            mode: QueueMode::Explicit,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    /// Get all items in the queue.
    pub fn items(&self) -> &[Track] {
        &self.items
    }

    /// Shared handle to the items, for publishing.
    pub fn shared_items(&self) -> Arc<[Track]> {
        Arc::clone(&self.items)
    }

    /// Get current position.
    pub fn current_index(&self) -> Option<usize> {
        self.position
    }

    /// Get current item.
    pub fn current(&self) -> Option<&Track> {
        self.position.and_then(|i| self.items.get(i))
    }

    /// Index of the first item with `id`.
    pub fn position_of(&self, id: i64) -> Option<usize> {
        self.items.iter().position(|t| t.id == id)
    }

    /// Select `index`, clamped to the last item. Returns the selected track.
    pub fn jump_to(&mut self, index: usize) -> Option<&Track> {
        if self.items.is_empty() {
            self.position = None;
            return None;
        }
        let index = index.min(self.items.len() - 1);
        self.position = Some(index);
        self.items.get(index)
    }

    /// Drop the selection, keeping the items.
    pub fn clear_position(&mut self) {
        self.position = None;
    }

    /// Index that `direction` leads to from the current item.
    ///
    /// With no current item the search starts from index 0.
    pub fn advance_index(&self, direction: Direction) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        let current = self.position.unwrap_or(0);
        Some(match direction {
            Direction::Forward => next_index(self.items.len(), current),
            Direction::Backward => previous_index(self.items.len(), current),
        })
    }

    /// Replace the items and re-resolve the current item by id.
    ///
    /// Returns `false` if a current item existed and is gone; the selection
    /// is cleared in that case.
    pub fn replace_items(&mut self, items: Vec<Track>, mode: QueueMode) -> bool {
        let current_id = self.current().map(|t| t.id);
        self.items = items.into();
        self.mode = mode;
        match current_id {
            Some(id) => {
                self.position = self.position_of(id);
                self.position.is_some()
            }
            None => {
                self.position = None;
                true
            }
        }
    }
}
