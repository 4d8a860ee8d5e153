//! Core data models for the music library.
//!
//! Defines [`Track`], the immutable description of one playable item, and
//! [`LibrarySnapshot`], the synchronizer's view of every known track.
//!
//! # Database Schema
//!
//! [`Track`] maps onto the `tracks` table, keyed by the device-stable id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A playable audio item and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct Track {
    /// Device-stable identity, unique within a library snapshot
    pub id: i64,
    /// Track title (from tags or filename)
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Duration in milliseconds
    pub duration_ms: i64,
    /// Opaque album art locator (empty when unknown)
    pub album_art_ref: String,
    /// Opaque playable-source locator
    pub audio_ref: String,
}

impl Track {
    /// Id reserved for the "no track" sentinel.
    pub const NONE_ID: i64 = -1;

    /// The sentinel track. Never part of a library.
    pub fn none() -> Self {
        Self {
            id: Self::NONE_ID,
            title: String::new(),
            artist: String::new(),
            duration_ms: 0,
            album_art_ref: String::new(),
            audio_ref: String::new(),
        }
    }

    /// Whether this is the sentinel.
    pub fn is_none(&self) -> bool {
        self.id == Self::NONE_ID
    }
}

impl Default for Track {
    fn default() -> Self {
        Self::none()
    }
}

/// All known tracks keyed by id.
///
/// Iteration is ordered by id; that order is the "full library list" used
/// when stepping through the library with next/previous.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibrarySnapshot {
    tracks: BTreeMap<i64, Track>,
}

impl LibrarySnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from tracks. The sentinel is skipped and the first
    /// occurrence of a duplicate id wins.
    pub fn from_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let mut map = BTreeMap::new();
        for track in tracks.into_iter().filter(|t| !t.is_none()) {
            map.entry(track.id).or_insert(track);
        }
        Self { tracks: map }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// Iterate tracks in library order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Iterate ids in library order.
    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.tracks.keys().copied()
    }

    /// The full library list.
    pub fn to_list(&self) -> Vec<Track> {
        self.tracks.values().cloned().collect()
    }

    /// Position of `id` in the full library list.
    pub fn position_of(&self, id: i64) -> Option<usize> {
        self.tracks.keys().position(|&k| k == id)
    }

    /// A new snapshot with `to_delete` removed and `to_insert` added.
    pub fn with_changes(&self, to_insert: &[Track], to_delete: &[Track]) -> Self {
        let mut tracks = self.tracks.clone();
        for track in to_delete {
            tracks.remove(&track.id);
        }
        for track in to_insert.iter().filter(|t| !t.is_none()) {
            tracks.entry(track.id).or_insert_with(|| track.clone());
        }
        Self { tracks }
    }
}
