//! Test utilities and fixtures for pocket-player tests.
//!
//! This module provides track factories, a temporary database and
//! in-memory stand-ins for the backend, library store and device scanner.
//!
//! # Example
//!
//! ```ignore
//! use pocket_player::test_utils::{temp_db, mock_tracks};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (pool, _dir) = temp_db().await;
//!     db::insert_tracks(&pool, &mock_tracks(&[1, 2])).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::library::LibraryStore;
use crate::model::Track;
use crate::player::{BackendEvent, BackendEventSender, MediaBackend};
use crate::scanner::{DeviceScanner, ScanError, ScanFilter, ScanThresholds};
use crate::streams::watch_stream;

/// Creates a temporary database for testing.
///
/// Keep the returned `TempDir` alive for the duration of the test; the
/// database is deleted when it drops.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = format!("sqlite:{}", db_path.display());

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// Creates a mock track with the given id and sensible defaults.
///
/// Customize with struct update syntax:
///
/// ```ignore
/// let short = Track { duration_ms: 5_000, ..mock_track(1) };
/// ```
pub fn mock_track(id: i64) -> Track {
    Track {
        id,
        title: format!("Track {}", id),
        artist: "Test Artist".to_string(),
        duration_ms: 180_000,
        album_art_ref: String::new(),
        audio_ref: format!("/music/{}.mp3", id),
    }
}

/// Creates one mock track per id, in order.
pub fn mock_tracks(ids: &[i64]) -> Vec<Track> {
    ids.iter().copied().map(mock_track).collect()
}

/// Write a mono 16-bit PCM WAV file holding a quiet sine.
pub fn write_wav(path: &std::path::Path, sample_rate: u32, frames: usize) {
    let data_len = (frames * 2) as u32;
    let mut bytes = Vec::with_capacity(44 + frames * 2);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let sample = ((i as f32 * 0.05).sin() * 8_000.0) as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    std::fs::write(path, bytes).expect("Failed to write WAV fixture");
}

// ============================================================================
// Mock backend
// ============================================================================

/// A backend call recorded by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    SetQueue {
        ids: Vec<i64>,
        start_index: usize,
        start_position_ms: i64,
    },
    Play,
    Pause,
    Stop,
    SeekTo(i64),
}

#[derive(Debug, Default)]
pub struct MockBackendState {
    pub calls: Vec<BackendCall>,
    pub items: Vec<Track>,
    pub index: Option<usize>,
    pub position_ms: i64,
    pub duration_override: Option<i64>,
    pub playing: bool,
    pub events: Option<BackendEventSender>,
}

/// Records calls and reports whatever position/duration the test sets.
///
/// Clones share state, so a test can keep one handle while the engine owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockBackendState>>,
}

impl MockBackend {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn set_position(&self, position_ms: i64) {
        self.state.lock().position_ms = position_ms;
    }

    /// Override the reported duration; `None` reports the loaded track's.
    pub fn set_duration(&self, duration_ms: Option<i64>) {
        self.state.lock().duration_override = duration_ms;
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    /// Ids of the items last loaded.
    pub fn loaded_ids(&self) -> Vec<i64> {
        self.state.lock().items.iter().map(|t| t.id).collect()
    }

    /// Move to `index` the way a backend does when one item runs into the next.
    pub fn advance_to(&self, index: usize) {
        let mut state = self.state.lock();
        state.index = Some(index);
        state.position_ms = 0;
    }

    /// Run off the end of the loaded items.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.index = None;
        state.playing = false;
    }

    /// Send an event as if the backend raised it, updating the reported
    /// item first for transitions, endings and failures.
    pub fn emit(&self, event: BackendEvent) {
        match event {
            BackendEvent::ItemTransitioned(index) => self.advance_to(index),
            BackendEvent::PlaybackEnded | BackendEvent::Error(_) => self.finish(),
            _ => {}
        }
        if let Some(events) = &self.state.lock().events {
            let _ = events.send(event);
        }
    }
}

impl MediaBackend for MockBackend {
    fn attach(&mut self, events: BackendEventSender) {
        self.state.lock().events = Some(events);
    }

    fn set_queue(&mut self, items: &[Track], start_index: usize, start_position_ms: i64) {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::SetQueue {
            ids: items.iter().map(|t| t.id).collect(),
            start_index,
            start_position_ms,
        });
        state.items = items.to_vec();
        state.index = (!items.is_empty()).then_some(start_index);
        state.position_ms = start_position_ms;
        state.playing = false;
    }

    fn play(&mut self) {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Play);
        state.playing = state.index.is_some();
    }

    fn pause(&mut self) {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Pause);
        state.playing = false;
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Stop);
        state.items.clear();
        state.index = None;
        state.position_ms = 0;
        state.playing = false;
    }

    fn seek_to(&mut self, position_ms: i64) {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::SeekTo(position_ms));
        state.position_ms = position_ms;
    }

    fn current_position_ms(&self) -> i64 {
        self.state.lock().position_ms
    }

    fn current_item_index(&self) -> Option<usize> {
        self.state.lock().index
    }

    fn duration_ms(&self) -> i64 {
        let state = self.state.lock();
        state.duration_override.unwrap_or_else(|| {
            state
                .index
                .and_then(|i| state.items.get(i))
                .map(|t| t.duration_ms)
                .unwrap_or(0)
        })
    }
}

// ============================================================================
// Mock store and scanner
// ============================================================================

#[derive(Debug)]
struct MockStoreInner {
    tracks: Vec<Track>,
    fail: bool,
    apply_calls: usize,
}

/// In-memory [`LibraryStore`] that can be told to fail.
#[derive(Clone)]
pub struct MockStore {
    inner: Arc<Mutex<MockStoreInner>>,
    changes: Arc<watch::Sender<Vec<Track>>>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::with_tracks(Vec::new())
    }
}

impl MockStore {
    pub fn with_tracks(tracks: Vec<Track>) -> Self {
        let (changes, _) = watch::channel(tracks.clone());
        Self {
            inner: Arc::new(Mutex::new(MockStoreInner {
                tracks,
                fail: false,
                apply_calls: 0,
            })),
            changes: Arc::new(changes),
        }
    }

    /// Make every later call fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.inner.lock().fail = fail;
    }

    /// Stored tracks ordered by id.
    pub fn tracks(&self) -> Vec<Track> {
        let mut tracks = self.inner.lock().tracks.clone();
        tracks.sort_by_key(|t| t.id);
        tracks
    }

    pub fn apply_calls(&self) -> usize {
        self.inner.lock().apply_calls
    }

    fn check(&self) -> Result<()> {
        if self.inner.lock().fail {
            Err(Error::store("mock store failure"))
        } else {
            Ok(())
        }
    }

    fn publish(&self) {
        self.changes.send_replace(self.tracks());
    }
}

#[async_trait]
impl LibraryStore for MockStore {
    async fn insert(&self, tracks: &[Track]) -> Result<()> {
        self.check()?;
        {
            let mut inner = self.inner.lock();
            for track in tracks {
                if !inner.tracks.iter().any(|t| t.id == track.id) {
                    inner.tracks.push(track.clone());
                }
            }
        }
        self.publish();
        Ok(())
    }

    async fn delete(&self, tracks: &[Track]) -> Result<()> {
        self.check()?;
        self.inner
            .lock()
            .tracks
            .retain(|t| !tracks.iter().any(|d| d.id == t.id));
        self.publish();
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Track>> {
        self.check()?;
        Ok(self.tracks())
    }

    async fn apply(&self, to_insert: &[Track], to_delete: &[Track]) -> Result<()> {
        self.check()?;
        self.inner.lock().apply_calls += 1;
        self.insert(to_insert).await?;
        self.delete(to_delete).await
    }

    fn observe_all(&self) -> BoxStream<'static, Vec<Track>> {
        watch_stream(self.changes.subscribe())
    }
}

#[derive(Debug, Default)]
struct MockScannerInner {
    files: Vec<(Track, u64)>,
    fail: bool,
}

/// Scanner over an in-memory file list, honouring [`ScanFilter`] with the
/// default thresholds.
#[derive(Debug, Clone, Default)]
pub struct MockScanner {
    inner: Arc<Mutex<MockScannerInner>>,
}

impl MockScanner {
    /// Scanner whose files all pass the size gate.
    pub fn with_tracks(tracks: Vec<Track>) -> Self {
        let scanner = Self::default();
        for track in tracks {
            scanner.add_file(track, 4 * 1024 * 1024);
        }
        scanner
    }

    pub fn add_file(&self, track: Track, size_bytes: u64) {
        self.inner.lock().files.push((track, size_bytes));
    }

    pub fn set_fail(&self, fail: bool) {
        self.inner.lock().fail = fail;
    }
}

#[async_trait]
impl DeviceScanner for MockScanner {
    async fn scan(&self, filter: ScanFilter) -> std::result::Result<Vec<Track>, ScanError> {
        let inner = self.inner.lock();
        if inner.fail {
            return Err(ScanError::Unavailable("mock scanner failure".to_string()));
        }
        let thresholds = ScanThresholds::default();
        Ok(inner
            .files
            .iter()
            .filter(|(track, size)| filter.accepts(&thresholds, *size, track.duration_ms))
            .map(|(track, _)| track.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;

        let tracks = crate::db::get_all_tracks(&pool).await.unwrap();
        assert!(tracks.is_empty());
    }

    #[test]
    fn test_mock_track_defaults() {
        let track = mock_track(42);
        assert_eq!(track.id, 42);
        assert_eq!(track.title, "Track 42");
        assert_eq!(track.duration_ms, 180_000);
        assert!(!track.audio_ref.is_empty());
    }

    #[tokio::test]
    async fn test_mock_scanner_applies_filter() {
        let scanner = MockScanner::default();
        scanner.add_file(mock_track(1), 10);
        scanner.add_file(
            Track {
                duration_ms: 1_000,
                ..mock_track(2)
            },
            10 * 1024 * 1024,
        );
        scanner.add_file(mock_track(3), 10 * 1024 * 1024);

        let ids = |tracks: Vec<Track>| tracks.into_iter().map(|t| t.id).collect::<Vec<_>>();
        assert_eq!(ids(scanner.scan(ScanFilter::ALL).await.unwrap()), vec![3]);
        assert_eq!(ids(scanner.scan(ScanFilter::NONE).await.unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn test_mock_backend_reports_loaded_duration() {
        let mut backend = MockBackend::default();
        assert_eq!(backend.duration_ms(), 0);

        backend.set_queue(&mock_tracks(&[1, 2]), 1, 500);
        backend.play();
        assert!(backend.is_playing());
        assert_eq!(backend.loaded_ids(), vec![1, 2]);
        assert_eq!(backend.current_item_index(), Some(1));
        assert_eq!(backend.current_position_ms(), 500);
        assert_eq!(backend.duration_ms(), 180_000);
    }
}
