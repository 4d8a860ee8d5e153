//! Library persistence and synchronization.
//!
//! [`LibraryStore`] is the durable record of known tracks.
//! [`sync::LibrarySynchronizer`] reconciles it with a device scan.

pub mod sync;

use async_trait::async_trait;
use futures::stream::BoxStream;
use sqlx::SqlitePool;
use tokio::sync::watch;

use crate::db;
use crate::error::{Result, ResultExt};
use crate::model::Track;
use crate::streams::watch_stream;

pub use sync::{LibrarySynchronizer, SyncDiff, SyncReport, synchronize};

/// Durable collection of tracks.
///
/// Inserting an existing id never updates the stored record.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Add tracks. Ids already present are left untouched.
    async fn insert(&self, tracks: &[Track]) -> Result<()>;

    /// Remove tracks by id. Unknown ids are ignored.
    async fn delete(&self, tracks: &[Track]) -> Result<()>;

    /// Every stored track.
    async fn load_all(&self) -> Result<Vec<Track>>;

    /// Apply one synchronization diff. Stores that can should make this
    /// atomic.
    async fn apply(&self, to_insert: &[Track], to_delete: &[Track]) -> Result<()> {
        self.insert(to_insert).await?;
        self.delete(to_delete).await
    }

    /// Stream the full track list, now and after every change.
    fn observe_all(&self) -> BoxStream<'static, Vec<Track>>;
}

/// SQLite-backed [`LibraryStore`].
pub struct SqliteLibraryStore {
    pool: SqlitePool,
    changes: watch::Sender<Vec<Track>>,
}

impl SqliteLibraryStore {
    /// Wrap an initialized pool and load the current contents.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        let tracks = db::get_all_tracks(&pool)
            .await
            .with_context("loading library")?;
        let (changes, _) = watch::channel(tracks);
        Ok(Self { pool, changes })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn republish(&self) -> Result<()> {
        let tracks = db::get_all_tracks(&self.pool).await?;
        self.changes.send_replace(tracks);
        Ok(())
    }
}

#[async_trait]
impl LibraryStore for SqliteLibraryStore {
    async fn insert(&self, tracks: &[Track]) -> Result<()> {
        if tracks.is_empty() {
            return Ok(());
        }
        db::insert_tracks(&self.pool, tracks)
            .await
            .with_context("inserting tracks")?;
        self.republish().await
    }

    async fn delete(&self, tracks: &[Track]) -> Result<()> {
        if tracks.is_empty() {
            return Ok(());
        }
        db::delete_tracks(&self.pool, tracks)
            .await
            .with_context("deleting tracks")?;
        self.republish().await
    }

    async fn load_all(&self) -> Result<Vec<Track>> {
        Ok(db::get_all_tracks(&self.pool).await?)
    }

    async fn apply(&self, to_insert: &[Track], to_delete: &[Track]) -> Result<()> {
        if to_insert.is_empty() && to_delete.is_empty() {
            return Ok(());
        }
        let (inserted, deleted) = db::apply_changes(&self.pool, to_insert, to_delete)
            .await
            .with_context("applying library changes")?;
        tracing::debug!(target: "library", inserted, deleted, "Library changes committed");
        self.republish().await
    }

    fn observe_all(&self) -> BoxStream<'static, Vec<Track>> {
        watch_stream(self.changes.subscribe())
    }
}
