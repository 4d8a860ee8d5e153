//! Database module for library track persistence.
//!
//! Uses SQLx with SQLite for lightweight, embedded database storage.
//! Provides async operations for:
//! - Batch inserts and deletes of tracks
//! - Transactional application of a synchronization diff
//! - Loading the whole library
//!
//! # Example
//!
//! ```ignore
//! use pocket_player::db::{init_db, get_all_tracks};
//!
//! let pool = init_db("sqlite:pocket_player.db").await?;
//! let tracks = get_all_tracks(&pool).await?;
//! ```

use crate::model::Track;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "pocket_player.db";

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, establishes a connection
/// pool with up to 5 connections, and runs all pending migrations.
///
/// # Errors
///
/// Returns an error if:
/// - Database creation fails
/// - Connection cannot be established
/// - Migration fails
pub async fn init_db(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
        Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

async fn insert_in(tx: &mut Transaction<'_, Sqlite>, tracks: &[Track]) -> sqlx::Result<u64> {
    let mut inserted = 0;
    for track in tracks {
        // Existing rows are never updated in place
        let result = sqlx::query(
            r#"
            INSERT INTO tracks (id, title, artist, duration_ms, album_art_ref, audio_ref)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(track.id)
        .bind(&track.title)
        .bind(&track.artist)
        .bind(track.duration_ms)
        .bind(&track.album_art_ref)
        .bind(&track.audio_ref)
        .execute(&mut **tx)
        .await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

async fn delete_in(tx: &mut Transaction<'_, Sqlite>, tracks: &[Track]) -> sqlx::Result<u64> {
    let mut deleted = 0;
    for track in tracks {
        let result = sqlx::query("DELETE FROM tracks WHERE id = ?")
            .bind(track.id)
            .execute(&mut **tx)
            .await?;
        deleted += result.rows_affected();
    }
    Ok(deleted)
}

/// Insert tracks, skipping ids that already exist.
///
/// Returns the number of rows actually inserted.
pub async fn insert_tracks(pool: &SqlitePool, tracks: &[Track]) -> sqlx::Result<u64> {
    let mut tx = pool.begin().await?;
    let inserted = insert_in(&mut tx, tracks).await?;
    tx.commit().await?;
    Ok(inserted)
}

/// Delete tracks by id. Unknown ids are ignored.
pub async fn delete_tracks(pool: &SqlitePool, tracks: &[Track]) -> sqlx::Result<u64> {
    let mut tx = pool.begin().await?;
    let deleted = delete_in(&mut tx, tracks).await?;
    tx.commit().await?;
    Ok(deleted)
}

/// Insert then delete in a single transaction.
///
/// Either both batches land or neither does.
pub async fn apply_changes(
    pool: &SqlitePool,
    to_insert: &[Track],
    to_delete: &[Track],
) -> sqlx::Result<(u64, u64)> {
    let mut tx = pool.begin().await?;
    let inserted = insert_in(&mut tx, to_insert).await?;
    let deleted = delete_in(&mut tx, to_delete).await?;
    tx.commit().await?;
    Ok((inserted, deleted))
}

/// Get all tracks, ordered by id.
pub async fn get_all_tracks(pool: &SqlitePool) -> sqlx::Result<Vec<Track>> {
    sqlx::query_as::<_, Track>(
        "SELECT id, title, artist, duration_ms, album_art_ref, audio_ref FROM tracks ORDER BY id",
    )
    .fetch_all(pool)
    .await
}
