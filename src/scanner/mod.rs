//! Device scanning: one-shot queries for the playable tracks on the device.
//!
//! A [`DeviceScanner`] returns every track that passes the active
//! [`ScanFilter`] gates. [`FsScanner`] walks configured music directories,
//! reads tags with lofty and derives a device-stable id from each path.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::model::Track;

/// Supported audio extensions (lowercase).
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "wav", "m4a"];

/// Sidecar cover art names checked next to each audio file.
const COVER_FILENAMES: &[&str] = &["cover", "folder", "album", "front", "artwork"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Which scan gates are active.
///
/// The two gates combine into four policies: both, size only, duration
/// only, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanFilter {
    /// Reject files smaller than the size threshold
    pub min_size: bool,
    /// Reject tracks shorter than the duration threshold
    pub min_duration: bool,
}

/// Threshold values used by the active gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanThresholds {
    pub min_size_bytes: u64,
    pub min_duration_ms: i64,
}

impl Default for ScanThresholds {
    fn default() -> Self {
        Self {
            min_size_bytes: 100 * 1024,
            min_duration_ms: 30_000,
        }
    }
}

impl ScanFilter {
    /// Both gates on.
    pub const ALL: Self = Self {
        min_size: true,
        min_duration: true,
    };

    /// No gates.
    pub const NONE: Self = Self {
        min_size: false,
        min_duration: false,
    };

    pub fn accepts_size(&self, thresholds: &ScanThresholds, size_bytes: u64) -> bool {
        !self.min_size || size_bytes >= thresholds.min_size_bytes
    }

    pub fn accepts_duration(&self, thresholds: &ScanThresholds, duration_ms: i64) -> bool {
        !self.min_duration || duration_ms >= thresholds.min_duration_ms
    }

    /// Whether a file passes every active gate.
    pub fn accepts(&self, thresholds: &ScanThresholds, size_bytes: u64, duration_ms: i64) -> bool {
        self.accepts_size(thresholds, size_bytes) && self.accepts_duration(thresholds, duration_ms)
    }
}

/// Scan errors. Any of these aborts a synchronization pass.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Music directory not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Scan task failed: {0}")]
    Task(String),

    #[error("Scanner unavailable: {0}")]
    Unavailable(String),
}

/// One-shot query for the playable tracks visible on the device.
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    /// Return every track passing the active gates of `filter`.
    async fn scan(&self, filter: ScanFilter) -> Result<Vec<Track>, ScanError>;
}

/// Filesystem-backed scanner over a set of music directories.
#[derive(Debug, Clone)]
pub struct FsScanner {
    roots: Vec<PathBuf>,
    thresholds: ScanThresholds,
}

impl FsScanner {
    pub fn new(roots: Vec<PathBuf>, thresholds: ScanThresholds) -> Self {
        Self { roots, thresholds }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

#[async_trait]
impl DeviceScanner for FsScanner {
    async fn scan(&self, filter: ScanFilter) -> Result<Vec<Track>, ScanError> {
        let roots = self.roots.clone();
        let thresholds = self.thresholds;

        // Directory walking and tag reads are blocking
        tokio::task::spawn_blocking(move || scan_roots(&roots, filter, &thresholds))
            .await
            .map_err(|e| ScanError::Task(e.to_string()))?
    }
}

fn scan_roots(
    roots: &[PathBuf],
    filter: ScanFilter,
    thresholds: &ScanThresholds,
) -> Result<Vec<Track>, ScanError> {
    let mut files = Vec::new();
    for root in roots {
        // A missing root is an error, never an empty result
        if !root.is_dir() {
            return Err(ScanError::RootNotFound(root.clone()));
        }
        files.extend(collect_audio_files(root)?);
    }

    let tracks = files
        .par_iter()
        .filter_map(|path| accept_file(path, filter, thresholds).transpose())
        .collect::<Result<Vec<Track>, ScanError>>()?;

    tracing::info!(
        target: "scanner",
        roots = roots.len(),
        files = files.len(),
        accepted = tracks.len(),
        "Device scan finished"
    );
    Ok(tracks)
}

/// Read one file through the filter gates. `Ok(None)` means skipped.
fn accept_file(
    path: &Path,
    filter: ScanFilter,
    thresholds: &ScanThresholds,
) -> Result<Option<Track>, ScanError> {
    let size = fs::metadata(path)
        .map_err(|source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if !filter.accepts_size(thresholds, size) {
        tracing::debug!(target: "scanner", path = %path.display(), size, "Below size threshold");
        return Ok(None);
    }
    let Some(track) = read_track(path) else {
        return Ok(None);
    };
    if !filter.accepts_duration(thresholds, track.duration_ms) {
        tracing::debug!(target: "scanner", path = %path.display(), duration_ms = track.duration_ms, "Below duration threshold");
        return Ok(None);
    }
    Ok(Some(track))
}

/// Check whether a path has a supported audio extension (case-insensitive).
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Recursively collect audio files under `root`, sorted by path.
///
/// Symlinks are followed. A directory that cannot be read fails the whole
/// walk, since its tracks would otherwise look deleted.
pub fn collect_audio_files(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| ScanError::Io {
            path: e.path().unwrap_or(root).to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_file() && is_audio_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort_unstable();
    Ok(files)
}

/// Device-stable id for a path: the first 8 bytes of its SHA-256, with the
/// sign bit cleared so it can never collide with the sentinel.
pub fn track_id_for_path(path: &Path) -> i64 {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) & i64::MAX as u64) as i64
}

/// Read a track from tags. Files lofty cannot parse are not playable and
/// are skipped.
fn read_track(path: &Path) -> Option<Track> {
    let tagged_file = match Probe::open(path).and_then(|p| p.read()) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(target: "scanner", path = %path.display(), error = %e, "Skipping unreadable file");
            return None;
        }
    };

    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag());

    let title = tag
        .and_then(|t| t.title().map(|s| s.to_string()))
        .or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "Unknown Title".to_string());

    let artist = tag
        .and_then(|t| t.artist().map(|s| s.to_string()))
        .unwrap_or_else(|| "Unknown Artist".to_string());

    let duration_ms = tagged_file.properties().duration().as_millis() as i64;

    Some(Track {
        id: track_id_for_path(path),
        title,
        artist,
        duration_ms,
        album_art_ref: find_sidecar_cover(path)
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        audio_ref: path.display().to_string(),
    })
}

/// Find a cover image in the same directory as the audio file.
fn find_sidecar_cover(audio_path: &Path) -> Option<PathBuf> {
    let parent = audio_path.parent()?;
    COVER_FILENAMES
        .iter()
        .flat_map(|name| {
            IMAGE_EXTENSIONS
                .iter()
                .map(move |ext| parent.join(format!("{}.{}", name, ext)))
        })
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::write_wav;
    use std::fs::File;
    use tempfile::tempdir;

    fn thresholds() -> ScanThresholds {
        ScanThresholds {
            min_size_bytes: 1000,
            min_duration_ms: 30_000,
        }
    }

    #[test]
    fn test_filter_policies() {
        let t = thresholds();
        let small_short = (10, 1_000);
        let small_long = (10, 60_000);
        let big_short = (5000, 1_000);
        let big_long = (5000, 60_000);

        let both = ScanFilter::ALL;
        let size_only = ScanFilter {
            min_size: true,
            min_duration: false,
        };
        let duration_only = ScanFilter {
            min_size: false,
            min_duration: true,
        };
        let neither = ScanFilter::NONE;

        let accepts = |f: ScanFilter, (size, dur): (u64, i64)| f.accepts(&t, size, dur);

        assert!(!accepts(both, small_long));
        assert!(!accepts(both, big_short));
        assert!(accepts(both, big_long));

        assert!(accepts(size_only, big_short));
        assert!(!accepts(size_only, small_long));

        assert!(accepts(duration_only, small_long));
        assert!(!accepts(duration_only, big_short));

        for file in [small_short, small_long, big_short, big_long] {
            assert!(accepts(neither, file));
        }
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let t = thresholds();
        assert!(ScanFilter::ALL.accepts(&t, 1000, 30_000));
        assert!(!ScanFilter::ALL.accepts(&t, 999, 30_000));
    }

    #[test]
    fn test_collect_audio_files() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        File::create(root.join("song.mp3")).unwrap();
        File::create(root.join("music.flac")).unwrap();
        File::create(root.join("notes.txt")).unwrap(); // Should be ignored
        File::create(root.join("UPPERCASE.OGG")).unwrap(); // Case-insensitive

        let subdir = root.join("subdir");
        fs::create_dir(&subdir).unwrap();
        File::create(subdir.join("track.wav")).unwrap();
        File::create(subdir.join("cover.jpg")).unwrap();

        let paths = collect_audio_files(root).unwrap();
        let names: Vec<String> = paths
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();

        assert_eq!(paths.len(), 4);
        assert!(names.contains(&"UPPERCASE.OGG".to_string()));
        assert!(names.contains(&"track.wav".to_string()));
        assert!(!names.contains(&"notes.txt".to_string()));
        assert!(!names.contains(&"cover.jpg".to_string()));
    }

    #[test]
    fn test_track_id_is_stable_and_not_sentinel() {
        let a = track_id_for_path(Path::new("/music/a.mp3"));
        assert_eq!(a, track_id_for_path(Path::new("/music/a.mp3")));
        assert_ne!(a, track_id_for_path(Path::new("/music/b.mp3")));
        assert!(a >= 0);
    }

    #[test]
    fn test_sidecar_cover_found() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("song.mp3");
        File::create(&audio).unwrap();
        assert_eq!(find_sidecar_cover(&audio), None);

        File::create(dir.path().join("folder.png")).unwrap();
        assert_eq!(find_sidecar_cover(&audio), Some(dir.path().join("folder.png")));
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let scanner = FsScanner::new(
            vec![PathBuf::from("/definitely/not/here")],
            ScanThresholds::default(),
        );
        let result = scanner.scan(ScanFilter::NONE).await;
        assert!(matches!(result, Err(ScanError::RootNotFound(_))));
    }

    #[tokio::test]
    async fn test_scan_reads_real_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Intro.wav");
        write_wav(&path, 8_000, 8_000);

        let scanner = FsScanner::new(vec![dir.path().to_path_buf()], ScanThresholds::default());
        let tracks = scanner.scan(ScanFilter::NONE).await.unwrap();

        assert_eq!(tracks.len(), 1);
        let track = &tracks[0];
        assert_eq!(track.id, track_id_for_path(&path));
        assert_eq!(track.title, "Intro");
        assert_eq!(track.artist, "Unknown Artist");
        assert!((900..=1100).contains(&track.duration_ms));
        assert_eq!(track.audio_ref, path.display().to_string());

        // 16 KB and one second fail both default gates
        assert!(scanner.scan(ScanFilter::ALL).await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_error_fails_the_scan() {
        let dir = tempdir().unwrap();
        write_wav(&dir.path().join("kept.wav"), 8_000, 8_000);
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        // A link back to the root makes the walk fail inside `nested`
        std::os::unix::fs::symlink(dir.path(), nested.join("loop")).unwrap();

        let scanner = FsScanner::new(vec![dir.path().to_path_buf()], ScanThresholds::default());
        let result = scanner.scan(ScanFilter::NONE).await;
        assert!(matches!(result, Err(ScanError::Io { .. })));
    }

    #[tokio::test]
    async fn test_unreadable_files_are_skipped() {
        let dir = tempdir().unwrap();
        // Empty files have no parseable audio stream
        File::create(dir.path().join("empty.mp3")).unwrap();

        let scanner = FsScanner::new(vec![dir.path().to_path_buf()], ScanThresholds::default());
        let tracks = scanner.scan(ScanFilter::NONE).await.unwrap();
        assert!(tracks.is_empty());
    }
}
