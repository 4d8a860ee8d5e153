//! Library synchronization: reconcile the store with a fresh device scan.
//!
//! [`synchronize`] is the pure diff. [`LibrarySynchronizer`] runs a pass:
//! scan, diff against the current snapshot, apply through the store, then
//! publish the new snapshot. A failed scan or store call leaves the
//! published snapshot untouched.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use super::LibraryStore;
use crate::error::Result;
use crate::model::{LibrarySnapshot, Track};
use crate::scanner::{DeviceScanner, ScanFilter};

/// Tracks to add to and remove from the library.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDiff {
    pub to_insert: Vec<Track>,
    pub to_delete: Vec<Track>,
}

impl SyncDiff {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty()
    }
}

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub deleted: usize,
    /// Library size after the pass
    pub total: usize,
}

/// Compute the minimal insert/delete set turning `known` into `scanned`.
///
/// Tracks present on both sides are left alone, even if their metadata
/// changed. The sentinel is ignored and duplicate scanned ids keep their
/// first occurrence.
pub fn synchronize(scanned: &[Track], known: &LibrarySnapshot) -> SyncDiff {
    let mut scanned_ids = HashSet::with_capacity(scanned.len());
    let mut to_insert = Vec::new();

    for track in scanned.iter().filter(|t| !t.is_none()) {
        if scanned_ids.insert(track.id) && !known.contains(track.id) {
            to_insert.push(track.clone());
        }
    }

    let to_delete = known
        .tracks()
        .filter(|t| !scanned_ids.contains(&t.id))
        .cloned()
        .collect();

    SyncDiff {
        to_insert,
        to_delete,
    }
}

/// Owns the library snapshot and runs synchronization passes.
pub struct LibrarySynchronizer {
    store: Arc<dyn LibraryStore>,
    scanner: Arc<dyn DeviceScanner>,
    filter: Mutex<ScanFilter>,
    snapshot: watch::Sender<Arc<LibrarySnapshot>>,
    // One pass at a time; concurrent refreshes would diff the same snapshot
    pass_lock: tokio::sync::Mutex<()>,
}

impl LibrarySynchronizer {
    /// Create a synchronizer with an empty snapshot.
    pub fn new(
        store: Arc<dyn LibraryStore>,
        scanner: Arc<dyn DeviceScanner>,
        filter: ScanFilter,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(LibrarySnapshot::new()));
        Self {
            store,
            scanner,
            filter: Mutex::new(filter),
            snapshot,
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the store's current contents as the snapshot.
    ///
    /// Returns the number of tracks loaded.
    pub async fn hydrate(&self) -> Result<usize> {
        let _pass = self.pass_lock.lock().await;
        let tracks = self.store.load_all().await?;
        let snapshot = LibrarySnapshot::from_tracks(tracks);
        let count = snapshot.len();
        self.snapshot.send_replace(Arc::new(snapshot));
        tracing::info!(target: "library::sync", tracks = count, "Library hydrated");
        Ok(count)
    }

    /// Run one synchronization pass.
    pub async fn refresh(&self) -> Result<SyncReport> {
        let _pass = self.pass_lock.lock().await;
        let filter = *self.filter.lock();

        let scanned = self.scanner.scan(filter).await.map_err(|e| {
            tracing::warn!(target: "library::sync", error = %e, "Scan failed, keeping current library");
            e
        })?;

        let known = self.snapshot();
        let diff = synchronize(&scanned, &known);

        if diff.is_empty() {
            tracing::debug!(target: "library::sync", total = known.len(), "Library unchanged");
            return Ok(SyncReport {
                inserted: 0,
                deleted: 0,
                total: known.len(),
            });
        }

        if let Err(e) = self.store.apply(&diff.to_insert, &diff.to_delete).await {
            tracing::warn!(target: "library::sync", error = %e, "Store update failed, keeping current library");
            return Err(e);
        }

        let next = known.with_changes(&diff.to_insert, &diff.to_delete);
        let report = SyncReport {
            inserted: diff.to_insert.len(),
            deleted: diff.to_delete.len(),
            total: next.len(),
        };
        self.snapshot.send_replace(Arc::new(next));

        tracing::info!(
            target: "library::sync",
            inserted = report.inserted,
            deleted = report.deleted,
            total = report.total,
            "Library synchronized"
        );
        Ok(report)
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<LibrarySnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Receive every snapshot swap.
    pub fn subscribe(&self) -> watch::Receiver<Arc<LibrarySnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn filter(&self) -> ScanFilter {
        *self.filter.lock()
    }

    /// Change the scan gates used by later passes.
    pub fn set_filter(&self, filter: ScanFilter) {
        *self.filter.lock() = filter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockScanner, MockStore, mock_track, mock_tracks};
    use proptest::prelude::*;

    fn ids(tracks: &[Track]) -> Vec<i64> {
        tracks.iter().map(|t| t.id).collect()
    }

    fn synchronizer(store: &MockStore, scanner: &MockScanner) -> LibrarySynchronizer {
        LibrarySynchronizer::new(
            Arc::new(store.clone()),
            Arc::new(scanner.clone()),
            ScanFilter::NONE,
        )
    }

    #[test]
    fn test_diff_scenario() {
        let known = LibrarySnapshot::from_tracks(mock_tracks(&[1, 2, 3]));
        let diff = synchronize(&mock_tracks(&[1, 3, 4]), &known);

        assert_eq!(ids(&diff.to_insert), vec![4]);
        assert_eq!(ids(&diff.to_delete), vec![2]);
    }

    #[test]
    fn test_diff_ignores_changed_metadata() {
        let known = LibrarySnapshot::from_tracks(mock_tracks(&[1]));
        let mut retagged = mock_track(1);
        retagged.title = "New Title".to_string();

        assert!(synchronize(&[retagged], &known).is_empty());
    }

    #[test]
    fn test_diff_skips_sentinel_and_duplicates() {
        let known = LibrarySnapshot::new();
        let scanned = vec![Track::none(), mock_track(5), mock_track(5)];

        let diff = synchronize(&scanned, &known);
        assert_eq!(ids(&diff.to_insert), vec![5]);
        assert!(diff.to_delete.is_empty());
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let scanned = mock_tracks(&[1, 3, 4]);
        let known = LibrarySnapshot::from_tracks(mock_tracks(&[1, 2, 3]));

        let first = synchronize(&scanned, &known);
        let known = known.with_changes(&first.to_insert, &first.to_delete);

        assert!(synchronize(&scanned, &known).is_empty());
    }

    proptest! {
        #[test]
        fn prop_diff_is_disjoint_and_converges(
            scanned in proptest::collection::vec(0i64..50, 0..40),
            known in proptest::collection::vec(0i64..50, 0..40),
        ) {
            let scanned = mock_tracks(&scanned);
            let known = LibrarySnapshot::from_tracks(mock_tracks(&known));
            let diff = synchronize(&scanned, &known);

            let inserted: HashSet<i64> = diff.to_insert.iter().map(|t| t.id).collect();
            let deleted: HashSet<i64> = diff.to_delete.iter().map(|t| t.id).collect();
            prop_assert!(inserted.is_disjoint(&deleted));

            let next = known.with_changes(&diff.to_insert, &diff.to_delete);
            let next_ids: HashSet<i64> = next.ids().collect();
            let scanned_ids: HashSet<i64> = scanned.iter().map(|t| t.id).collect();
            prop_assert_eq!(next_ids, scanned_ids);

            prop_assert!(synchronize(&scanned, &next).is_empty());
        }
    }

    #[tokio::test]
    async fn test_refresh_applies_and_publishes() {
        let store = MockStore::with_tracks(mock_tracks(&[1, 2, 3]));
        let scanner = MockScanner::with_tracks(mock_tracks(&[1, 3, 4]));
        let sync = synchronizer(&store, &scanner);
        sync.hydrate().await.unwrap();

        let mut updates = sync.subscribe();
        let report = sync.refresh().await.unwrap();

        assert_eq!(
            report,
            SyncReport {
                inserted: 1,
                deleted: 1,
                total: 3
            }
        );
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().ids().collect::<Vec<_>>(), vec![1, 3, 4]);
        assert_eq!(ids(&store.tracks()), vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_unchanged_refresh_does_not_publish() {
        let store = MockStore::with_tracks(mock_tracks(&[1, 2]));
        let scanner = MockScanner::with_tracks(mock_tracks(&[1, 2]));
        let sync = synchronizer(&store, &scanner);
        sync.hydrate().await.unwrap();

        let updates = sync.subscribe();
        let report = sync.refresh().await.unwrap();

        assert_eq!(report.total, 2);
        assert!(!updates.has_changed().unwrap());
        assert_eq!(store.apply_calls(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_snapshot() {
        let store = MockStore::with_tracks(mock_tracks(&[1, 2]));
        let scanner = MockScanner::with_tracks(mock_tracks(&[3]));
        let sync = synchronizer(&store, &scanner);
        sync.hydrate().await.unwrap();

        store.set_fail(true);
        assert!(sync.refresh().await.is_err());

        assert_eq!(sync.snapshot().ids().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(ids(&store.tracks()), vec![1, 2]);

        // Next successful pass catches up
        store.set_fail(false);
        let report = sync.refresh().await.unwrap();
        assert_eq!((report.inserted, report.deleted), (1, 2));
    }

    #[tokio::test]
    async fn test_scan_failure_keeps_snapshot() {
        let store = MockStore::with_tracks(mock_tracks(&[1]));
        let scanner = MockScanner::with_tracks(Vec::new());
        let sync = synchronizer(&store, &scanner);
        sync.hydrate().await.unwrap();

        scanner.set_fail(true);
        let err = sync.refresh().await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Scan(_)));
        assert_eq!(sync.snapshot().len(), 1);
        assert_eq!(store.apply_calls(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_directory_keeps_library() {
        use crate::scanner::{FsScanner, ScanThresholds};

        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Albums");
        std::fs::create_dir(&nested).unwrap();
        std::os::unix::fs::symlink(dir.path(), nested.join("loop")).unwrap();

        let store = MockStore::with_tracks(mock_tracks(&[1, 2]));
        let scanner = FsScanner::new(vec![dir.path().to_path_buf()], ScanThresholds::default());
        let sync = LibrarySynchronizer::new(
            Arc::new(store.clone()),
            Arc::new(scanner),
            ScanFilter::NONE,
        );
        sync.hydrate().await.unwrap();

        let err = sync.refresh().await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Scan(_)));
        assert_eq!(ids(&sync.snapshot().to_list()), vec![1, 2]);
        assert_eq!(store.apply_calls(), 0);
        assert_eq!(store.tracks().len(), 2);
    }

    #[tokio::test]
    async fn test_tightening_filter_prunes_tracks() {
        let store = MockStore::default();
        let scanner = MockScanner::default();
        scanner.add_file(mock_track(1), 10); // tiny file
        scanner.add_file(mock_track(2), 10 * 1024 * 1024);
        let sync = synchronizer(&store, &scanner);

        let report = sync.refresh().await.unwrap();
        assert_eq!(report.total, 2);

        sync.set_filter(ScanFilter {
            min_size: true,
            min_duration: false,
        });
        let report = sync.refresh().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(sync.snapshot().ids().collect::<Vec<_>>(), vec![2]);
    }
}
