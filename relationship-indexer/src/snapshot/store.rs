//! Directory-backed store for backfill pages, progress and graph captures.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::delta::{compute_leaderboard, Leaderboard};
use super::naming::{
    is_snapshot_file_name, page_file_name, parse_page_file_name, parse_snapshot_file_name,
    snapshot_file_name, PROGRESS_FILE,
};
use crate::errors::SnapshotError;
use relationship_indexer_shared::{BackfillProgress, GraphSnapshot, PersistableUserNode, StoredEvent};

/// Time range covered by the stored captures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCoverage {
    pub first_snapshot_time: Option<DateTime<Utc>>,
    pub last_snapshot_time: Option<DateTime<Utc>>,
}

/// Owns one snapshot directory and the coverage bounds of its captures.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    coverage: SnapshotCoverage,
}

impl SnapshotStore {
    /// Open `dir`, creating it if needed. Coverage starts empty; see
    /// [`SnapshotStore::scan_coverage`].
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            coverage: SnapshotCoverage::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn coverage(&self) -> SnapshotCoverage {
        self.coverage
    }

    pub(crate) fn set_coverage(
        &mut self,
        first: Option<DateTime<Utc>>,
        last: Option<DateTime<Utc>>,
    ) {
        self.coverage = SnapshotCoverage {
            first_snapshot_time: first,
            last_snapshot_time: last,
        };
    }

    /// Recompute the coverage bounds from the captures on disk.
    pub fn scan_coverage(&mut self) -> Result<SnapshotCoverage, SnapshotError> {
        let captures = self.list_snapshots()?;
        let first = captures.first().map(|(ts, _)| *ts);
        let last = captures.last().map(|(ts, _)| *ts);
        self.set_coverage(first, last);
        Ok(self.coverage)
    }

    // ---- backfill pages ----

    pub fn read_progress(&self) -> Result<Option<BackfillProgress>, SnapshotError> {
        let path = self.dir.join(PROGRESS_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_reader(BufReader::new(file)) {
            Ok(progress) => Ok(Some(progress)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable backfill progress, starting over");
                Ok(None)
            }
        }
    }

    pub fn write_progress(&self, progress: &BackfillProgress) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec_pretty(progress)?;
        fs::write(self.dir.join(PROGRESS_FILE), json)?;
        Ok(())
    }

    /// Write `events` as the page starting at log index `from`.
    ///
    /// A page written earlier from the same index (a partial one) is replaced.
    pub fn write_page(&self, from: u64, events: &[StoredEvent]) -> Result<PathBuf, SnapshotError> {
        let to = from + (events.len() as u64).saturating_sub(1);

        for (existing, (existing_from, existing_to)) in self.page_files()? {
            if existing_from == from && existing_to != to {
                debug!(path = %existing.display(), "Removing superseded page");
                fs::remove_file(&existing)?;
            }
        }

        let path = self.dir.join(page_file_name(from, to));
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut writer, events)?;
        writer.flush()?;
        Ok(path)
    }

    /// Every stored raw event across all pages, in page order.
    pub fn read_pages(&self) -> Result<Vec<StoredEvent>, SnapshotError> {
        let mut events = Vec::new();
        for (path, _) in self.page_files()? {
            let file = File::open(&path)?;
            let page: Vec<StoredEvent> = serde_json::from_reader(BufReader::new(file))?;
            debug!(path = %path.display(), events = page.len(), "Read page");
            events.extend(page);
        }
        Ok(events)
    }

    fn page_files(&self) -> Result<Vec<(PathBuf, (u64, u64))>, SnapshotError> {
        let mut pages = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(range) = name.to_str().and_then(parse_page_file_name) {
                pages.push((entry.path(), range));
            }
        }
        pages.sort_by_key(|(_, range)| *range);
        Ok(pages)
    }

    // ---- captures ----

    /// Write a capture unless one already exists for the same instant.
    ///
    /// Returns `false` when the capture was already present.
    pub fn write_snapshot(&self, snapshot: &GraphSnapshot) -> Result<bool, SnapshotError> {
        let path = self.dir.join(snapshot_file_name(snapshot.timestamp));
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Capture already present");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &snapshot.users)?;
        writer.flush()?;

        debug!(path = %path.display(), users = snapshot.users.len(), "Capture written");
        Ok(true)
    }

    /// Captures on disk sorted by timestamp. Names that do not parse are skipped.
    pub fn list_snapshots(&self) -> Result<Vec<(DateTime<Utc>, PathBuf)>, SnapshotError> {
        let mut captures = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !is_snapshot_file_name(name) {
                continue;
            }
            match parse_snapshot_file_name(name) {
                Some(ts) => captures.push((ts, entry.path())),
                None => warn!(file = name, "Skipping capture with invalid timestamp"),
            }
        }
        captures.sort();
        Ok(captures)
    }

    /// Path of the capture closest in time to `target`.
    ///
    /// On equal distance the earlier capture wins.
    pub fn closest_snapshot_path(&self, target: DateTime<Utc>) -> Result<PathBuf, SnapshotError> {
        let captures = self.list_snapshots()?;
        if captures.is_empty() {
            warn!(dir = %self.dir.display(), "No snapshot files found");
        }

        let mut closest: Option<(i64, PathBuf)> = None;
        for (ts, path) in captures {
            let diff = (ts - target).num_milliseconds().abs();
            if closest.as_ref().map_or(true, |(best, _)| diff < *best) {
                closest = Some((diff, path));
            }
        }

        closest
            .map(|(_, path)| path)
            .ok_or_else(|| SnapshotError::not_found(format!("no capture near {}", target.to_rfc3339())))
    }

    pub fn load_snapshot(&self, path: &Path) -> Result<GraphSnapshot, SnapshotError> {
        let timestamp = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_snapshot_file_name)
            .ok_or_else(|| SnapshotError::not_found(path.display().to_string()))?;

        let file = File::open(path)?;
        let users: Vec<PersistableUserNode> = serde_json::from_reader(BufReader::new(file))?;
        Ok(GraphSnapshot::new(timestamp, users))
    }

    /// The capture closest in time to `target`.
    pub fn load_snapshot_by_date(&self, target: DateTime<Utc>) -> Result<GraphSnapshot, SnapshotError> {
        let path = self.closest_snapshot_path(target)?;
        self.load_snapshot(&path)
    }

    /// Rankings between the captures closest to `start` and `end`.
    pub fn leaderboard(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        count: usize,
    ) -> Result<Leaderboard, SnapshotError> {
        let earlier = self.load_snapshot_by_date(start)?;
        let later = self.load_snapshot_by_date(end)?;

        info!(
            start = %earlier.timestamp,
            end = %later.timestamp,
            count = count,
            "Computing leaderboard"
        );
        Ok(compute_leaderboard(&earlier, &later, count))
    }
}

/// Keep the first occurrence of every `(partition, offset)` and order the
/// result by `(offset, partition)`.
pub(crate) fn dedup_and_order(events: Vec<StoredEvent>) -> Vec<StoredEvent> {
    let mut seen = HashSet::with_capacity(events.len());
    let mut unique: Vec<StoredEvent> = events
        .into_iter()
        .filter(|event| seen.insert(event.log_position()))
        .collect();
    unique.sort_by_key(|event| (event.offset, event.partition));
    unique
}
