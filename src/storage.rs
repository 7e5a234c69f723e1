//! Segment registry and frame stat persistence.
//!
//! The registry is the single source of truth for which segments still
//! need batch processing. Both stores are trait objects so tests can run
//! against the in-memory implementations; production uses SQLite.
//!
//! `mark_processed` and `soft_delete` are single atomic UPDATEs. The
//! design assumes at most one batch processor per registry; there is no
//! claim/lease protocol for competing workers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};

/// A recorded unit of video with a half-open time range `[from, to)`.
#[derive(Clone, Debug)]
pub struct Segment {
    pub id: i64,
    pub file_name: String,
    pub file_path: PathBuf,
    pub processed: bool,
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    pub deleted: bool,
}

impl Segment {
    /// Whether the backing file is still on disk.
    pub fn exists(&self) -> bool {
        self.file_path.is_file()
    }
}

/// One persisted recognition record for a processed frame.
#[derive(Clone, Debug)]
pub struct FrameStat {
    pub segment_id: i64,
    pub timestamp: NaiveDateTime,
    pub caption: String,
    /// Face crop pixels as stored (opaque to the store).
    pub face: Vec<u8>,
    /// Recognized identity, `None` when unknown.
    pub identity: Option<String>,
}

pub trait SegmentRegistry: Send + Sync {
    fn create(&self, path: &Path, from: NaiveDateTime, to: NaiveDateTime) -> Result<Segment>;

    /// Oldest unprocessed, non-deleted segment, by ascending identifier.
    fn next_unprocessed(&self) -> Result<Option<Segment>>;

    fn mark_processed(&self, id: i64) -> Result<()>;

    fn soft_delete(&self, id: i64) -> Result<()>;
}

pub trait FrameStatStore: Send + Sync {
    /// Append a stat unless the most recent stat for the same segment
    /// already carries the same non-null identity. Returns whether the
    /// record was stored.
    fn append_if_not_duplicate(&self, stat: &FrameStat) -> Result<bool>;
}

fn is_adjacent_duplicate(last_identity: Option<&str>, new_identity: Option<&str>) -> bool {
    matches!((last_identity, new_identity), (Some(a), Some(b)) if a == b)
}

fn millis(ts: NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_millis()
}

fn from_millis(ms: i64) -> Result<NaiveDateTime> {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| anyhow!("timestamp {} out of range", ms))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// -------------------- SQLite --------------------

pub struct SqliteSegmentStore {
    conn: Mutex<Connection>,
}

impl SqliteSegmentStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS video (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              file_name TEXT NOT NULL,
              file_path TEXT NOT NULL,
              processed INTEGER NOT NULL DEFAULT 0,
              start_time INTEGER NOT NULL,
              end_time INTEGER NOT NULL,
              deleted INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS video_stat (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              video_id INTEGER NOT NULL,
              occurred_at INTEGER NOT NULL,
              description TEXT NOT NULL,
              face BLOB,
              profile_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_video_unprocessed ON video(processed, deleted, id);
            CREATE INDEX IF NOT EXISTS idx_video_stat_video ON video_stat(video_id, id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("segment store lock poisoned"))
    }
}

impl SegmentRegistry for SqliteSegmentStore {
    fn create(&self, path: &Path, from: NaiveDateTime, to: NaiveDateTime) -> Result<Segment> {
        let conn = self.lock()?;
        let file_name = file_name_of(path);
        conn.execute(
            r#"
            INSERT INTO video(file_name, file_path, processed, start_time, end_time, deleted)
            VALUES (?1, ?2, 0, ?3, ?4, 0)
            "#,
            params![
                file_name,
                path.to_string_lossy(),
                millis(from),
                millis(to)
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Segment {
            id,
            file_name,
            file_path: path.to_path_buf(),
            processed: false,
            from,
            to,
            deleted: false,
        })
    }

    fn next_unprocessed(&self) -> Result<Option<Segment>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r#"
                SELECT id, file_name, file_path, processed, start_time, end_time, deleted
                FROM video
                WHERE processed = 0 AND deleted = 0
                ORDER BY id ASC
                LIMIT 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, bool>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, file_name, file_path, processed, start, end, deleted)) = row else {
            return Ok(None);
        };
        Ok(Some(Segment {
            id,
            file_name,
            file_path: PathBuf::from(file_path),
            processed,
            from: from_millis(start)?,
            to: from_millis(end)?,
            deleted,
        }))
    }

    fn mark_processed(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute("UPDATE video SET processed = 1 WHERE id = ?1", params![id])?;
        if updated == 0 {
            return Err(anyhow!("segment {} not found", id));
        }
        Ok(())
    }

    fn soft_delete(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute("UPDATE video SET deleted = 1 WHERE id = ?1", params![id])?;
        if updated == 0 {
            return Err(anyhow!("segment {} not found", id));
        }
        Ok(())
    }
}

impl FrameStatStore for SqliteSegmentStore {
    fn append_if_not_duplicate(&self, stat: &FrameStat) -> Result<bool> {
        let conn = self.lock()?;
        let last_identity: Option<Option<String>> = conn
            .query_row(
                "SELECT profile_id FROM video_stat WHERE video_id = ?1 ORDER BY id DESC LIMIT 1",
                params![stat.segment_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(last) = last_identity {
            if is_adjacent_duplicate(last.as_deref(), stat.identity.as_deref()) {
                log::debug!(
                    "skipping frame stat for segment {}: same identity as previous ({:?})",
                    stat.segment_id,
                    stat.identity
                );
                return Ok(false);
            }
        }

        conn.execute(
            r#"
            INSERT INTO video_stat(video_id, occurred_at, description, face, profile_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                stat.segment_id,
                millis(stat.timestamp),
                stat.caption,
                stat.face,
                stat.identity
            ],
        )?;
        Ok(true)
    }
}

// -------------------- In-memory --------------------

#[derive(Default)]
struct InMemoryInner {
    segments: Vec<Segment>,
    stats: HashMap<i64, Vec<FrameStat>>,
    next_id: i64,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemorySegmentStore {
    inner: Mutex<InMemoryInner>,
}

impl InMemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.inner.lock().expect("store lock").segments.clone()
    }

    pub fn stats_for(&self, segment_id: i64) -> Vec<FrameStat> {
        self.inner
            .lock()
            .expect("store lock")
            .stats
            .get(&segment_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl SegmentRegistry for InMemorySegmentStore {
    fn create(&self, path: &Path, from: NaiveDateTime, to: NaiveDateTime) -> Result<Segment> {
        let mut inner = self.inner.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        inner.next_id += 1;
        let segment = Segment {
            id: inner.next_id,
            file_name: file_name_of(path),
            file_path: path.to_path_buf(),
            processed: false,
            from,
            to,
            deleted: false,
        };
        inner.segments.push(segment.clone());
        Ok(segment)
    }

    fn next_unprocessed(&self) -> Result<Option<Segment>> {
        let inner = self.inner.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(inner
            .segments
            .iter()
            .filter(|segment| !segment.processed && !segment.deleted)
            .min_by_key(|segment| segment.id)
            .cloned())
    }

    fn mark_processed(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        let segment = inner
            .segments
            .iter_mut()
            .find(|segment| segment.id == id)
            .ok_or_else(|| anyhow!("segment {} not found", id))?;
        segment.processed = true;
        Ok(())
    }

    fn soft_delete(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        let segment = inner
            .segments
            .iter_mut()
            .find(|segment| segment.id == id)
            .ok_or_else(|| anyhow!("segment {} not found", id))?;
        segment.deleted = true;
        Ok(())
    }
}

impl FrameStatStore for InMemorySegmentStore {
    fn append_if_not_duplicate(&self, stat: &FrameStat) -> Result<bool> {
        let mut inner = self.inner.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        let stats = inner.stats.entry(stat.segment_id).or_default();
        if let Some(last) = stats.last() {
            if is_adjacent_duplicate(last.identity.as_deref(), stat.identity.as_deref()) {
                return Ok(false);
            }
        }
        stats.push(stat.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> NaiveDateTime {
        chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc()
    }

    fn stat(segment_id: i64, identity: Option<&str>) -> FrameStat {
        FrameStat {
            segment_id,
            timestamp: ts(10),
            caption: "Male:[25-32]".to_string(),
            face: vec![1, 2, 3],
            identity: identity.map(str::to_string),
        }
    }

    fn open_sqlite() -> (tempfile::TempDir, SqliteSegmentStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("watchdog.db");
        let store = SqliteSegmentStore::open(db.to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[test]
    fn next_unprocessed_returns_oldest_first() {
        let (_dir, store) = open_sqlite();
        let a = store.create(Path::new("/tmp/a.wdg"), ts(0), ts(60)).unwrap();
        let b = store.create(Path::new("/tmp/b.wdg"), ts(60), ts(120)).unwrap();

        assert_eq!(store.next_unprocessed().unwrap().unwrap().id, a.id);
        store.mark_processed(a.id).unwrap();
        assert_eq!(store.next_unprocessed().unwrap().unwrap().id, b.id);
        store.soft_delete(b.id).unwrap();
        assert!(store.next_unprocessed().unwrap().is_none());
    }

    #[test]
    fn soft_deleted_segments_stay_unprocessed() {
        let (_dir, store) = open_sqlite();
        let segment = store.create(Path::new("/tmp/a.wdg"), ts(0), ts(60)).unwrap();
        store.soft_delete(segment.id).unwrap();

        // deleted but never processed
        let conn = store.lock().unwrap();
        let (processed, deleted): (bool, bool) = conn
            .query_row(
                "SELECT processed, deleted FROM video WHERE id = ?1",
                params![segment.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(!processed);
        assert!(deleted);
    }

    #[test]
    fn adjacent_same_identity_stats_are_collapsed() {
        let (_dir, store) = open_sqlite();
        let segment = store.create(Path::new("/tmp/a.wdg"), ts(0), ts(60)).unwrap();

        assert!(store.append_if_not_duplicate(&stat(segment.id, Some("7"))).unwrap());
        assert!(!store.append_if_not_duplicate(&stat(segment.id, Some("7"))).unwrap());
        assert!(store.append_if_not_duplicate(&stat(segment.id, Some("9"))).unwrap());
        assert!(store.append_if_not_duplicate(&stat(segment.id, Some("7"))).unwrap());
    }

    #[test]
    fn unknown_identities_are_never_deduplicated() {
        let store = InMemorySegmentStore::new();
        let segment = store.create(Path::new("/tmp/a.wdg"), ts(0), ts(60)).unwrap();

        assert!(store.append_if_not_duplicate(&stat(segment.id, None)).unwrap());
        assert!(store.append_if_not_duplicate(&stat(segment.id, None)).unwrap());
        assert!(store.append_if_not_duplicate(&stat(segment.id, Some("7"))).unwrap());
        assert!(store.append_if_not_duplicate(&stat(segment.id, None)).unwrap());
        assert_eq!(store.stats_for(segment.id).len(), 4);
    }

    #[test]
    fn segment_times_round_trip_through_sqlite() {
        let (_dir, store) = open_sqlite();
        let from = ts(1_700_000_000);
        let to = ts(1_700_000_600);
        store.create(Path::new("/tmp/a.wdg"), from, to).unwrap();

        let segment = store.next_unprocessed().unwrap().unwrap();
        assert_eq!(segment.from, from);
        assert_eq!(segment.to, to);
    }
}
