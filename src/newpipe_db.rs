//! Handle over the structured (NewPipe) SQLite store.
//!
//! Reads go through [`NewPipeDb`]; writes go through a [`StoreWriter`] borrowed from an open
//! transaction so a whole conversion run commits or rolls back as one unit. Every query is
//! parameterized and the connection is passed explicitly down the call chain.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::codecs::canonicalize_watch_url;
use crate::error::{BridgeError, Result};
use crate::schema::{self, SchemaRepair};

/// Service id of the only platform this tool round-trips.
pub(crate) const YOUTUBE_SERVICE_ID: i64 = 0;
pub(crate) const VIDEO_STREAM_TYPE: &str = "VIDEO_STREAM";

// ── Row types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SubscriptionRow {
    pub(crate) uid: i64,
    pub(crate) service_id: i64,
    pub(crate) url: String,
    pub(crate) name: String,
    pub(crate) avatar_url: Option<String>,
    pub(crate) subscriber_count: Option<i64>,
    pub(crate) description: Option<String>,
    pub(crate) notification_mode: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StreamRow {
    pub(crate) uid: i64,
    pub(crate) service_id: i64,
    pub(crate) url: String,
    pub(crate) title: String,
    pub(crate) stream_type: String,
    pub(crate) duration: i64,
    pub(crate) uploader: String,
    pub(crate) uploader_url: Option<String>,
    pub(crate) thumbnail_url: Option<String>,
    pub(crate) view_count: Option<i64>,
    pub(crate) textual_upload_date: Option<String>,
    pub(crate) upload_date: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlaylistRow {
    pub(crate) uid: i64,
    pub(crate) name: String,
    pub(crate) thumbnail_stream_id: i64,
    pub(crate) display_index: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RemotePlaylistRow {
    pub(crate) uid: i64,
    pub(crate) service_id: i64,
    pub(crate) name: String,
    pub(crate) url: String,
    pub(crate) thumbnail_url: Option<String>,
    pub(crate) uploader: Option<String>,
    pub(crate) display_index: i64,
    pub(crate) stream_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HistoryRow {
    pub(crate) stream: StreamRow,
    pub(crate) access_date: i64,
    pub(crate) repeat_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StateRow {
    pub(crate) stream: StreamRow,
    pub(crate) progress_time: i64,
}

/// Metadata for a stream about to be inserted.
#[derive(Debug, Clone, Default)]
pub(crate) struct NewStream {
    pub(crate) url: String,
    pub(crate) title: String,
    pub(crate) duration: i64,
    pub(crate) uploader: String,
    pub(crate) uploader_url: Option<String>,
    pub(crate) thumbnail_url: Option<String>,
    pub(crate) textual_upload_date: Option<String>,
    pub(crate) upload_date: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NewSubscription {
    pub(crate) url: String,
    pub(crate) name: String,
    pub(crate) avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NewRemotePlaylist {
    pub(crate) name: String,
    pub(crate) url: String,
    pub(crate) thumbnail_url: Option<String>,
    pub(crate) uploader: Option<String>,
    pub(crate) display_index: i64,
    pub(crate) stream_count: Option<i64>,
}

/// How [`StoreWriter::record_watch`] stored a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchWrite {
    Inserted,
    Merged { access_date: i64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub(crate) struct StoreCounts {
    pub(crate) subscriptions: usize,
    pub(crate) streams: usize,
    pub(crate) playlists: usize,
    pub(crate) playlist_entries: usize,
    pub(crate) remote_playlists: usize,
    pub(crate) stream_states: usize,
    pub(crate) history_rows: usize,
}

// ═════════════════════════════════════════════════════════════════════════
// NewPipeDb: read side
// ═════════════════════════════════════════════════════════════════════════

pub(crate) struct NewPipeDb {
    conn: Connection,
}

const STREAM_COLUMNS: &str = "s.uid, s.service_id, s.url, s.title, s.stream_type, s.duration,
    s.uploader, s.uploader_url, s.thumbnail_url, s.view_count, s.textual_upload_date,
    s.upload_date";

impl NewPipeDb {
    /// Open an existing store file and repair its schema if needed.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BridgeError::Malformed(format!(
                "database not found: {}",
                path.display()
            )));
        }
        let conn = Connection::open(path)?;
        Self::from_existing(conn)
    }

    /// Create a fresh store file with the canonical schema.
    pub(crate) fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_fresh(conn)
    }

    pub(crate) fn create_in_memory() -> Result<Self> {
        Self::from_fresh(Connection::open_in_memory()?)
    }

    fn from_fresh(conn: Connection) -> Result<Self> {
        let mut db = Self { conn };
        db.apply_pragmas()?;
        schema::create_schema(&mut db.conn)?;
        Ok(db)
    }

    fn from_existing(conn: Connection) -> Result<Self> {
        let mut db = Self { conn };
        db.apply_pragmas()?;
        let has_streams: Option<String> = db
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'streams'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if has_streams.is_none() {
            return Err(BridgeError::UnsupportedSchema(
                "structured store has no streams table".into(),
            ));
        }
        // Tables added in later schema versions are created if absent; existing ones are untouched.
        schema::create_schema(&mut db.conn)?;
        if let SchemaRepair::LeftLegacy = schema::ensure_compatible_schema(&mut db.conn)? {
            debug!("continuing with legacy stream_state table");
        }
        Ok(db)
    }

    fn apply_pragmas(&self) -> Result<()> {
        // The file is shipped inside an archive, so keep it self-contained (no WAL sidecar).
        self.conn.execute_batch(
            "PRAGMA journal_mode = DELETE;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Release the connection so the backing file can be read or reopened.
    pub(crate) fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| BridgeError::Sqlite(e))
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub(crate) fn subscriptions(&self) -> Result<Vec<SubscriptionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT uid, service_id, url, name, avatar_url, subscriber_count, description,
                    notification_mode
             FROM subscriptions ORDER BY uid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SubscriptionRow {
                uid: row.get(0)?,
                service_id: row.get(1)?,
                url: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                avatar_url: row.get(4)?,
                subscriber_count: row.get(5)?,
                description: row.get(6)?,
                notification_mode: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub(crate) fn remote_playlists(&self) -> Result<Vec<RemotePlaylistRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT uid, service_id, name, url, thumbnail_url, uploader, display_index,
                    stream_count
             FROM remote_playlists ORDER BY display_index, uid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RemotePlaylistRow {
                uid: row.get(0)?,
                service_id: row.get(1)?,
                name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                url: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                thumbnail_url: row.get(4)?,
                uploader: row.get(5)?,
                display_index: row.get(6)?,
                stream_count: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub(crate) fn playlists(&self) -> Result<Vec<PlaylistRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT uid, name, thumbnail_stream_id, display_index
             FROM playlists ORDER BY display_index, uid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PlaylistRow {
                uid: row.get(0)?,
                name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                thumbnail_stream_id: row.get(2)?,
                display_index: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Member streams of one playlist in stored order.
    pub(crate) fn playlist_streams(&self, playlist_uid: i64) -> Result<Vec<StreamRow>> {
        let sql = format!(
            "SELECT {STREAM_COLUMNS}
             FROM playlist_stream_join j JOIN streams s ON s.uid = j.stream_id
             WHERE j.playlist_id = ?1
             ORDER BY j.join_index"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([playlist_uid], |row| row_to_stream(row, 0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub(crate) fn stream_states(&self) -> Result<Vec<StateRow>> {
        let sql = format!(
            "SELECT {STREAM_COLUMNS}, st.progress_time
             FROM stream_state st JOIN streams s ON s.uid = st.stream_id
             ORDER BY s.uid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(StateRow {
                stream: row_to_stream(row, 0)?,
                progress_time: row.get(12)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// History rows, newest first.
    pub(crate) fn history(&self) -> Result<Vec<HistoryRow>> {
        let sql = format!(
            "SELECT {STREAM_COLUMNS}, h.access_date, h.repeat_count
             FROM stream_history h JOIN streams s ON s.uid = h.stream_id
             ORDER BY h.access_date DESC, s.uid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(HistoryRow {
                stream: row_to_stream(row, 0)?,
                access_date: row.get(12)?,
                repeat_count: row.get(13)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub(crate) fn counts(&self) -> Result<StoreCounts> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(StoreCounts {
            subscriptions: count("subscriptions")?,
            streams: count("streams")?,
            playlists: count("playlists")?,
            playlist_entries: count("playlist_stream_join")?,
            remote_playlists: count("remote_playlists")?,
            stream_states: count("stream_state")?,
            history_rows: count("stream_history")?,
        })
    }
}

fn row_to_stream(row: &Row, offset: usize) -> rusqlite::Result<StreamRow> {
    Ok(StreamRow {
        uid: row.get(offset)?,
        service_id: row.get(offset + 1)?,
        url: row.get::<_, Option<String>>(offset + 2)?.unwrap_or_default(),
        title: row.get::<_, Option<String>>(offset + 3)?.unwrap_or_default(),
        stream_type: row.get::<_, Option<String>>(offset + 4)?.unwrap_or_default(),
        duration: row.get::<_, Option<i64>>(offset + 5)?.unwrap_or(0),
        uploader: row.get::<_, Option<String>>(offset + 6)?.unwrap_or_default(),
        uploader_url: row.get(offset + 7)?,
        thumbnail_url: row.get(offset + 8)?,
        view_count: row.get(offset + 9)?,
        textual_upload_date: row.get(offset + 10)?,
        upload_date: row.get(offset + 11)?,
    })
}

// ═════════════════════════════════════════════════════════════════════════
// StoreWriter: write side, always inside a transaction
// ═════════════════════════════════════════════════════════════════════════

pub(crate) struct StoreWriter<'c> {
    conn: &'c Connection,
    /// canonical watch URL -> stream uid, loaded once per run.
    stream_index: Option<HashMap<String, i64>>,
}

impl<'c> StoreWriter<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            stream_index: None,
        }
    }

    fn stream_index(&mut self) -> Result<&mut HashMap<String, i64>> {
        if self.stream_index.is_none() {
            let mut index = HashMap::new();
            let mut stmt = self
                .conn
                .prepare("SELECT uid, url FROM streams WHERE service_id = ?1 ORDER BY uid")?;
            let rows = stmt.query_map([YOUTUBE_SERVICE_ID], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (uid, url) = row?;
                let key = canonicalize_watch_url(&url).unwrap_or(url);
                index.entry(key).or_insert(uid);
            }
            self.stream_index = Some(index);
        }
        Ok(self.stream_index.get_or_insert_with(HashMap::new))
    }

    /// Stream uid for a canonical watch URL, if a row already exists.
    pub(crate) fn stream_uid(&mut self, canonical_url: &str) -> Result<Option<i64>> {
        Ok(self.stream_index()?.get(canonical_url).copied())
    }

    /// Reuse the existing stream row for this URL or insert a new one. Returns its uid.
    pub(crate) fn upsert_stream(&mut self, stream: &NewStream) -> Result<i64> {
        if let Some(uid) = self.stream_uid(&stream.url)? {
            return Ok(uid);
        }
        self.conn.execute(
            "INSERT INTO streams (service_id, url, title, stream_type, duration, uploader,
                 uploader_url, thumbnail_url, view_count, textual_upload_date, upload_date,
                 is_upload_date_approximation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10, 0)",
            params![
                YOUTUBE_SERVICE_ID,
                stream.url,
                stream.title,
                VIDEO_STREAM_TYPE,
                stream.duration,
                stream.uploader,
                stream.uploader_url,
                stream.thumbnail_url,
                stream.textual_upload_date,
                stream.upload_date,
            ],
        )?;
        let uid = self.conn.last_insert_rowid();
        self.stream_index()?.insert(stream.url.clone(), uid);
        debug!("inserted stream #{uid} {}", stream.url);
        Ok(uid)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub(crate) fn delete_platform_subscriptions(&self) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM subscriptions WHERE service_id = ?1",
            [YOUTUBE_SERVICE_ID],
        )?)
    }

    /// Insert a subscription; returns false when (service, url) already exists.
    pub(crate) fn insert_subscription(&self, sub: &NewSubscription) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO subscriptions
                 (service_id, url, name, avatar_url, subscriber_count, description, notification_mode)
             VALUES (?1, ?2, ?3, ?4, -1, '', 0)",
            params![YOUTUBE_SERVICE_ID, sub.url, sub.name, sub.avatar_url],
        )?;
        Ok(changed > 0)
    }

    // ── Local playlists ──────────────────────────────────────────────

    pub(crate) fn playlist_uids_by_name(&self, name: &str) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT uid FROM playlists WHERE name = ?1 ORDER BY uid")?;
        let rows = stmt.query_map([name], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete a playlist and its membership rows.
    pub(crate) fn delete_playlist(&self, uid: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM playlist_stream_join WHERE playlist_id = ?1", [uid])?;
        self.conn.execute("DELETE FROM playlists WHERE uid = ?1", [uid])?;
        Ok(())
    }

    pub(crate) fn delete_all_playlists(&self) -> Result<usize> {
        self.conn.execute("DELETE FROM playlist_stream_join", [])?;
        Ok(self.conn.execute("DELETE FROM playlists", [])?)
    }

    pub(crate) fn next_playlist_display_index(&self) -> Result<i64> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT MAX(display_index) FROM playlists", [], |row| row.get(0))?;
        Ok(max.map_or(0, |m| m.max(-1) + 1))
    }

    pub(crate) fn insert_playlist(&self, name: &str, display_index: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO playlists (name, is_thumbnail_permanent, thumbnail_stream_id, display_index)
             VALUES (?1, 0, -1, ?2)",
            params![name, display_index],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn set_playlist_thumbnail(&self, playlist_uid: i64, stream_uid: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE playlists SET thumbnail_stream_id = ?2 WHERE uid = ?1",
            params![playlist_uid, stream_uid],
        )?;
        Ok(())
    }

    pub(crate) fn insert_playlist_entry(
        &self,
        playlist_uid: i64,
        stream_uid: i64,
        join_index: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO playlist_stream_join (playlist_id, stream_id, join_index)
             VALUES (?1, ?2, ?3)",
            params![playlist_uid, stream_uid, join_index],
        )?;
        Ok(())
    }

    // ── Remote playlist bookmarks ────────────────────────────────────

    pub(crate) fn delete_platform_remote_playlists(&self) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM remote_playlists WHERE service_id = ?1",
            [YOUTUBE_SERVICE_ID],
        )?)
    }

    pub(crate) fn insert_remote_playlist(&self, bookmark: &NewRemotePlaylist) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO remote_playlists
                 (service_id, name, url, thumbnail_url, uploader, display_index, stream_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                YOUTUBE_SERVICE_ID,
                bookmark.name,
                bookmark.url,
                bookmark.thumbnail_url,
                bookmark.uploader,
                bookmark.display_index,
                bookmark.stream_count,
            ],
        )?;
        Ok(changed > 0)
    }

    // ── Watch state / history ────────────────────────────────────────

    /// One current offset per stream: replaces any previous value.
    ///
    /// Update-then-insert rather than an upsert, so a legacy `stream_state` without a key works too.
    pub(crate) fn set_stream_state(&self, stream_uid: i64, progress_time: i64) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE stream_state SET progress_time = ?2 WHERE stream_id = ?1",
            params![stream_uid, progress_time],
        )?;
        if updated == 0 {
            self.conn.execute(
                "INSERT INTO stream_state (stream_id, progress_time) VALUES (?1, ?2)",
                params![stream_uid, progress_time],
            )?;
        }
        Ok(())
    }

    /// Record a watch event. An existing row for the same stream within `window_ms` of
    /// `access_date` is the same event: its repeat count grows instead of a new row appearing.
    pub(crate) fn record_watch(
        &self,
        stream_uid: i64,
        access_date: i64,
        repeat_count: i64,
        window_ms: i64,
    ) -> Result<WatchWrite> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT access_date FROM stream_history
                 WHERE stream_id = ?1 AND access_date BETWEEN ?2 - ?3 AND ?2 + ?3
                 ORDER BY ABS(access_date - ?2), access_date
                 LIMIT 1",
                params![stream_uid, access_date, window_ms],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(found) => {
                self.conn.execute(
                    "UPDATE stream_history SET repeat_count = repeat_count + ?3
                     WHERE stream_id = ?1 AND access_date = ?2",
                    params![stream_uid, found, repeat_count],
                )?;
                Ok(WatchWrite::Merged { access_date: found })
            }
            None => {
                self.conn.execute(
                    "INSERT INTO stream_history (stream_id, access_date, repeat_count)
                     VALUES (?1, ?2, ?3)",
                    params![stream_uid, access_date, repeat_count],
                )?;
                Ok(WatchWrite::Inserted)
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stream(id: &str) -> NewStream {
        NewStream {
            url: crate::codecs::canonical_watch_url(id),
            title: format!("Video {id}"),
            duration: 120,
            uploader: "Uploader".into(),
            ..NewStream::default()
        }
    }

    #[test]
    fn upsert_stream_reuses_rows() {
        let mut db = NewPipeDb::create_in_memory().unwrap();
        let tx = db.transaction().unwrap();
        let mut writer = StoreWriter::new(&tx);
        let a = writer.upsert_stream(&sample_stream("aaa")).unwrap();
        let again = writer.upsert_stream(&sample_stream("aaa")).unwrap();
        let b = writer.upsert_stream(&sample_stream("bbb")).unwrap();
        assert_eq!(a, again);
        assert_ne!(a, b);
        tx.commit().unwrap();
        assert_eq!(db.counts().unwrap().streams, 2);
    }

    #[test]
    fn upsert_stream_matches_non_canonical_stored_url() {
        let mut db = NewPipeDb::create_in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO streams (service_id, url, title, stream_type, duration, uploader)
                 VALUES (0, 'https://www.youtube.com/shorts/xyz', 't', 'VIDEO_STREAM', 1, 'u')",
                [],
            )
            .unwrap();
        let tx = db.transaction().unwrap();
        let mut writer = StoreWriter::new(&tx);
        let uid = writer.upsert_stream(&sample_stream("xyz")).unwrap();
        assert_eq!(uid, 1);
        tx.commit().unwrap();
        assert_eq!(db.counts().unwrap().streams, 1);
    }

    #[test]
    fn record_watch_merges_within_window() {
        let mut db = NewPipeDb::create_in_memory().unwrap();
        let tx = db.transaction().unwrap();
        let mut writer = StoreWriter::new(&tx);
        let uid = writer.upsert_stream(&sample_stream("aaa")).unwrap();

        let first = writer.record_watch(uid, 1_000_000, 1, 1000).unwrap();
        assert_eq!(first, WatchWrite::Inserted);
        let near = writer.record_watch(uid, 1_000_800, 2, 1000).unwrap();
        assert_eq!(near, WatchWrite::Merged { access_date: 1_000_000 });
        let far = writer.record_watch(uid, 1_002_300, 1, 1000).unwrap();
        assert_eq!(far, WatchWrite::Inserted);
        tx.commit().unwrap();

        let history = db.history().unwrap();
        assert_eq!(history.len(), 2);
        let merged = history.iter().find(|h| h.access_date == 1_000_000).unwrap();
        assert_eq!(merged.repeat_count, 3);
    }

    #[test]
    fn record_watch_keeps_events_beyond_window_apart() {
        let mut db = NewPipeDb::create_in_memory().unwrap();
        let tx = db.transaction().unwrap();
        let mut writer = StoreWriter::new(&tx);
        let uid = writer.upsert_stream(&sample_stream("aaa")).unwrap();
        writer.record_watch(uid, 5_000, 1, 1000).unwrap();
        writer.record_watch(uid, 6_500, 1, 1000).unwrap();
        tx.commit().unwrap();
        assert_eq!(db.history().unwrap().len(), 2);
    }

    #[test]
    fn stream_state_replaces_value() {
        let mut db = NewPipeDb::create_in_memory().unwrap();
        let tx = db.transaction().unwrap();
        let mut writer = StoreWriter::new(&tx);
        let uid = writer.upsert_stream(&sample_stream("aaa")).unwrap();
        writer.set_stream_state(uid, 500).unwrap();
        writer.set_stream_state(uid, 300).unwrap();
        tx.commit().unwrap();
        let states = db.stream_states().unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].progress_time, 300);
    }

    #[test]
    fn playlist_streams_follow_join_order() {
        let mut db = NewPipeDb::create_in_memory().unwrap();
        let tx = db.transaction().unwrap();
        let mut writer = StoreWriter::new(&tx);
        let a = writer.upsert_stream(&sample_stream("aaa")).unwrap();
        let b = writer.upsert_stream(&sample_stream("bbb")).unwrap();
        let pl = writer.insert_playlist("Mix", 0).unwrap();
        writer.insert_playlist_entry(pl, b, 0).unwrap();
        writer.insert_playlist_entry(pl, a, 1).unwrap();
        writer.set_playlist_thumbnail(pl, b).unwrap();
        tx.commit().unwrap();

        let members = db.playlist_streams(pl).unwrap();
        let ids: Vec<i64> = members.iter().map(|s| s.uid).collect();
        assert_eq!(ids, vec![b, a]);
        assert_eq!(db.playlists().unwrap()[0].thumbnail_stream_id, b);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut db = NewPipeDb::create_in_memory().unwrap();
        {
            let tx = db.transaction().unwrap();
            let writer = StoreWriter::new(&tx);
            writer
                .insert_subscription(&NewSubscription {
                    url: "https://www.youtube.com/channel/UC1".into(),
                    name: "one".into(),
                    avatar_url: None,
                })
                .unwrap();
        }
        assert_eq!(db.counts().unwrap().subscriptions, 0);
    }

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("backup_bridge_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("store_{}_{name}.db", std::process::id()));
        std::fs::remove_file(&path).ok();
        path
    }

    #[test]
    fn open_keeps_existing_user_version() {
        let path = temp_db_path("v7");
        let db = NewPipeDb::create(&path).unwrap();
        db.conn().pragma_update(None, "user_version", 7).unwrap();
        db.close().unwrap();

        let db = NewPipeDb::open(&path).unwrap();
        let version: i64 = db
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 7);
        db.close().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn stream_state_writes_to_unkeyed_legacy_table() {
        let path = temp_db_path("legacy_state");
        let db = NewPipeDb::create(&path).unwrap();
        db.conn()
            .execute_batch(
                "DROP TABLE stream_state;
                 CREATE TABLE stream_state (progress_time INTEGER NOT NULL, stream_id INTEGER NOT NULL);
                 CREATE VIEW stream_state_legacy AS SELECT 1;",
            )
            .unwrap();
        db.close().unwrap();

        // The view blocks migration, so the run continues on the legacy table.
        let mut db = NewPipeDb::open(&path).unwrap();
        let tx = db.transaction().unwrap();
        let mut writer = StoreWriter::new(&tx);
        let uid = writer.upsert_stream(&sample_stream("aaa")).unwrap();
        writer.set_stream_state(uid, 500).unwrap();
        writer.set_stream_state(uid, 300).unwrap();
        tx.commit().unwrap();

        let states = db.stream_states().unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].progress_time, 300);
        db.close().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn open_rejects_missing_file() {
        let path = std::env::temp_dir().join(format!(
            "backup_bridge_missing_{}.db",
            std::process::id()
        ));
        assert!(NewPipeDb::open(&path).is_err());
    }
}
