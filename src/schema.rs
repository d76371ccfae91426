//! Canonical relational schema for the structured (NewPipe) backup, plus in-place repair of
//! the legacy `stream_state` table shape.

use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

/// Room schema version written into `PRAGMA user_version`.
pub(crate) const SCHEMA_VERSION: i64 = 9;

/// Identity marker expected by the consuming app's version check.
pub(crate) const IDENTITY_ROW_ID: i64 = 42;
pub(crate) const IDENTITY_HASH: &str = "7591e8039faa74d8c0517dc867af9d3e";

// ── Schema SQL ───────────────────────────────────────────────────────────

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS subscriptions (
    uid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    service_id INTEGER NOT NULL,
    url TEXT,
    name TEXT,
    avatar_url TEXT,
    subscriber_count INTEGER,
    description TEXT,
    notification_mode INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS index_subscriptions_service_id_url
    ON subscriptions (service_id, url);

CREATE TABLE IF NOT EXISTS streams (
    uid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    service_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    stream_type TEXT NOT NULL,
    duration INTEGER NOT NULL,
    uploader TEXT NOT NULL,
    uploader_url TEXT,
    thumbnail_url TEXT,
    view_count INTEGER,
    textual_upload_date TEXT,
    upload_date INTEGER,
    is_upload_date_approximation INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS index_streams_service_id_url ON streams (service_id, url);

CREATE TABLE IF NOT EXISTS playlists (
    uid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    name TEXT,
    is_thumbnail_permanent INTEGER NOT NULL DEFAULT 0,
    thumbnail_stream_id INTEGER NOT NULL,
    display_index INTEGER NOT NULL DEFAULT -1
);

CREATE TABLE IF NOT EXISTS playlist_stream_join (
    playlist_id INTEGER NOT NULL,
    stream_id INTEGER NOT NULL,
    join_index INTEGER NOT NULL,
    PRIMARY KEY (playlist_id, join_index),
    FOREIGN KEY (playlist_id) REFERENCES playlists (uid)
        ON UPDATE CASCADE ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED,
    FOREIGN KEY (stream_id) REFERENCES streams (uid)
        ON UPDATE CASCADE ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
);
CREATE INDEX IF NOT EXISTS index_playlist_stream_join_stream_id
    ON playlist_stream_join (stream_id);

CREATE TABLE IF NOT EXISTS remote_playlists (
    uid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    service_id INTEGER NOT NULL,
    name TEXT,
    url TEXT,
    thumbnail_url TEXT,
    uploader TEXT,
    display_index INTEGER NOT NULL DEFAULT -1,
    stream_count INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS index_remote_playlists_service_id_url
    ON remote_playlists (service_id, url);

CREATE TABLE IF NOT EXISTS stream_state (
    stream_id INTEGER NOT NULL,
    progress_time INTEGER NOT NULL,
    PRIMARY KEY (stream_id),
    FOREIGN KEY (stream_id) REFERENCES streams (uid)
        ON UPDATE CASCADE ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS stream_history (
    stream_id INTEGER NOT NULL,
    access_date INTEGER NOT NULL,
    repeat_count INTEGER NOT NULL,
    PRIMARY KEY (stream_id, access_date),
    FOREIGN KEY (stream_id) REFERENCES streams (uid)
        ON UPDATE CASCADE ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS index_stream_history_stream_id ON stream_history (stream_id);

CREATE TABLE IF NOT EXISTS search_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    creation_date INTEGER,
    service_id INTEGER NOT NULL,
    search TEXT
);
CREATE INDEX IF NOT EXISTS index_search_history_search ON search_history (search);

CREATE TABLE IF NOT EXISTS feed (
    stream_id INTEGER NOT NULL,
    subscription_id INTEGER NOT NULL,
    PRIMARY KEY (stream_id, subscription_id),
    FOREIGN KEY (stream_id) REFERENCES streams (uid)
        ON UPDATE CASCADE ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED,
    FOREIGN KEY (subscription_id) REFERENCES subscriptions (uid)
        ON UPDATE CASCADE ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
);

CREATE TABLE IF NOT EXISTS feed_group (
    uid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    name TEXT NOT NULL,
    icon_id INTEGER NOT NULL,
    sort_order INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS feed_group_subscription_join (
    group_id INTEGER NOT NULL,
    subscription_id INTEGER NOT NULL,
    PRIMARY KEY (group_id, subscription_id),
    FOREIGN KEY (group_id) REFERENCES feed_group (uid)
        ON UPDATE CASCADE ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED,
    FOREIGN KEY (subscription_id) REFERENCES subscriptions (uid)
        ON UPDATE CASCADE ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
);

CREATE TABLE IF NOT EXISTS feed_last_updated (
    subscription_id INTEGER PRIMARY KEY NOT NULL,
    last_updated INTEGER,
    FOREIGN KEY (subscription_id) REFERENCES subscriptions (uid)
        ON UPDATE CASCADE ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
);

CREATE TABLE IF NOT EXISTS room_master_table (
    id INTEGER PRIMARY KEY,
    identity_hash TEXT
);
";

const CANONICAL_STREAM_STATE: &str = "
CREATE TABLE stream_state (
    stream_id INTEGER NOT NULL,
    progress_time INTEGER NOT NULL,
    PRIMARY KEY (stream_id),
    FOREIGN KEY (stream_id) REFERENCES streams (uid)
        ON UPDATE CASCADE ON DELETE CASCADE
)";

/// Create every table and index in one transaction. Any failing statement rolls back all of it.
///
/// `user_version` is only stamped on an unversioned store; an existing version is left for the
/// consuming app's own migrations.
pub(crate) fn create_schema(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_SQL)?;
    let version: i64 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version == 0 {
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!("created structured schema v{SCHEMA_VERSION}");
    } else {
        debug!("ensured structured tables; keeping user_version {version}");
    }
    tx.commit()?;
    Ok(())
}

/// Outcome of [`ensure_compatible_schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchemaRepair {
    AlreadyCanonical,
    Migrated { rows_copied: usize },
    /// The table was migrated but the row copy failed; the canonical table starts empty.
    MigratedWithoutRows,
    /// Migration failed and was rolled back; the legacy table is still in place.
    LeftLegacy,
}

#[derive(Debug)]
struct ColumnInfo {
    name: String,
    pk: i64,
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare("SELECT name, pk FROM pragma_table_info(?1) ORDER BY cid")?;
    let rows = stmt.query_map([table], |row| {
        Ok(ColumnInfo {
            name: row.get(0)?,
            pk: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn stream_state_is_canonical(columns: &[ColumnInfo]) -> bool {
    columns.len() == 2
        && columns[0].name == "stream_id"
        && columns[0].pk == 1
        && columns[1].name == "progress_time"
        && columns[1].pk == 0
}

/// Bring an existing store's `stream_state` table to the canonical column order and key.
///
/// Repair failures are logged as warnings; the run continues on whatever schema survived.
pub(crate) fn ensure_compatible_schema(conn: &mut Connection) -> Result<SchemaRepair> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'stream_state'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        conn.execute_batch(CANONICAL_STREAM_STATE)?;
        info!("stream_state table was missing; created canonical table");
        return Ok(SchemaRepair::Migrated { rows_copied: 0 });
    }

    let columns = table_columns(conn, "stream_state")?;
    if stream_state_is_canonical(&columns) {
        return Ok(SchemaRepair::AlreadyCanonical);
    }
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    info!("stream_state has legacy shape {names:?}; migrating");

    match migrate_stream_state(conn) {
        Ok(repair) => Ok(repair),
        Err(e) => {
            warn!("stream_state migration failed, keeping legacy table: {e}");
            Ok(SchemaRepair::LeftLegacy)
        }
    }
}

fn migrate_stream_state(conn: &mut Connection) -> Result<SchemaRepair> {
    let tx = conn.transaction()?;
    tx.execute_batch("DROP TABLE IF EXISTS stream_state_legacy")?;
    tx.execute_batch("ALTER TABLE stream_state RENAME TO stream_state_legacy")?;
    tx.execute_batch(CANONICAL_STREAM_STATE)?;

    // Best effort: the latest offset wins when the legacy table held duplicates.
    let copied = tx.execute(
        "INSERT OR REPLACE INTO stream_state (stream_id, progress_time)
         SELECT stream_id, progress_time FROM stream_state_legacy
         WHERE stream_id IN (SELECT uid FROM streams)
         ORDER BY rowid",
        [],
    );
    let repair = match copied {
        Ok(rows) => SchemaRepair::Migrated { rows_copied: rows },
        Err(e) => {
            warn!("could not copy legacy stream_state rows: {e}");
            SchemaRepair::MigratedWithoutRows
        }
    };

    tx.execute_batch("DROP TABLE stream_state_legacy")?;
    tx.commit()?;
    info!("stream_state migrated: {repair:?}");
    Ok(repair)
}

/// Insert (or refresh) the identity marker row.
pub(crate) fn write_identity_marker(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO room_master_table (id, identity_hash) VALUES (?1, ?2)",
        rusqlite::params![IDENTITY_ROW_ID, IDENTITY_HASH],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn create_schema_builds_every_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        create_schema(&mut conn).unwrap();
        let names = table_names(&conn);
        for table in [
            "subscriptions",
            "streams",
            "playlists",
            "playlist_stream_join",
            "remote_playlists",
            "stream_state",
            "stream_history",
            "room_master_table",
        ] {
            assert!(names.iter().any(|n| n == table), "missing {table}");
        }
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        assert_eq!(
            ensure_compatible_schema(&mut conn).unwrap(),
            SchemaRepair::AlreadyCanonical
        );
    }

    #[test]
    fn legacy_stream_state_is_migrated_with_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE streams (uid INTEGER PRIMARY KEY, url TEXT);
             INSERT INTO streams (uid, url) VALUES (1, 'a'), (2, 'b');
             CREATE TABLE stream_state (progress_time INTEGER NOT NULL, stream_id INTEGER NOT NULL);
             INSERT INTO stream_state VALUES (1000, 1), (2000, 2), (3000, 1), (50, 99);",
        )
        .unwrap();

        let repair = ensure_compatible_schema(&mut conn).unwrap();
        assert_eq!(repair, SchemaRepair::Migrated { rows_copied: 3 });

        let columns = table_columns(&conn, "stream_state").unwrap();
        assert!(stream_state_is_canonical(&columns));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM stream_state", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 2);
        let progress: i64 = conn
            .query_row(
                "SELECT progress_time FROM stream_state WHERE stream_id = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(progress, 3000);
        assert!(!table_names(&conn).iter().any(|n| n == "stream_state_legacy"));
    }

    #[test]
    fn missing_key_counts_as_legacy() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE streams (uid INTEGER PRIMARY KEY);
             CREATE TABLE stream_state (stream_id INTEGER NOT NULL, progress_time INTEGER NOT NULL);",
        )
        .unwrap();
        let repair = ensure_compatible_schema(&mut conn).unwrap();
        assert_eq!(repair, SchemaRepair::Migrated { rows_copied: 0 });
    }

    #[test]
    fn uncopyable_rows_still_leave_canonical_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        // No streams table: the copy step's subquery fails.
        conn.execute_batch("CREATE TABLE stream_state (a INTEGER, b INTEGER);")
            .unwrap();
        let repair = ensure_compatible_schema(&mut conn).unwrap();
        assert_eq!(repair, SchemaRepair::MigratedWithoutRows);
        let columns = table_columns(&conn, "stream_state").unwrap();
        assert!(stream_state_is_canonical(&columns));
    }

    fn user_version(conn: &Connection) -> i64 {
        conn.query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn create_schema_keeps_existing_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        create_schema(&mut conn).unwrap();
        conn.pragma_update(None, "user_version", 7).unwrap();
        create_schema(&mut conn).unwrap();
        assert_eq!(user_version(&conn), 7);
    }

    #[test]
    fn failing_statement_rolls_back_whole_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        // An index already owns the name, so CREATE TABLE stream_history fails mid-batch.
        conn.execute_batch(
            "CREATE TABLE holder (x INTEGER);
             CREATE INDEX stream_history ON holder (x);",
        )
        .unwrap();
        assert!(create_schema(&mut conn).is_err());
        assert_eq!(table_names(&conn), vec!["holder".to_string()]);
        assert_eq!(user_version(&conn), 0);
    }

    #[test]
    fn failed_migration_leaves_legacy_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        // A view squatting on the scratch name makes the first migration step fail.
        conn.execute_batch(
            "CREATE TABLE streams (uid INTEGER PRIMARY KEY);
             CREATE TABLE stream_state (progress_time INTEGER NOT NULL, stream_id INTEGER NOT NULL);
             INSERT INTO stream_state VALUES (1000, 1);
             CREATE VIEW stream_state_legacy AS SELECT 1;",
        )
        .unwrap();
        let repair = ensure_compatible_schema(&mut conn).unwrap();
        assert_eq!(repair, SchemaRepair::LeftLegacy);
        let columns = table_columns(&conn, "stream_state").unwrap();
        assert!(!stream_state_is_canonical(&columns));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM stream_state", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
