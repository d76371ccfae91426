//! Handle over the habit-tracking (Loop Habit Tracker) SQLite database.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::debug;
use rusqlite::{params, Connection, Transaction};

use crate::error::{BridgeError, Result};

/// `Habits.type` for yes/no habits.
pub(crate) const BOOLEAN_HABIT_TYPE: i64 = 0;
/// `Repetitions.value` for a manually checked day.
pub(crate) const CHECKED: i64 = 2;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Habit {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) habit_type: i64,
    pub(crate) archived: bool,
}

impl Habit {
    pub(crate) fn is_boolean(&self) -> bool {
        self.habit_type == BOOLEAN_HABIT_TYPE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Repetition {
    pub(crate) habit: i64,
    pub(crate) timestamp: i64,
    pub(crate) value: i64,
    pub(crate) notes: Option<String>,
}

pub(crate) struct HabitDb {
    conn: Connection,
    has_notes: bool,
}

impl HabitDb {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BridgeError::Malformed(format!(
                "habit database not found: {}",
                path.display()
            )));
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub(crate) fn from_connection(conn: Connection) -> Result<Self> {
        let mut columns = HashSet::new();
        {
            let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('Repetitions')")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                columns.insert(row?.to_ascii_lowercase());
            }
        }
        if columns.is_empty() {
            return Err(BridgeError::UnsupportedSchema(
                "habit database has no Repetitions table".into(),
            ));
        }
        let has_notes = columns.contains("notes");
        if !has_notes {
            debug!("Repetitions has no notes column; comments will not be copied");
        }
        Ok(Self { conn, has_notes })
    }

    pub(crate) fn has_notes(&self) -> bool {
        self.has_notes
    }

    pub(crate) fn habits(&self) -> Result<Vec<Habit>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, COALESCE(type, 0), COALESCE(archived, 0)
             FROM Habits ORDER BY COALESCE(position, id), id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Habit {
                id: row.get(0)?,
                name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                habit_type: row.get(2)?,
                archived: row.get::<_, i64>(3)? != 0,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub(crate) fn repetitions(&self) -> Result<Vec<Repetition>> {
        let sql = if self.has_notes {
            "SELECT habit, timestamp, value, notes FROM Repetitions ORDER BY habit, timestamp"
        } else {
            "SELECT habit, timestamp, value, NULL FROM Repetitions ORDER BY habit, timestamp"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(Repetition {
                habit: row.get(0)?,
                timestamp: row.get(1)?,
                value: row.get(2)?,
                notes: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// habit id -> (day timestamp -> value)
    pub(crate) fn repetition_index(&self) -> Result<HashMap<i64, HashMap<i64, i64>>> {
        let mut index: HashMap<i64, HashMap<i64, i64>> = HashMap::new();
        for rep in self.repetitions()? {
            index.entry(rep.habit).or_default().insert(rep.timestamp, rep.value);
        }
        Ok(index)
    }

    pub(crate) fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    pub(crate) fn insert_repetition(
        tx: &Transaction<'_>,
        rep: &Repetition,
        with_notes: bool,
    ) -> Result<()> {
        if with_notes {
            tx.execute(
                "INSERT INTO Repetitions (habit, timestamp, value, notes) VALUES (?1, ?2, ?3, ?4)",
                params![rep.habit, rep.timestamp, rep.value, rep.notes.as_deref().unwrap_or("")],
            )?;
        } else {
            tx.execute(
                "INSERT INTO Repetitions (habit, timestamp, value) VALUES (?1, ?2, ?3)",
                params![rep.habit, rep.timestamp, rep.value],
            )?;
        }
        Ok(())
    }

    pub(crate) fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| BridgeError::Sqlite(e))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const LOOP_SCHEMA: &str = "
        CREATE TABLE Habits (
            id INTEGER PRIMARY KEY AUTOINCREMENT, archived INTEGER, color INTEGER,
            description TEXT, freq_den INTEGER, freq_num INTEGER, highlight INTEGER,
            name TEXT, position INTEGER, reminder_hour INTEGER, reminder_min INTEGER,
            reminder_days INTEGER NOT NULL DEFAULT 127, type INTEGER NOT NULL DEFAULT 0,
            target_type INTEGER NOT NULL DEFAULT 0, target_value REAL NOT NULL DEFAULT 0,
            unit TEXT NOT NULL DEFAULT '', question TEXT, uuid TEXT
        );
        CREATE TABLE Repetitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            habit INTEGER NOT NULL REFERENCES Habits(id),
            timestamp INTEGER NOT NULL,
            value INTEGER NOT NULL,
            notes TEXT
        );
        CREATE UNIQUE INDEX idx_repetitions_habit_timestamp ON Repetitions (habit, timestamp);
    ";

    pub(crate) fn sample_db() -> HabitDb {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LOOP_SCHEMA).unwrap();
        conn.execute_batch(
            "INSERT INTO Habits (id, name, type, archived, position) VALUES
                 (7, 'Read', 0, 0, 0), (8, 'Run km', 1, 0, 1), (9, 'Old', 0, 1, 2);",
        )
        .unwrap();
        HabitDb::from_connection(conn).unwrap()
    }

    #[test]
    fn reads_habits_with_types() {
        let db = sample_db();
        let habits = db.habits().unwrap();
        assert_eq!(habits.len(), 3);
        assert!(habits[0].is_boolean());
        assert!(!habits[1].is_boolean());
        assert!(habits[2].archived);
        assert!(db.has_notes());
    }

    #[test]
    fn inserts_and_indexes_repetitions() {
        let mut db = sample_db();
        let tx = db.transaction().unwrap();
        let rep = Repetition {
            habit: 7,
            timestamp: 86_400_000,
            value: CHECKED,
            notes: Some("nice".into()),
        };
        HabitDb::insert_repetition(&tx, &rep, true).unwrap();
        tx.commit().unwrap();
        let index = db.repetition_index().unwrap();
        assert_eq!(index[&7][&86_400_000], CHECKED);
        assert_eq!(db.repetitions().unwrap()[0].notes.as_deref(), Some("nice"));
    }

    #[test]
    fn old_schema_without_notes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Habits (id INTEGER PRIMARY KEY, name TEXT, type INTEGER, archived INTEGER, position INTEGER);
             CREATE TABLE Repetitions (id INTEGER PRIMARY KEY, habit INTEGER, timestamp INTEGER, value INTEGER);",
        )
        .unwrap();
        let db = HabitDb::from_connection(conn).unwrap();
        assert!(!db.has_notes());
        assert!(db.repetitions().unwrap().is_empty());
    }

    #[test]
    fn rejects_foreign_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE other (id INTEGER);").unwrap();
        assert!(HabitDb::from_connection(conn).is_err());
    }
}
