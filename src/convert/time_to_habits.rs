//! Time-tracking records -> checked days on boolean habits.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{FixedOffset, Local, TimeZone};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::codecs::calendar_date;
use crate::error::{BridgeError, Result};
use crate::loop_db::{Habit, HabitDb, Repetition, CHECKED};
use crate::timetracker::{TimeExport, TimeRecord};

/// One record type feeding one habit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct HabitMapping {
    pub(crate) record_type: i64,
    pub(crate) habit: i64,
    #[serde(default)]
    pub(crate) min_minutes: i64,
    #[serde(default)]
    pub(crate) copy_comments: bool,
}

impl HabitMapping {
    fn min_duration_ms(&self) -> i64 {
        self.min_minutes.max(0).saturating_mul(60_000)
    }
}

/// `TYPE:HABIT[:MINUTES[:comments]]`
impl FromStr for HabitMapping {
    type Err = BridgeError;

    fn from_str(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(BridgeError::InvalidArgument(format!(
                "mapping {raw:?} must look like TYPE:HABIT[:MINUTES[:comments]]"
            )));
        }
        let number = |value: &str, what: &str| {
            value.parse::<i64>().map_err(|_| {
                BridgeError::InvalidArgument(format!("mapping {raw:?}: {what} {value:?} is not a number"))
            })
        };
        let min_minutes = match parts.get(2) {
            Some(v) if !v.is_empty() => number(v, "minutes")?,
            _ => 0,
        };
        if min_minutes < 0 {
            return Err(BridgeError::InvalidArgument(format!(
                "mapping {raw:?}: minutes must not be negative"
            )));
        }
        let copy_comments = match parts.get(3) {
            None => false,
            Some(flag) if flag.eq_ignore_ascii_case("comments") => true,
            Some(flag) => {
                return Err(BridgeError::InvalidArgument(format!(
                    "mapping {raw:?}: unknown flag {flag:?} (expected \"comments\")"
                )));
            }
        };
        Ok(Self {
            record_type: number(parts[0], "record type")?,
            habit: number(parts[1], "habit")?,
            min_minutes,
            copy_comments,
        })
    }
}

/// Where one calendar day ends and the next begins.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DayBoundary {
    Local,
    Fixed(FixedOffset),
}

impl DayBoundary {
    pub(crate) fn from_offset_minutes(minutes: Option<i32>) -> Result<Self> {
        match minutes {
            None => Ok(Self::Local),
            Some(m) => FixedOffset::east_opt(m.saturating_mul(60))
                .map(Self::Fixed)
                .ok_or_else(|| BridgeError::InvalidArgument(format!("UTC offset out of range: {m} minutes"))),
        }
    }

    /// Epoch millis of the midnight that starts the day containing `millis`.
    pub(crate) fn day_start(&self, millis: i64) -> Option<i64> {
        match self {
            Self::Local => midnight_in(&Local, millis),
            Self::Fixed(offset) => midnight_in(offset, millis),
        }
    }
}

fn midnight_in<Tz: TimeZone>(tz: &Tz, millis: i64) -> Option<i64> {
    let local = tz.timestamp_millis_opt(millis).single()?;
    let midnight = local.date_naive().and_hms_opt(0, 0, 0)?;
    // A DST jump can skip midnight; the earliest valid instant of that date stands in for it.
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct MappingReport {
    pub(crate) record_type: i64,
    pub(crate) record_type_name: String,
    pub(crate) habit: i64,
    pub(crate) habit_name: String,
    pub(crate) records_considered: usize,
    pub(crate) records_too_short: usize,
    pub(crate) days_inserted: usize,
    pub(crate) days_already_checked: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct HabitReport {
    pub(crate) mappings: Vec<MappingReport>,
    pub(crate) inserted: usize,
    pub(crate) skipped_existing: usize,
    pub(crate) warnings: Vec<String>,
}

impl HabitReport {
    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

struct PendingDay {
    notes: Vec<String>,
}

/// Insert a checked repetition for every qualifying day not yet recorded.
///
/// All rows go in through one transaction; running twice with the same inputs inserts nothing
/// the second time.
pub(crate) fn convert(
    export: &TimeExport,
    db: &mut HabitDb,
    mappings: &[HabitMapping],
    boundary: DayBoundary,
) -> Result<HabitReport> {
    let mut report = HabitReport::default();
    let habits: HashMap<i64, Habit> = db.habits()?.into_iter().map(|h| (h.id, h)).collect();
    let existing = db.repetition_index()?;
    let with_notes = db.has_notes();

    // (habit, day start) -> notes gathered so far; ordered so insertion is deterministic.
    let mut pending: BTreeMap<(i64, i64), PendingDay> = BTreeMap::new();

    for mapping in mappings {
        let type_name = export.type_name(mapping.record_type);
        let Some(habit) = habits.get(&mapping.habit) else {
            report.warn(format!(
                "skipping mapping {type_name} -> habit #{}: no such habit",
                mapping.habit
            ));
            continue;
        };
        if !habit.is_boolean() {
            report.warn(format!(
                "skipping mapping {type_name} -> '{}' (#{}): not a yes/no habit",
                habit.name, habit.id
            ));
            continue;
        }
        if habit.archived {
            report.warn(format!("habit '{}' (#{}) is archived", habit.name, habit.id));
        }
        if !export.record_types.contains_key(&mapping.record_type) {
            report.warn(format!(
                "record type #{} is not defined in the export",
                mapping.record_type
            ));
        }
        if mapping.copy_comments && !with_notes {
            report.warn(format!(
                "habit database has no notes column; comments for '{}' are dropped",
                habit.name
            ));
        }

        let mut entry = MappingReport {
            record_type: mapping.record_type,
            record_type_name: type_name.clone(),
            habit: habit.id,
            habit_name: habit.name.clone(),
            ..MappingReport::default()
        };

        let mut records: Vec<&TimeRecord> = export.records_of_type(mapping.record_type).collect();
        records.sort_by_key(|r| (r.start_ms, r.id));

        let min_ms = mapping.min_duration_ms();
        let mut days: BTreeMap<i64, Vec<&TimeRecord>> = BTreeMap::new();
        for record in records {
            entry.records_considered += 1;
            if record.duration_ms() < min_ms {
                entry.records_too_short += 1;
                debug!(
                    "record {} ({type_name}) lasted {}s, below {} min",
                    record.id,
                    record.duration_ms() / 1000,
                    mapping.min_minutes
                );
                continue;
            }
            match boundary.day_start(record.start_ms) {
                Some(day) => days.entry(day).or_default().push(record),
                None => report.warn(format!(
                    "skipping record {} ({type_name}): start {} is out of range",
                    record.id, record.start_ms
                )),
            }
        }

        let habit_days = existing.get(&habit.id);
        for (day, day_records) in days {
            if habit_days.is_some_and(|d| d.contains_key(&day)) {
                entry.days_already_checked += 1;
                debug!("'{}' already has {}", habit.name, calendar_date(day));
                continue;
            }
            let slot = pending.entry((habit.id, day)).or_insert_with(|| {
                entry.days_inserted += 1;
                PendingDay { notes: Vec::new() }
            });
            if mapping.copy_comments && with_notes {
                for record in day_records {
                    let comment = record.comment.trim();
                    if !comment.is_empty() && !slot.notes.iter().any(|n| n == comment) {
                        slot.notes.push(comment.to_string());
                    }
                }
            }
        }

        report.skipped_existing += entry.days_already_checked;
        report.mappings.push(entry);
    }

    let mut rows: Vec<Repetition> = pending
        .into_iter()
        .map(|((habit, timestamp), day)| Repetition {
            habit,
            timestamp,
            value: CHECKED,
            notes: (!day.notes.is_empty()).then(|| day.notes.join("; ")),
        })
        .collect();
    rows.sort_by_key(|r| (r.timestamp, r.habit));

    let tx = db.transaction()?;
    for row in &rows {
        HabitDb::insert_repetition(&tx, row, with_notes)?;
    }
    tx.commit()?;

    report.inserted = rows.len();
    info!(
        "habits: {} day(s) checked, {} already present",
        report.inserted, report.skipped_existing
    );
    Ok(report)
}
