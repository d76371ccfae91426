//! Parser for the tab-separated time-tracking export.
//!
//! Each line starts with a row-type tag. Only `recordType`, `record`, `category` and
//! `recordTag` rows are read; any other tag is ignored. A malformed known row is logged and
//! skipped so one bad line never sinks the whole import.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordType {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) emoji: String,
    pub(crate) color: String,
    pub(crate) hidden: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TimeRecord {
    pub(crate) id: i64,
    pub(crate) type_id: i64,
    pub(crate) start_ms: i64,
    pub(crate) end_ms: i64,
    pub(crate) comment: String,
}

impl TimeRecord {
    pub(crate) fn duration_ms(&self) -> i64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Category {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordTag {
    pub(crate) id: i64,
    pub(crate) type_id: i64,
    pub(crate) name: String,
    pub(crate) color: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TimeExport {
    pub(crate) record_types: BTreeMap<i64, RecordType>,
    pub(crate) records: Vec<TimeRecord>,
    pub(crate) categories: Vec<Category>,
    pub(crate) tags: Vec<RecordTag>,
    pub(crate) skipped_lines: usize,
}

fn field<'a>(fields: &[&'a str], idx: usize, what: &str) -> std::result::Result<&'a str, String> {
    fields
        .get(idx)
        .copied()
        .ok_or_else(|| format!("missing {what} (column {idx})"))
}

fn int_field(fields: &[&str], idx: usize, what: &str) -> std::result::Result<i64, String> {
    let raw = field(fields, idx, what)?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| format!("{what} is not an integer: {raw:?}"))
}

fn text_field(fields: &[&str], idx: usize) -> String {
    fields.get(idx).map(|s| s.trim().to_string()).unwrap_or_default()
}

impl TimeExport {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| BridgeError::io(e, path))?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(Self::parse(&text))
    }

    pub(crate) fn parse(text: &str) -> Self {
        let mut export = TimeExport::default();
        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let outcome = match fields[0] {
                "recordType" => Self::parse_record_type(&fields).map(|t| {
                    export.record_types.insert(t.id, t);
                }),
                "record" => Self::parse_record(&fields).map(|r| export.records.push(r)),
                "category" => Self::parse_category(&fields).map(|c| export.categories.push(c)),
                "recordTag" => Self::parse_tag(&fields).map(|t| export.tags.push(t)),
                other => {
                    debug!("line {line_no}: ignoring row type {other:?}");
                    Ok(())
                }
            };
            if let Err(reason) = outcome {
                warn!("line {line_no}: skipping {} row: {reason}", fields[0]);
                export.skipped_lines += 1;
            }
        }
        export
    }

    fn parse_record_type(fields: &[&str]) -> std::result::Result<RecordType, String> {
        Ok(RecordType {
            id: int_field(fields, 1, "record type id")?,
            name: field(fields, 2, "record type name")?.trim().to_string(),
            emoji: text_field(fields, 3),
            color: text_field(fields, 4),
            hidden: text_field(fields, 5) == "1",
        })
    }

    fn parse_record(fields: &[&str]) -> std::result::Result<TimeRecord, String> {
        let record = TimeRecord {
            id: int_field(fields, 1, "record id")?,
            type_id: int_field(fields, 2, "record type")?,
            start_ms: int_field(fields, 3, "start time")?,
            end_ms: int_field(fields, 4, "end time")?,
            comment: text_field(fields, 5),
        };
        if record.end_ms < record.start_ms {
            return Err(format!(
                "record {} ends before it starts ({} < {})",
                record.id, record.end_ms, record.start_ms
            ));
        }
        Ok(record)
    }

    fn parse_category(fields: &[&str]) -> std::result::Result<Category, String> {
        Ok(Category {
            id: int_field(fields, 1, "category id")?,
            name: field(fields, 2, "category name")?.trim().to_string(),
            color: text_field(fields, 3),
        })
    }

    fn parse_tag(fields: &[&str]) -> std::result::Result<RecordTag, String> {
        Ok(RecordTag {
            id: int_field(fields, 1, "tag id")?,
            type_id: int_field(fields, 2, "tag record type")?,
            name: field(fields, 3, "tag name")?.trim().to_string(),
            color: text_field(fields, 4),
        })
    }

    pub(crate) fn records_of_type(&self, type_id: i64) -> impl Iterator<Item = &TimeRecord> {
        self.records.iter().filter(move |r| r.type_id == type_id)
    }

    pub(crate) fn type_name(&self, type_id: i64) -> String {
        self.record_types
            .get(&type_id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| format!("#{type_id}"))
    }
}
