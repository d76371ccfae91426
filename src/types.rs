use serde::Serialize;

use crate::convert::time_to_habits::HabitReport;
use crate::convert::ConversionReport;
use crate::newpipe_db::StoreCounts;

/// Printed after every command that writes a file.
#[derive(Debug, Serialize)]
pub(crate) struct OutputSummary {
    pub(crate) out: String,
    pub(crate) bytes: usize,
    pub(crate) blake3: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct FlatSummary {
    pub(crate) input: String,
    pub(crate) merged_into: Option<String>,
    pub(crate) policy: String,
    pub(crate) history: bool,
    pub(crate) watch_history: usize,
    pub(crate) watch_positions: usize,
    pub(crate) local_subscriptions: usize,
    pub(crate) playlist_bookmarks: usize,
    pub(crate) local_playlists: usize,
    pub(crate) report: ConversionReport,
    pub(crate) output: OutputSummary,
}

#[derive(Debug, Serialize)]
pub(crate) struct StructuredSummary {
    pub(crate) input: String,
    pub(crate) merged_into: Option<String>,
    pub(crate) policy: String,
    pub(crate) history: bool,
    pub(crate) history_window_ms: i64,
    pub(crate) store: StoreCounts,
    pub(crate) report: ConversionReport,
    pub(crate) output: OutputSummary,
}

#[derive(Debug, Serialize)]
pub(crate) struct HabitSummary {
    pub(crate) records: String,
    pub(crate) habits: String,
    pub(crate) day_boundary: String,
    pub(crate) report: HabitReport,
    pub(crate) output: OutputSummary,
}

#[derive(Debug, Serialize)]
pub(crate) struct RecordTypeInfo {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) emoji: String,
    pub(crate) hidden: bool,
    pub(crate) records: usize,
    pub(crate) total_minutes: i64,
    pub(crate) tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct HabitInfo {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) boolean: bool,
    pub(crate) archived: bool,
    pub(crate) repetitions: usize,
}
