use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::convert::ConflictPolicy;
use crate::convert::time_to_habits::HabitMapping;

#[derive(Parser)]
#[command(name = "backup-bridge")]
#[command(about = "Convert between NewPipe, LibreTube and habit-tracker backups", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Log per-record detail (same as RUST_LOG=debug).
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,
    /// JSON config file (default: $BACKUP_BRIDGE_CONFIG or ./backup-bridge.json)
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Convert a NewPipe backup (.zip) into a LibreTube backup (.json).
    NewpipeToLibretube {
        input: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        /// Existing LibreTube backup to merge into
        #[arg(long)]
        merge: Option<PathBuf>,
        /// Playlist conflict policy
        #[arg(long, value_enum)]
        policy: Option<ConflictPolicy>,
        /// Also convert watch history and playback positions
        #[arg(long)]
        history: bool,
        #[arg(long)]
        json: bool,
    },

    /// Convert a LibreTube backup (.json) into a NewPipe backup (.zip).
    LibretubeToNewpipe {
        input: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        /// Existing NewPipe backup to merge into
        #[arg(long)]
        merge: Option<PathBuf>,
        /// Playlist conflict policy
        #[arg(long, value_enum)]
        policy: Option<ConflictPolicy>,
        /// Also convert watch history and playback positions
        #[arg(long)]
        history: bool,
        /// Merge window for watch events of one video, in milliseconds
        #[arg(long)]
        history_window_ms: Option<i64>,
        #[arg(long)]
        json: bool,
    },

    /// Mark habit days from time-tracker records.
    TimeToHabits {
        /// Time-tracker export (.tsv)
        records: PathBuf,
        /// Loop Habit Tracker database
        habits: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        /// TYPE:HABIT[:MINUTES[:comments]] (repeatable; overrides config mappings)
        #[arg(long = "map")]
        mappings: Vec<HabitMapping>,
        /// Day boundary as minutes east of UTC (default: local time zone)
        #[arg(long, allow_hyphen_values = true)]
        utc_offset_minutes: Option<i32>,
        #[arg(long)]
        json: bool,
    },

    /// Create an empty NewPipe backup.
    InitNewpipe {
        #[arg(short, long)]
        out: PathBuf,
    },

    /// List record types in a time-tracker export.
    InspectRecords {
        records: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// List habits in a Loop Habit Tracker database.
    InspectHabits {
        habits: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_mappings_and_policy() {
        let cli = Cli::parse_from([
            "backup-bridge",
            "-v",
            "time-to-habits",
            "r.tsv",
            "h.db",
            "--out",
            "o.db",
            "--map",
            "1:7:5:comments",
            "--map",
            "2:8",
            "--utc-offset-minutes",
            "-300",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Command::TimeToHabits { mappings, utc_offset_minutes, .. } => {
                assert_eq!(mappings.len(), 2);
                assert!(mappings[0].copy_comments);
                assert_eq!(utc_offset_minutes, Some(-300));
            }
            _ => panic!("wrong command"),
        }

        let cli = Cli::parse_from([
            "backup-bridge",
            "libretube-to-newpipe",
            "in.json",
            "--out",
            "o.zip",
            "--policy",
            "source-only",
        ]);
        match cli.command {
            Command::LibretubeToNewpipe { policy, history, .. } => {
                assert_eq!(policy, Some(ConflictPolicy::SourceOnly));
                assert!(!history);
            }
            _ => panic!("wrong command"),
        }
    }
}
