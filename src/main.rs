// Module declarations
mod archive;
mod cli;
mod codecs;
mod config;
mod convert;
mod error;
mod libretube;
mod loop_db;
mod newpipe_db;
mod schema;
mod timetracker;
mod types;
mod util;

use std::fs;
use std::path::Path;

use clap::Parser;
use log::{debug, info};

use archive::NewPipeArchive;
use cli::{Cli, Command};
use config::BridgeConfig;
use convert::libretube_to_newpipe::{self, StructuredOptions};
use convert::newpipe_to_libretube::{self, FlatOptions};
use convert::time_to_habits::{self, DayBoundary};
use error::BridgeError;
use libretube::FlatDocument;
use loop_db::HabitDb;
use timetracker::TimeExport;
use types::*;
use util::{blake3_hex, ensure_distinct_output, init_logging, write_atomic};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = BridgeConfig::resolve(cli.config.as_deref())?;
    debug!("config: {config:?}");

    match cli.command {
        Command::NewpipeToLibretube {
            input,
            out,
            merge,
            policy,
            history,
            json,
        } => {
            let mut inputs = vec![input.as_path()];
            inputs.extend(merge.as_deref());
            ensure_distinct_output(&out, &inputs)?;

            let policy = policy.unwrap_or(config.policy);
            let history = history || config.include_history;
            let archive = NewPipeArchive::read(&input)?;
            let db = archive.open_db()?;
            let mut target = match &merge {
                Some(path) => FlatDocument::load(path)?,
                None => FlatDocument::default(),
            };

            let report = newpipe_to_libretube::convert(
                &db,
                &mut target,
                FlatOptions {
                    policy,
                    include_history: history,
                },
            )?;
            db.close()?;
            let bytes = target.save(&out)?;

            let summary = FlatSummary {
                input: input.display().to_string(),
                merged_into: merge.map(|p| p.display().to_string()),
                policy: policy.to_string(),
                history,
                watch_history: target.watch_history.len(),
                watch_positions: target.watch_positions.len(),
                local_subscriptions: target.local_subscriptions.len(),
                playlist_bookmarks: target.playlist_bookmarks.len(),
                local_playlists: target.local_playlists.len(),
                report,
                output: output_summary(&out, &bytes),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("subscriptions: {}", summary.local_subscriptions);
                println!("playlist bookmarks: {}", summary.playlist_bookmarks);
                println!("local playlists: {}", summary.local_playlists);
                println!("watch history: {}", summary.watch_history);
                println!("watch positions: {}", summary.watch_positions);
                print_warnings(&summary.report.warnings);
                print_output(&summary.output);
            }
            Ok(())
        }

        Command::LibretubeToNewpipe {
            input,
            out,
            merge,
            policy,
            history,
            history_window_ms,
            json,
        } => {
            let mut inputs = vec![input.as_path()];
            inputs.extend(merge.as_deref());
            ensure_distinct_output(&out, &inputs)?;

            let options = StructuredOptions {
                policy: policy.unwrap_or(config.policy),
                include_history: history || config.include_history,
                history_window_ms: history_window_ms.unwrap_or(config.history_window_ms).max(0),
            };
            let doc = FlatDocument::load(&input)?;
            let archive = match &merge {
                Some(path) => NewPipeArchive::read(path)?,
                None => NewPipeArchive::create_empty()?,
            };
            let mut db = archive.open_db()?;
            let report = libretube_to_newpipe::convert(&doc, &mut db, options)?;
            let store = db.counts()?;
            let bytes = archive.write(db, &out)?;

            let summary = StructuredSummary {
                input: input.display().to_string(),
                merged_into: merge.map(|p| p.display().to_string()),
                policy: options.policy.to_string(),
                history: options.include_history,
                history_window_ms: options.history_window_ms,
                store,
                report,
                output: output_summary(&out, &bytes),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("subscriptions: {}", store.subscriptions);
                println!("streams: {}", store.streams);
                println!("playlists: {} ({} entries)", store.playlists, store.playlist_entries);
                println!("remote playlists: {}", store.remote_playlists);
                println!("stream states: {}", store.stream_states);
                println!("history rows: {}", store.history_rows);
                print_warnings(&summary.report.warnings);
                print_output(&summary.output);
            }
            Ok(())
        }

        Command::TimeToHabits {
            records,
            habits,
            out,
            mappings,
            utc_offset_minutes,
            json,
        } => {
            ensure_distinct_output(&out, &[records.as_path(), habits.as_path()])?;
            let mappings = if mappings.is_empty() {
                config.mappings.clone()
            } else {
                mappings
            };
            if mappings.is_empty() {
                return Err(BridgeError::InvalidArgument(
                    "no mappings: pass --map TYPE:HABIT[:MINUTES[:comments]] or set \"mappings\" in the config file"
                        .into(),
                )
                .into());
            }
            let offset = utc_offset_minutes.or(config.utc_offset_minutes);
            let boundary = DayBoundary::from_offset_minutes(offset)?;

            let export = TimeExport::load(&records)?;
            // Work on a private copy so the input database is never modified.
            let workdir = tempfile::Builder::new().prefix("backup-bridge-").tempdir()?;
            let work_path = workdir.path().join("habits.db");
            fs::copy(&habits, &work_path).map_err(|e| BridgeError::io(e, &habits))?;
            let mut db = HabitDb::open(&work_path)?;
            let report = time_to_habits::convert(&export, &mut db, &mappings, boundary)?;
            db.close()?;
            let bytes = fs::read(&work_path).map_err(|e| BridgeError::io(e, &work_path))?;
            write_atomic(&out, &bytes)?;

            let summary = HabitSummary {
                records: records.display().to_string(),
                habits: habits.display().to_string(),
                day_boundary: match offset {
                    Some(minutes) => format!("UTC{minutes:+} min"),
                    None => "local".to_string(),
                },
                report,
                output: output_summary(&out, &bytes),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                for m in &summary.report.mappings {
                    println!(
                        "{} -> {}: {} day(s) added, {} already checked, {} record(s) too short",
                        m.record_type_name,
                        m.habit_name,
                        m.days_inserted,
                        m.days_already_checked,
                        m.records_too_short
                    );
                }
                print_warnings(&summary.report.warnings);
                print_output(&summary.output);
            }
            Ok(())
        }

        Command::InitNewpipe { out } => {
            if out.exists() {
                eprintln!("Refusing to overwrite existing file: {}", out.display());
                std::process::exit(2);
            }
            let archive = NewPipeArchive::create_empty()?;
            let db = archive.open_db()?;
            schema::write_identity_marker(db.conn())?;
            let bytes = archive.write(db, &out)?;
            print_output(&output_summary(&out, &bytes));
            Ok(())
        }

        Command::InspectRecords { records, json } => {
            let export = TimeExport::load(&records)?;
            let mut rows: Vec<RecordTypeInfo> = export
                .record_types
                .values()
                .map(|t| {
                    let of_type: Vec<_> = export.records_of_type(t.id).collect();
                    RecordTypeInfo {
                        id: t.id,
                        name: t.name.clone(),
                        emoji: t.emoji.clone(),
                        hidden: t.hidden,
                        records: of_type.len(),
                        total_minutes: of_type.iter().map(|r| r.duration_ms()).sum::<i64>() / 60_000,
                        tags: export
                            .tags
                            .iter()
                            .filter(|tag| tag.type_id == t.id)
                            .map(|tag| tag.name.clone())
                            .collect(),
                    }
                })
                .collect();
            rows.sort_by(|a, b| b.records.cmp(&a.records).then(a.id.cmp(&b.id)));
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for row in &rows {
                    println!(
                        "{}\t{} {}\t{} records\t{} min{}",
                        row.id,
                        row.emoji,
                        row.name,
                        row.records,
                        row.total_minutes,
                        if row.hidden { "\t(hidden)" } else { "" }
                    );
                    if !row.tags.is_empty() {
                        println!("\ttags: {}", row.tags.join(", "));
                    }
                }
                println!("categories: {}", export.categories.len());
                if export.skipped_lines > 0 {
                    println!("skipped lines: {}", export.skipped_lines);
                }
            }
            Ok(())
        }

        Command::InspectHabits { habits, json } => {
            let db = HabitDb::open(&habits)?;
            let index = db.repetition_index()?;
            let rows: Vec<HabitInfo> = db
                .habits()?
                .into_iter()
                .map(|h| HabitInfo {
                    repetitions: index.get(&h.id).map_or(0, |days| days.len()),
                    boolean: h.is_boolean(),
                    id: h.id,
                    name: h.name,
                    archived: h.archived,
                })
                .collect();
            db.close()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for row in &rows {
                    let kind = if row.boolean { "yes/no" } else { "measurable" };
                    println!(
                        "{}\t{}\t{kind}\t{} repetitions{}",
                        row.id,
                        row.name,
                        row.repetitions,
                        if row.archived { "\t(archived)" } else { "" }
                    );
                }
            }
            Ok(())
        }
    }
}

fn output_summary(out: &Path, bytes: &[u8]) -> OutputSummary {
    let checksum = blake3_hex(bytes);
    info!("wrote {} ({} bytes, blake3 {checksum})", out.display(), bytes.len());
    OutputSummary {
        out: out.display().to_string(),
        bytes: bytes.len(),
        blake3: checksum,
    }
}

fn print_output(output: &OutputSummary) {
    println!("wrote {} ({} bytes)", output.out, output.bytes);
    println!("blake3: {}", output.blake3);
}

fn print_warnings(warnings: &[String]) {
    if !warnings.is_empty() {
        println!("skipped with warnings: {}", warnings.len());
    }
}
