//! Flat document -> structured store.
//!
//! One run is one transaction. Phases run in a fixed order (subscriptions, local playlists,
//! remote bookmarks, watch data) and any phase-level error rolls the whole run back. A single
//! malformed entry inside a phase is skipped with a warning instead.

use std::collections::HashMap;

use log::{debug, info};

use crate::codecs::{
    canonical_watch_url, channel_url, extract_channel_id, format_millis, normalize_to_millis,
    playlist_url, uploader_absolute,
};
use crate::config::DEFAULT_HISTORY_WINDOW_MS;
use crate::convert::{ConflictPolicy, ConversionReport};
use crate::error::Result;
use crate::libretube::{FlatDocument, HistoryEntry, LocalPlaylist, PlaylistVideo};
use crate::newpipe_db::{
    NewPipeDb, NewRemotePlaylist, NewStream, NewSubscription, StoreWriter, WatchWrite,
};
use crate::schema::write_identity_marker;

#[derive(Debug, Clone, Copy)]
pub(crate) struct StructuredOptions {
    pub(crate) policy: ConflictPolicy,
    pub(crate) include_history: bool,
    pub(crate) history_window_ms: i64,
}

impl Default for StructuredOptions {
    fn default() -> Self {
        Self {
            policy: ConflictPolicy::default(),
            include_history: false,
            history_window_ms: DEFAULT_HISTORY_WINDOW_MS,
        }
    }
}

pub(crate) fn convert(
    doc: &FlatDocument,
    db: &mut NewPipeDb,
    options: StructuredOptions,
) -> Result<ConversionReport> {
    let mut report = ConversionReport::default();
    let tx = db.transaction()?;
    let mut writer = StoreWriter::new(&tx);

    import_subscriptions(doc, &writer, &mut report)?;
    if options.policy == ConflictPolicy::TargetOnly {
        debug!("target-only: leaving stored playlists and bookmarks untouched");
    } else {
        import_playlists(doc, &mut writer, options.policy, &mut report)?;
        import_bookmarks(doc, &writer, &mut report)?;
    }
    if options.include_history {
        import_history(doc, &mut writer, options.history_window_ms, &mut report)?;
        import_positions(doc, &mut writer, &mut report)?;
    }

    write_identity_marker(&tx)?;
    drop(writer);
    tx.commit()?;

    info!(
        "structured: {} subscriptions, {} playlists ({} videos), {} bookmarks, \
         {} history rows (+{} merged), {} positions",
        report.subscriptions_written,
        report.playlists_written,
        report.videos_written,
        report.bookmarks_written,
        report.history_written,
        report.history_merged,
        report.positions_written
    );
    Ok(report)
}

// ── Phases ───────────────────────────────────────────────────────────────

fn import_subscriptions(
    doc: &FlatDocument,
    writer: &StoreWriter<'_>,
    report: &mut ConversionReport,
) -> Result<()> {
    let removed = writer.delete_platform_subscriptions()?;
    if removed > 0 {
        debug!("replacing {removed} stored subscriptions");
    }
    for sub in &doc.local_subscriptions {
        let channel_id = if sub.channel_id.trim().is_empty() {
            extract_channel_id(&sub.url)
        } else {
            Some(sub.channel_id.trim().to_string())
        };
        let Some(channel_id) = channel_id else {
            report.subscriptions_skipped += 1;
            report.warn(format!(
                "skipping subscription '{}': no channel id (url {:?})",
                sub.name, sub.url
            ));
            continue;
        };
        let inserted = writer.insert_subscription(&NewSubscription {
            url: channel_url(&channel_id),
            name: sub.name.clone(),
            avatar_url: sub.avatar.clone(),
        })?;
        if inserted {
            report.subscriptions_written += 1;
        } else {
            report.subscriptions_skipped += 1;
            report.warn(format!("skipping duplicate subscription {channel_id} ('{}')", sub.name));
        }
    }
    Ok(())
}

fn import_playlists(
    doc: &FlatDocument,
    writer: &mut StoreWriter<'_>,
    policy: ConflictPolicy,
    report: &mut ConversionReport,
) -> Result<()> {
    if policy == ConflictPolicy::SourceOnly {
        let removed = writer.delete_all_playlists()?;
        debug!("source-only: removed {removed} stored playlists");
    }
    // Decided once per name, against what was stored before this run.
    let mut decisions: HashMap<&str, bool> = HashMap::new();

    for playlist in &doc.local_playlists {
        let name = playlist.playlist.name.as_str();
        let import = match decisions.get(name) {
            Some(&import) => import,
            None => {
                let existing = writer.playlist_uids_by_name(name)?;
                let import = if existing.is_empty() {
                    true
                } else if policy == ConflictPolicy::TargetWins {
                    report.playlists_kept += 1;
                    debug!("playlist '{name}' already stored; keeping it");
                    false
                } else {
                    for uid in existing {
                        writer.delete_playlist(uid)?;
                    }
                    report.playlists_replaced += 1;
                    true
                };
                decisions.insert(name, import);
                import
            }
        };
        if !import {
            continue;
        }
        import_playlist(playlist, writer, report)?;
    }
    Ok(())
}

fn import_playlist(
    playlist: &LocalPlaylist,
    writer: &mut StoreWriter<'_>,
    report: &mut ConversionReport,
) -> Result<()> {
    let name = &playlist.playlist.name;
    let display_index = writer.next_playlist_display_index()?;
    let playlist_uid = writer.insert_playlist(name, display_index)?;

    let mut join_index = 0;
    for video in &playlist.videos {
        let video_id = video.video_id.trim();
        if video_id.is_empty() {
            report.videos_skipped += 1;
            report.warn(format!(
                "playlist '{name}': skipping entry {} ({:?}) with no video id",
                video.id,
                video.title.as_deref().unwrap_or("")
            ));
            continue;
        }
        let stream_uid = writer.upsert_stream(&stream_from_video(video_id, video))?;
        if join_index == 0 {
            writer.set_playlist_thumbnail(playlist_uid, stream_uid)?;
        }
        writer.insert_playlist_entry(playlist_uid, stream_uid, join_index)?;
        join_index += 1;
    }
    report.videos_written += join_index as usize;
    report.playlists_written += 1;
    Ok(())
}

fn import_bookmarks(
    doc: &FlatDocument,
    writer: &StoreWriter<'_>,
    report: &mut ConversionReport,
) -> Result<()> {
    writer.delete_platform_remote_playlists()?;
    for (idx, bookmark) in doc.playlist_bookmarks.iter().enumerate() {
        let playlist_id = bookmark.playlist_id.trim();
        if playlist_id.is_empty() {
            report.bookmarks_skipped += 1;
            report.warn(format!(
                "skipping bookmark {:?} with no playlist id",
                bookmark.playlist_name.as_deref().unwrap_or("")
            ));
            continue;
        }
        let name = bookmark
            .playlist_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| playlist_id.to_string());
        let inserted = writer.insert_remote_playlist(&NewRemotePlaylist {
            name,
            url: playlist_url(playlist_id),
            thumbnail_url: bookmark.thumbnail_url.clone(),
            uploader: bookmark.uploader.clone(),
            display_index: idx as i64,
            stream_count: Some(bookmark.videos.max(0)),
        })?;
        if inserted {
            report.bookmarks_written += 1;
        } else {
            report.bookmarks_skipped += 1;
            report.warn(format!("skipping duplicate bookmark {playlist_id}"));
        }
    }
    Ok(())
}

fn import_history(
    doc: &FlatDocument,
    writer: &mut StoreWriter<'_>,
    window_ms: i64,
    report: &mut ConversionReport,
) -> Result<()> {
    for entry in &doc.watch_history {
        let video_id = entry.video_id.trim();
        if video_id.is_empty() {
            report.history_skipped += 1;
            report.warn(format!(
                "skipping history entry {:?} with no video id",
                entry.title.as_deref().unwrap_or("")
            ));
            continue;
        }
        let stream_uid = writer.upsert_stream(&stream_from_history(video_id, entry))?;
        let access_date = normalize_to_millis(entry.access_date);
        match writer.record_watch(stream_uid, access_date, 1, window_ms)? {
            WatchWrite::Inserted => report.history_written += 1,
            WatchWrite::Merged { access_date: kept } => {
                report.history_merged += 1;
                debug!(
                    "{video_id}: watch at {} merged into {}",
                    format_millis(access_date),
                    format_millis(kept)
                );
            }
        }
    }
    Ok(())
}

fn import_positions(
    doc: &FlatDocument,
    writer: &mut StoreWriter<'_>,
    report: &mut ConversionReport,
) -> Result<()> {
    for position in &doc.watch_positions {
        let video_id = position.video_id.trim();
        let stream_uid = if video_id.is_empty() {
            None
        } else {
            writer.stream_uid(&canonical_watch_url(video_id))?
        };
        let Some(stream_uid) = stream_uid else {
            report.positions_skipped += 1;
            report.warn(format!(
                "skipping position for {video_id:?}: no stored stream for it"
            ));
            continue;
        };
        writer.set_stream_state(stream_uid, position.position.max(0))?;
        report.positions_written += 1;
    }
    Ok(())
}

// ── Entry -> stream metadata ─────────────────────────────────────────────

struct VideoMeta<'a> {
    title: Option<&'a str>,
    upload_date: Option<&'a str>,
    uploader: Option<&'a str>,
    uploader_url: Option<&'a str>,
    thumbnail_url: Option<&'a str>,
    duration: Option<i64>,
}

fn new_stream(video_id: &str, meta: VideoMeta<'_>) -> NewStream {
    let textual = meta.upload_date.map(str::trim).filter(|d| !d.is_empty());
    NewStream {
        url: canonical_watch_url(video_id),
        title: meta.title.unwrap_or_default().to_string(),
        duration: meta.duration.unwrap_or(0).max(0),
        uploader: meta.uploader.unwrap_or_default().to_string(),
        uploader_url: meta
            .uploader_url
            .filter(|u| !u.trim().is_empty())
            .map(uploader_absolute),
        thumbnail_url: meta.thumbnail_url.map(str::to_string),
        textual_upload_date: textual.map(str::to_string),
        upload_date: textual.map(|d| normalize_to_millis(d)),
    }
}

fn stream_from_video(video_id: &str, video: &PlaylistVideo) -> NewStream {
    new_stream(
        video_id,
        VideoMeta {
            title: video.title.as_deref(),
            upload_date: video.upload_date.as_deref(),
            uploader: video.uploader.as_deref(),
            uploader_url: video.uploader_url.as_deref(),
            thumbnail_url: video.thumbnail_url.as_deref(),
            duration: video.duration,
        },
    )
}

fn stream_from_history(video_id: &str, entry: &HistoryEntry) -> NewStream {
    new_stream(
        video_id,
        VideoMeta {
            title: entry.title.as_deref(),
            upload_date: entry.upload_date.as_deref(),
            uploader: entry.uploader.as_deref(),
            uploader_url: entry.uploader_url.as_deref(),
            thumbnail_url: entry.thumbnail_url.as_deref(),
            duration: entry.duration,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::newpipe_to_libretube::{self, tests::sample_store, FlatOptions};
    use crate::libretube::{PlaylistBookmark, PlaylistHeader, Subscription, WatchPosition};

    fn video(id: i64, video_id: &str) -> PlaylistVideo {
        PlaylistVideo {
            id,
            playlist_id: 1,
            video_id: video_id.into(),
            title: Some(format!("Video {video_id}")),
            upload_date: Some("2023-04-24".into()),
            uploader: Some("Someone".into()),
            uploader_url: Some("/channel/UCup".into()),
            duration: Some(61),
            ..PlaylistVideo::default()
        }
    }

    fn playlist(name: &str, ids: &[&str]) -> LocalPlaylist {
        LocalPlaylist {
            playlist: PlaylistHeader { id: 1, name: name.into(), thumbnail_url: String::new() },
            videos: ids.iter().enumerate().map(|(i, v)| video(i as i64 + 1, v)).collect(),
        }
    }

    fn watched(video_id: &str, access_date: i64) -> HistoryEntry {
        HistoryEntry {
            video_id: video_id.into(),
            title: Some("t".into()),
            access_date,
            ..HistoryEntry::default()
        }
    }

    fn with_history(window: i64) -> StructuredOptions {
        StructuredOptions { include_history: true, history_window_ms: window, ..StructuredOptions::default() }
    }

    fn playlist_video_ids(db: &NewPipeDb, name: &str) -> Vec<String> {
        let row = db.playlists().unwrap().into_iter().find(|p| p.name == name).unwrap();
        db.playlist_streams(row.uid)
            .unwrap()
            .iter()
            .map(|s| crate::codecs::extract_video_id(&s.url).unwrap())
            .collect()
    }

    #[test]
    fn round_trip_preserves_counts_and_order() {
        let source = sample_store();
        source
            .conn()
            .execute("DELETE FROM subscriptions WHERE url NOT LIKE '%youtube.com%'", [])
            .unwrap();
        let mut flat = FlatDocument::default();
        newpipe_to_libretube::convert(&source, &mut flat, FlatOptions::default()).unwrap();

        let mut back = NewPipeDb::create_in_memory().unwrap();
        convert(&flat, &mut back, StructuredOptions::default()).unwrap();

        let before = source.counts().unwrap();
        let after = back.counts().unwrap();
        assert_eq!(after.subscriptions, before.subscriptions);
        assert_eq!(after.playlists, before.playlists);
        assert_eq!(after.remote_playlists, before.remote_playlists);
        for name in ["Mix", "Later"] {
            assert_eq!(playlist_video_ids(&back, name), playlist_video_ids(&source, name));
        }
        assert_eq!(after.history_rows, 0);
    }

    #[test]
    fn first_member_becomes_thumbnail() {
        let doc = FlatDocument {
            local_playlists: vec![playlist("Mix", &["bbb", "", "aaa"])],
            ..FlatDocument::default()
        };
        let mut db = NewPipeDb::create_in_memory().unwrap();
        let report = convert(&doc, &mut db, StructuredOptions::default()).unwrap();
        assert_eq!(report.videos_skipped, 1);
        assert_eq!(playlist_video_ids(&db, "Mix"), vec!["bbb", "aaa"]);
        let stored = &db.playlists().unwrap()[0];
        let first = &db.playlist_streams(stored.uid).unwrap()[0];
        assert_eq!(stored.thumbnail_stream_id, first.uid);
        assert_eq!(first.uploader_url.as_deref(), Some("https://www.youtube.com/channel/UCup"));
        assert_eq!(first.upload_date, Some(1_682_294_400_000));
    }

    #[test]
    fn watch_events_merge_within_window() {
        let doc = FlatDocument {
            watch_history: vec![
                watched("aaa", 1_700_000_000_000),
                watched("aaa", 1_700_000_000_800),
                watched("bbb", 1_700_000_000_000),
                watched("bbb", 1_700_000_001_500),
            ],
            ..FlatDocument::default()
        };
        let mut db = NewPipeDb::create_in_memory().unwrap();
        let report = convert(&doc, &mut db, with_history(1000)).unwrap();
        assert_eq!(report.history_written, 3);
        assert_eq!(report.history_merged, 1);
        let history = db.history().unwrap();
        let aaa: Vec<_> = history.iter().filter(|h| h.stream.url.ends_with("aaa")).collect();
        assert_eq!(aaa.len(), 1);
        assert_eq!(aaa[0].repeat_count, 2);
        assert_eq!(history.iter().filter(|h| h.stream.url.ends_with("bbb")).count(), 2);
    }

    #[test]
    fn seconds_access_dates_are_normalized() {
        let doc = FlatDocument {
            watch_history: vec![watched("aaa", 1_691_576_017)],
            ..FlatDocument::default()
        };
        let mut db = NewPipeDb::create_in_memory().unwrap();
        convert(&doc, &mut db, with_history(1000)).unwrap();
        assert_eq!(db.history().unwrap()[0].access_date, 1_691_576_017_000);
    }

    #[test]
    fn positions_need_a_stream() {
        let doc = FlatDocument {
            watch_history: vec![watched("aaa", 1_700_000_000_000)],
            watch_positions: vec![
                WatchPosition { video_id: "aaa".into(), position: 42_000 },
                WatchPosition { video_id: "nope".into(), position: 1 },
            ],
            ..FlatDocument::default()
        };
        let mut db = NewPipeDb::create_in_memory().unwrap();
        let report = convert(&doc, &mut db, with_history(1000)).unwrap();
        assert_eq!(report.positions_written, 1);
        assert_eq!(report.positions_skipped, 1);
        assert_eq!(db.stream_states().unwrap()[0].progress_time, 42_000);
    }

    fn store_with_mix() -> NewPipeDb {
        let mut db = NewPipeDb::create_in_memory().unwrap();
        let doc = FlatDocument {
            local_playlists: vec![playlist("Mix", &["old"])],
            playlist_bookmarks: vec![PlaylistBookmark {
                playlist_id: "PLold".into(),
                ..PlaylistBookmark::default()
            }],
            local_subscriptions: vec![Subscription {
                channel_id: "UCold".into(),
                name: "Old".into(),
                ..Subscription::default()
            }],
            ..FlatDocument::default()
        };
        convert(&doc, &mut db, StructuredOptions::default()).unwrap();
        db
    }

    fn incoming() -> FlatDocument {
        FlatDocument {
            local_playlists: vec![playlist("Mix", &["new1", "new2"]), playlist("Fresh", &["x"])],
            playlist_bookmarks: vec![PlaylistBookmark {
                playlist_id: "PLnew".into(),
                playlist_name: Some("New".into()),
                videos: 3,
                ..PlaylistBookmark::default()
            }],
            local_subscriptions: vec![Subscription {
                channel_id: "UCnew".into(),
                name: "New".into(),
                ..Subscription::default()
            }],
            ..FlatDocument::default()
        }
    }

    fn with_policy(policy: ConflictPolicy) -> StructuredOptions {
        StructuredOptions { policy, ..StructuredOptions::default() }
    }

    #[test]
    fn subscriptions_are_replaced_on_merge() {
        let mut db = store_with_mix();
        convert(&incoming(), &mut db, StructuredOptions::default()).unwrap();
        let subs = db.subscriptions().unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].url, "https://www.youtube.com/channel/UCnew");
    }

    #[test]
    fn target_wins_keeps_stored_playlist() {
        let mut db = store_with_mix();
        let report = convert(&incoming(), &mut db, with_policy(ConflictPolicy::TargetWins)).unwrap();
        assert_eq!(report.playlists_kept, 1);
        assert_eq!(playlist_video_ids(&db, "Mix"), vec!["old"]);
        assert_eq!(playlist_video_ids(&db, "Fresh"), vec!["x"]);
    }

    #[test]
    fn source_wins_replaces_stored_playlist() {
        let mut db = store_with_mix();
        convert(&incoming(), &mut db, with_policy(ConflictPolicy::SourceWins)).unwrap();
        assert_eq!(db.playlists().unwrap().len(), 2);
        assert_eq!(playlist_video_ids(&db, "Mix"), vec!["new1", "new2"]);
        let remote = db.remote_playlists().unwrap();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].url, "https://www.youtube.com/playlist?list=PLnew");
    }

    #[test]
    fn target_only_leaves_playlists_and_bookmarks() {
        let mut db = store_with_mix();
        convert(&incoming(), &mut db, with_policy(ConflictPolicy::TargetOnly)).unwrap();
        assert_eq!(db.playlists().unwrap().len(), 1);
        assert_eq!(playlist_video_ids(&db, "Mix"), vec!["old"]);
        assert_eq!(db.remote_playlists().unwrap()[0].name, "PLold");
    }

    #[test]
    fn source_only_starts_from_scratch() {
        let mut db = store_with_mix();
        convert(&incoming(), &mut db, with_policy(ConflictPolicy::SourceOnly)).unwrap();
        let names: Vec<String> = db.playlists().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Mix", "Fresh"]);
    }

    #[test]
    fn writes_identity_marker() {
        let mut db = NewPipeDb::create_in_memory().unwrap();
        convert(&FlatDocument::default(), &mut db, StructuredOptions::default()).unwrap();
        let hash: String = db
            .conn()
            .query_row("SELECT identity_hash FROM room_master_table WHERE id = 42", [], |r| r.get(0))
            .unwrap();
        assert_eq!(hash, crate::schema::IDENTITY_HASH);
    }
}
