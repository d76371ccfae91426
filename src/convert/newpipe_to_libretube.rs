//! Structured store -> flat document.

use std::collections::{HashMap, HashSet};

use log::{debug, info};

use crate::codecs::{
    channel_url, extract_channel_id, extract_playlist_id, extract_video_id, is_platform_url,
    normalize_to_date, uploader_path,
};
use crate::convert::{ConflictPolicy, ConversionReport};
use crate::error::Result;
use crate::libretube::{
    FlatDocument, HistoryEntry, LocalPlaylist, PlaylistBookmark, PlaylistHeader, PlaylistVideo,
    Subscription, WatchPosition,
};
use crate::newpipe_db::{NewPipeDb, StreamRow};

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FlatOptions {
    pub(crate) policy: ConflictPolicy,
    pub(crate) include_history: bool,
}

/// Translate `db` into a flat document, merging into `target` when one is given.
///
/// `target` is modified in place; top-level keys this tool does not model pass through.
pub(crate) fn convert(
    db: &NewPipeDb,
    target: &mut FlatDocument,
    options: FlatOptions,
) -> Result<ConversionReport> {
    let mut report = ConversionReport::default();

    // Snapshot taken before anything is touched; target-only hands it back verbatim.
    let saved_playlists = target.local_playlists.clone();
    let saved_bookmarks = target.playlist_bookmarks.clone();

    convert_subscriptions(db, target, &mut report)?;

    match options.policy {
        ConflictPolicy::TargetOnly => {
            debug!("target-only: keeping existing playlists and bookmarks");
        }
        policy => {
            if policy == ConflictPolicy::SourceOnly {
                target.local_playlists.clear();
                target.playlist_bookmarks.clear();
            }
            convert_bookmarks(db, target, &mut report)?;
            convert_playlists(db, target, policy, &mut report)?;
        }
    }

    if options.include_history {
        convert_positions(db, target, &mut report)?;
        convert_history(db, target, &mut report)?;
    }

    if options.policy == ConflictPolicy::TargetOnly {
        target.local_playlists = saved_playlists;
        target.playlist_bookmarks = saved_bookmarks;
    }

    info!(
        "flat: {} subscriptions, {} bookmarks, {} playlists ({} videos), {} positions, {} history",
        report.subscriptions_written,
        report.bookmarks_written,
        report.playlists_written,
        report.videos_written,
        report.positions_written,
        report.history_written
    );
    Ok(report)
}

fn convert_subscriptions(
    db: &NewPipeDb,
    target: &mut FlatDocument,
    report: &mut ConversionReport,
) -> Result<()> {
    let mut by_channel: HashMap<String, usize> = target
        .local_subscriptions
        .iter()
        .enumerate()
        .map(|(idx, s)| (s.channel_id.clone(), idx))
        .collect();

    for row in db.subscriptions()? {
        if !is_platform_url(&row.url) {
            report.subscriptions_skipped += 1;
            report.warn(format!(
                "skipping subscription '{}': {} is not a supported platform URL",
                row.name, row.url
            ));
            continue;
        }
        let Some(channel_id) = extract_channel_id(&row.url) else {
            report.subscriptions_skipped += 1;
            report.warn(format!(
                "skipping subscription '{}': no channel id in {}",
                row.name, row.url
            ));
            continue;
        };
        let sub = Subscription {
            url: channel_url(&channel_id),
            channel_id: channel_id.clone(),
            name: row.name,
            avatar: row.avatar_url.filter(|a| !a.is_empty()),
            verified: false,
        };
        match by_channel.get(&channel_id) {
            Some(&idx) => target.local_subscriptions[idx] = sub,
            None => {
                by_channel.insert(channel_id, target.local_subscriptions.len());
                target.local_subscriptions.push(sub);
            }
        }
        report.subscriptions_written += 1;
    }
    Ok(())
}

fn convert_bookmarks(
    db: &NewPipeDb,
    target: &mut FlatDocument,
    report: &mut ConversionReport,
) -> Result<()> {
    for row in db.remote_playlists()? {
        if !is_platform_url(&row.url) {
            report.bookmarks_skipped += 1;
            report.warn(format!(
                "skipping bookmark '{}': {} is not a supported platform URL",
                row.name, row.url
            ));
            continue;
        }
        let Some(playlist_id) = extract_playlist_id(&row.url) else {
            report.bookmarks_skipped += 1;
            report.warn(format!("skipping bookmark '{}': no list id in {}", row.name, row.url));
            continue;
        };
        let bookmark = PlaylistBookmark {
            playlist_id: playlist_id.clone(),
            playlist_name: Some(row.name),
            thumbnail_url: row.thumbnail_url,
            uploader: row.uploader,
            uploader_url: None,
            uploader_avatar: None,
            videos: row.stream_count.unwrap_or(0).max(0),
        };
        match target
            .playlist_bookmarks
            .iter_mut()
            .find(|b| b.playlist_id == playlist_id)
        {
            Some(existing) => *existing = bookmark,
            None => target.playlist_bookmarks.push(bookmark),
        }
        report.bookmarks_written += 1;
    }
    Ok(())
}

fn convert_playlists(
    db: &NewPipeDb,
    target: &mut FlatDocument,
    policy: ConflictPolicy,
    report: &mut ConversionReport,
) -> Result<()> {
    let existing_names: HashSet<String> = target
        .local_playlists
        .iter()
        .map(|p| p.playlist.name.clone())
        .collect();
    // Names already replaced this run; later source playlists with the same name are appended.
    let mut replaced: HashSet<String> = HashSet::new();
    let mut next_playlist_id = target.next_playlist_id();
    let mut next_video_id = target.next_playlist_video_id();

    for row in db.playlists()? {
        if existing_names.contains(&row.name) && policy == ConflictPolicy::TargetWins {
            report.playlists_kept += 1;
            debug!("playlist '{}' already present; keeping it", row.name);
            continue;
        }

        let replace_at = if existing_names.contains(&row.name)
            && replaced.insert(row.name.clone())
        {
            target
                .local_playlists
                .iter()
                .position(|p| p.playlist.name == row.name)
        } else {
            None
        };
        let playlist_id = match replace_at {
            Some(idx) => target.local_playlists[idx].playlist.id,
            None => {
                let id = next_playlist_id;
                next_playlist_id += 1;
                id
            }
        };

        let mut videos = Vec::new();
        for stream in db.playlist_streams(row.uid)? {
            let Some(video_id) = extract_video_id(&stream.url) else {
                report.videos_skipped += 1;
                report.warn(format!(
                    "playlist '{}': skipping '{}', no video id in {}",
                    row.name, stream.title, stream.url
                ));
                continue;
            };
            videos.push(playlist_video(&stream, video_id, playlist_id, next_video_id));
            next_video_id += 1;
        }
        report.videos_written += videos.len();

        let thumbnail_url = videos
            .first()
            .and_then(|v| v.thumbnail_url.clone())
            .unwrap_or_default();
        let playlist = LocalPlaylist {
            playlist: PlaylistHeader {
                id: playlist_id,
                name: row.name.clone(),
                thumbnail_url,
            },
            videos,
        };
        match replace_at {
            Some(idx) => {
                target.local_playlists[idx] = playlist;
                report.playlists_replaced += 1;
            }
            None => target.local_playlists.push(playlist),
        }
        report.playlists_written += 1;
    }
    Ok(())
}

fn upload_date(stream: &StreamRow) -> Option<String> {
    match (stream.upload_date, stream.textual_upload_date.as_deref()) {
        (Some(ms), _) if ms > 0 => Some(normalize_to_date(ms)),
        (_, Some(text)) if !text.trim().is_empty() => Some(normalize_to_date(text)),
        _ => None,
    }
}

fn uploader_url(stream: &StreamRow) -> Option<String> {
    stream
        .uploader_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .map(uploader_path)
}

fn playlist_video(stream: &StreamRow, video_id: String, playlist_id: i64, id: i64) -> PlaylistVideo {
    PlaylistVideo {
        id,
        playlist_id,
        video_id,
        title: Some(stream.title.clone()),
        upload_date: upload_date(stream),
        uploader: Some(stream.uploader.clone()),
        uploader_url: uploader_url(stream),
        uploader_avatar: None,
        thumbnail_url: stream.thumbnail_url.clone(),
        duration: Some(stream.duration),
    }
}

fn history_entry(stream: &StreamRow, video_id: String, access_date: i64) -> HistoryEntry {
    HistoryEntry {
        video_id,
        title: Some(stream.title.clone()),
        upload_date: upload_date(stream),
        uploader: Some(stream.uploader.clone()),
        uploader_url: uploader_url(stream),
        uploader_avatar: None,
        thumbnail_url: stream.thumbnail_url.clone(),
        duration: Some(stream.duration),
        access_date,
    }
}

fn convert_positions(
    db: &NewPipeDb,
    target: &mut FlatDocument,
    report: &mut ConversionReport,
) -> Result<()> {
    let mut by_video: HashMap<String, usize> = target
        .watch_positions
        .iter()
        .enumerate()
        .map(|(idx, p)| (p.video_id.clone(), idx))
        .collect();

    for state in db.stream_states()? {
        let Some(video_id) = extract_video_id(&state.stream.url) else {
            report.positions_skipped += 1;
            report.warn(format!(
                "skipping position for '{}': no video id in {}",
                state.stream.title, state.stream.url
            ));
            continue;
        };
        match by_video.get(&video_id) {
            Some(&idx) => {
                let existing = &mut target.watch_positions[idx];
                // Playback progress never moves backwards.
                existing.position = existing.position.max(state.progress_time);
            }
            None => {
                by_video.insert(video_id.clone(), target.watch_positions.len());
                target.watch_positions.push(WatchPosition {
                    video_id,
                    position: state.progress_time,
                });
            }
        }
        report.positions_written += 1;
    }
    Ok(())
}

fn convert_history(
    db: &NewPipeDb,
    target: &mut FlatDocument,
    report: &mut ConversionReport,
) -> Result<()> {
    let mut seen: HashSet<String> = target
        .watch_history
        .iter()
        .map(|h| h.video_id.clone())
        .collect();

    // Rows come newest first, so the first row per video carries its latest access.
    for row in db.history()? {
        let Some(video_id) = extract_video_id(&row.stream.url) else {
            report.history_skipped += 1;
            report.warn(format!(
                "skipping history for '{}': no video id in {}",
                row.stream.title, row.stream.url
            ));
            continue;
        };
        if !seen.insert(video_id.clone()) {
            report.history_merged += 1;
            continue;
        }
        target
            .watch_history
            .push(history_entry(&row.stream, video_id, row.access_date));
        report.history_written += 1;
    }
    target
        .watch_history
        .sort_by(|a, b| b.access_date.cmp(&a.access_date));
    Ok(())
}
