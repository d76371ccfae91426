//! The flat (LibreTube) backup document.
//!
//! Field names mirror the JSON export exactly (camelCase). Top-level keys this tool does not
//! understand are kept in `extra` so they survive a merge untouched.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codecs::{clamp_safe_i64, clamp_safe_json};
use crate::error::{BridgeError, Result};
use crate::util::write_atomic;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FlatDocument {
    #[serde(default)]
    pub(crate) watch_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub(crate) watch_positions: Vec<WatchPosition>,
    #[serde(default)]
    pub(crate) local_subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub(crate) playlist_bookmarks: Vec<PlaylistBookmark>,
    #[serde(default)]
    pub(crate) local_playlists: Vec<LocalPlaylist>,
    #[serde(flatten)]
    pub(crate) extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Subscription {
    #[serde(default)]
    pub(crate) channel_id: String,
    #[serde(default)]
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) avatar: Option<String>,
    #[serde(default)]
    pub(crate) verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlaylistBookmark {
    #[serde(default)]
    pub(crate) playlist_id: String,
    #[serde(default)]
    pub(crate) playlist_name: Option<String>,
    #[serde(default)]
    pub(crate) thumbnail_url: Option<String>,
    #[serde(default)]
    pub(crate) uploader: Option<String>,
    #[serde(default)]
    pub(crate) uploader_url: Option<String>,
    #[serde(default)]
    pub(crate) uploader_avatar: Option<String>,
    #[serde(default, deserialize_with = "de_safe_int")]
    pub(crate) videos: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LocalPlaylist {
    pub(crate) playlist: PlaylistHeader,
    #[serde(default)]
    pub(crate) videos: Vec<PlaylistVideo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlaylistHeader {
    #[serde(default, deserialize_with = "de_safe_int")]
    pub(crate) id: i64,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) thumbnail_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlaylistVideo {
    #[serde(default, deserialize_with = "de_safe_int")]
    pub(crate) id: i64,
    #[serde(default, deserialize_with = "de_safe_int")]
    pub(crate) playlist_id: i64,
    #[serde(default)]
    pub(crate) video_id: String,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) upload_date: Option<String>,
    #[serde(default)]
    pub(crate) uploader: Option<String>,
    #[serde(default)]
    pub(crate) uploader_url: Option<String>,
    #[serde(default)]
    pub(crate) uploader_avatar: Option<String>,
    #[serde(default)]
    pub(crate) thumbnail_url: Option<String>,
    #[serde(default, deserialize_with = "de_opt_safe_int")]
    pub(crate) duration: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryEntry {
    #[serde(default)]
    pub(crate) video_id: String,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) upload_date: Option<String>,
    #[serde(default)]
    pub(crate) uploader: Option<String>,
    #[serde(default)]
    pub(crate) uploader_url: Option<String>,
    #[serde(default)]
    pub(crate) uploader_avatar: Option<String>,
    #[serde(default)]
    pub(crate) thumbnail_url: Option<String>,
    #[serde(default, deserialize_with = "de_opt_safe_int")]
    pub(crate) duration: Option<i64>,
    #[serde(default, deserialize_with = "de_safe_int")]
    pub(crate) access_date: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WatchPosition {
    #[serde(default)]
    pub(crate) video_id: String,
    #[serde(default, deserialize_with = "de_safe_int")]
    pub(crate) position: i64,
}

fn de_safe_int<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(clamp_safe_json(&value))
}

fn de_opt_safe_int<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => None,
        other => Some(clamp_safe_json(&other)),
    })
}

impl FlatDocument {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self> {
        let doc: FlatDocument = serde_json::from_slice(bytes)?;
        Ok(doc)
    }

    pub(crate) fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| BridgeError::io(e, path))?;
        Self::parse(&bytes).map_err(|e| match e {
            BridgeError::Json(inner) => {
                BridgeError::Malformed(format!("{} is not a flat backup: {inner}", path.display()))
            }
            other => other,
        })
    }

    /// Clamp every integer to the safe range before it leaves the process.
    pub(crate) fn clamp_numbers(&mut self) {
        for entry in &mut self.watch_history {
            entry.access_date = clamp_safe_i64(entry.access_date);
            entry.duration = entry.duration.map(clamp_safe_i64);
        }
        for pos in &mut self.watch_positions {
            pos.position = clamp_safe_i64(pos.position);
        }
        for bookmark in &mut self.playlist_bookmarks {
            bookmark.videos = clamp_safe_i64(bookmark.videos);
        }
        for playlist in &mut self.local_playlists {
            playlist.playlist.id = clamp_safe_i64(playlist.playlist.id);
            for video in &mut playlist.videos {
                video.id = clamp_safe_i64(video.id);
                video.playlist_id = clamp_safe_i64(video.playlist_id);
                video.duration = video.duration.map(clamp_safe_i64);
            }
        }
    }

    pub(crate) fn to_bytes(&mut self) -> Result<Vec<u8>> {
        self.clamp_numbers();
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub(crate) fn save(&mut self, path: &Path) -> Result<Vec<u8>> {
        let bytes = self.to_bytes()?;
        write_atomic(path, &bytes)?;
        Ok(bytes)
    }

    pub(crate) fn next_playlist_id(&self) -> i64 {
        self.local_playlists
            .iter()
            .map(|p| p.playlist.id)
            .max()
            .unwrap_or(0)
            + 1
    }

    pub(crate) fn next_playlist_video_id(&self) -> i64 {
        self.local_playlists
            .iter()
            .flat_map(|p| p.videos.iter().map(|v| v.id))
            .max()
            .unwrap_or(0)
            + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "watchHistory": [
            {"videoId": "abc", "title": "T", "accessDate": 1e20, "duration": "61"}
        ],
        "watchPositions": [{"videoId": "abc", "position": 5000}],
        "localSubscriptions": [{"channelId": "UC1", "url": "https://www.youtube.com/channel/UC1", "name": "One"}],
        "playlistBookmarks": [],
        "localPlaylists": [
            {"playlist": {"id": 3, "name": "Mix", "thumbnailUrl": ""},
             "videos": [{"id": 9, "playlistId": 3, "videoId": "abc", "duration": null}]}
        ],
        "searchHistory": [{"query": "rust"}],
        "groups": []
    }"#;

    #[test]
    fn parses_and_clamps_loose_numbers() {
        let doc = FlatDocument::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(doc.watch_history[0].access_date, crate::codecs::MAX_SAFE_INTEGER);
        assert_eq!(doc.watch_history[0].duration, Some(61));
        assert_eq!(doc.local_playlists[0].videos[0].duration, None);
        assert_eq!(doc.next_playlist_id(), 4);
        assert_eq!(doc.next_playlist_video_id(), 10);
    }

    #[test]
    fn unknown_keys_survive_a_rewrite() {
        let mut doc = FlatDocument::parse(SAMPLE.as_bytes()).unwrap();
        let bytes = doc.to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["searchHistory"][0]["query"], "rust");
        assert!(value["groups"].is_array());
        assert_eq!(value["localSubscriptions"][0]["channelId"], "UC1");
    }

    #[test]
    fn missing_arrays_default_to_empty() {
        let doc = FlatDocument::parse(b"{}").unwrap();
        assert!(doc.watch_history.is_empty());
        assert!(doc.local_playlists.is_empty());
        assert_eq!(doc.next_playlist_id(), 1);
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(FlatDocument::parse(b"[1,2,3]").is_err());
    }
}
