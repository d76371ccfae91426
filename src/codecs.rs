//! Stateless field conversions shared by every conversion direction.
//!
//! Nothing in here touches a store or a document; each function maps one field value
//! between the units and identifier schemes used by the three backup formats.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use url::Url;

/// Largest integer a JSON double can carry without losing precision (2^53 - 1).
pub(crate) const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

pub(crate) const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";
pub(crate) const CHANNEL_URL_PREFIX: &str = "https://www.youtube.com/channel/";
pub(crate) const PLAYLIST_URL_PREFIX: &str = "https://www.youtube.com/playlist?list=";
const PLATFORM_ORIGIN: &str = "https://www.youtube.com";

const MILLIS_THRESHOLD: f64 = 1e12;
const SECONDS_THRESHOLD: f64 = 1e9;

// ── Safe-integer clamp ───────────────────────────────────────────────────

/// Truncate and clamp to ±(2^53 - 1). Non-finite input yields 0.
pub(crate) fn clamp_safe_integer(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    let truncated = value.trunc();
    if truncated >= MAX_SAFE_INTEGER as f64 {
        MAX_SAFE_INTEGER
    } else if truncated <= -(MAX_SAFE_INTEGER as f64) {
        -MAX_SAFE_INTEGER
    } else {
        truncated as i64
    }
}

pub(crate) fn clamp_safe_i64(value: i64) -> i64 {
    value.clamp(-MAX_SAFE_INTEGER, MAX_SAFE_INTEGER)
}

/// Clamp a loosely typed JSON value (number or numeric string). Anything else yields 0.
pub(crate) fn clamp_safe_json(value: &serde_json::Value) -> i64 {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                clamp_safe_i64(i)
            } else {
                clamp_safe_integer(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => clamp_safe_integer(s.trim().parse::<f64>().unwrap_or(0.0)),
        serde_json::Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

// ── Timestamp normalization ──────────────────────────────────────────────

/// A timestamp as found in a source record, before its unit is known.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TimeInput<'a> {
    Number(f64),
    Text(&'a str),
}

impl From<i64> for TimeInput<'_> {
    fn from(value: i64) -> Self {
        TimeInput::Number(value as f64)
    }
}

impl<'a> From<&'a str> for TimeInput<'a> {
    fn from(value: &'a str) -> Self {
        TimeInput::Text(value)
    }
}

/// Epoch milliseconds for any supported timestamp shape; 0 when nothing parses.
pub(crate) fn normalize_to_millis<'a>(input: impl Into<TimeInput<'a>>) -> i64 {
    match input.into() {
        TimeInput::Number(n) => millis_from_number(n).unwrap_or(0),
        TimeInput::Text(raw) => millis_from_text(raw).unwrap_or(0),
    }
}

/// `YYYY-MM-DD` (UTC) for any supported timestamp shape; `1970-01-01` when nothing parses.
pub(crate) fn normalize_to_date<'a>(input: impl Into<TimeInput<'a>>) -> String {
    calendar_date(normalize_to_millis(input))
}

fn millis_from_number(n: f64) -> Option<i64> {
    if !n.is_finite() {
        return None;
    }
    let magnitude = n.abs();
    if magnitude >= MILLIS_THRESHOLD {
        return Some(clamp_safe_integer(n));
    }
    if magnitude >= SECONDS_THRESHOLD {
        return Some(clamp_safe_integer(n * 1000.0));
    }
    if n.fract() == 0.0 && (1e7..1e8).contains(&n) {
        if let Some(ms) = millis_from_compact_date(n as i64) {
            return Some(ms);
        }
    }
    Some(clamp_safe_integer(n))
}

fn millis_from_compact_date(value: i64) -> Option<i64> {
    let year = (value / 10_000) as i32;
    let month = ((value / 100) % 100) as u32;
    let day = (value % 100) as u32;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?).timestamp_millis())
}

fn millis_from_text(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        if digits.len() == 8 && !trimmed.starts_with('-') {
            if let Some(ms) = trimmed.parse::<i64>().ok().and_then(millis_from_compact_date) {
                return Some(ms);
            }
        }
        return trimmed.parse::<f64>().ok().and_then(millis_from_number);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&dt).timestamp_millis());
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, format) {
            let dt = d.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&dt).timestamp_millis());
        }
    }
    None
}

pub(crate) fn calendar_date(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Human-readable UTC rendering used in log lines and summaries.
pub(crate) fn format_millis(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("{millis}ms"))
}

// ── Platform identifiers ─────────────────────────────────────────────────

fn parse_platform_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let known = host == "youtu.be"
        || host == "youtube.com"
        || host.ends_with(".youtube.com")
        || host == "youtube-nocookie.com"
        || host.ends_with(".youtube-nocookie.com");
    known.then_some(url)
}

pub(crate) fn is_platform_url(raw: &str) -> bool {
    parse_platform_url(raw).is_some()
}

/// Bare video id from a watch, short-link, shorts or embed URL.
pub(crate) fn extract_video_id(raw: &str) -> Option<String> {
    let url = parse_platform_url(raw)?;
    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        return non_empty(&v);
    }
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    if url.host_str().is_some_and(|h| h.eq_ignore_ascii_case("youtu.be")) {
        return segments.next().and_then(non_empty);
    }
    match segments.next() {
        Some("shorts") | Some("embed") | Some("live") => segments.next().and_then(non_empty),
        _ => None,
    }
}

/// Channel id from `/channel/<id>` URLs. Handles and custom names carry no id.
pub(crate) fn extract_channel_id(raw: &str) -> Option<String> {
    let url = parse_platform_url(raw)?;
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    match segments.next() {
        Some("channel") => segments.next().and_then(non_empty),
        _ => None,
    }
}

/// Playlist id from the `list` query parameter.
pub(crate) fn extract_playlist_id(raw: &str) -> Option<String> {
    let url = parse_platform_url(raw)?;
    url.query_pairs()
        .find(|(k, _)| k == "list")
        .and_then(|(_, v)| non_empty(&v))
}

pub(crate) fn canonical_watch_url(video_id: &str) -> String {
    format!("{WATCH_URL_PREFIX}{video_id}")
}

/// Re-derive the canonical watch URL from whatever URL form was stored.
pub(crate) fn canonicalize_watch_url(raw: &str) -> Option<String> {
    extract_video_id(raw).map(|id| canonical_watch_url(&id))
}

pub(crate) fn channel_url(channel_id: &str) -> String {
    format!("{CHANNEL_URL_PREFIX}{channel_id}")
}

pub(crate) fn playlist_url(playlist_id: &str) -> String {
    format!("{PLAYLIST_URL_PREFIX}{playlist_id}")
}

/// `https://www.youtube.com/channel/UC..` -> `/channel/UC..`; other shapes pass through.
pub(crate) fn uploader_path(raw: &str) -> String {
    match parse_platform_url(raw) {
        Some(url) => url.path().to_string(),
        None => raw.trim().to_string(),
    }
}

/// Inverse of [`uploader_path`].
pub(crate) fn uploader_absolute(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.contains("://") {
        trimmed.to_string()
    } else if trimmed.starts_with('/') {
        format!("{PLATFORM_ORIGIN}{trimmed}")
    } else {
        format!("{PLATFORM_ORIGIN}/{trimmed}")
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}
