//! The three conversion directions and the vocabulary they share.

pub(crate) mod libretube_to_newpipe;
pub(crate) mod newpipe_to_libretube;
pub(crate) mod time_to_habits;

use clap::ValueEnum;
use log::warn;
use serde::{Deserialize, Serialize};

/// How a playlist present in both the source and the existing target is resolved.
///
/// "Source" is the backup being converted; "target" is the existing backup being merged into.
/// The meaning is the same in both directions. Converting a flat document into an existing
/// structured store under [`ConflictPolicy::TargetWins`] therefore keeps the stored playlist;
/// deleting and re-importing it is [`ConflictPolicy::SourceWins`].
///
/// Within one run a name is resolved once: the first source playlist with that name replaces
/// the target's, later ones with the same name are added alongside.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum ConflictPolicy {
    /// Same-named playlists are replaced by the source's version.
    #[serde(rename = "source")]
    #[value(name = "source")]
    SourceWins,
    /// Same-named playlists in the target are kept; the source's copy is skipped.
    #[default]
    #[serde(rename = "target")]
    #[value(name = "target")]
    TargetWins,
    /// Drop every target playlist and bookmark, then import the source's.
    SourceOnly,
    /// Leave the target's playlists and bookmarks exactly as they were.
    TargetOnly,
}

impl ConflictPolicy {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::SourceWins => "source",
            Self::TargetWins => "target",
            Self::SourceOnly => "source-only",
            Self::TargetOnly => "target-only",
        }
    }
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run tallies. Every skip is also logged with the offending record.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct ConversionReport {
    pub(crate) subscriptions_written: usize,
    pub(crate) subscriptions_skipped: usize,
    pub(crate) bookmarks_written: usize,
    pub(crate) bookmarks_skipped: usize,
    pub(crate) playlists_written: usize,
    pub(crate) playlists_replaced: usize,
    pub(crate) playlists_kept: usize,
    pub(crate) videos_written: usize,
    pub(crate) videos_skipped: usize,
    pub(crate) positions_written: usize,
    pub(crate) positions_skipped: usize,
    pub(crate) history_written: usize,
    pub(crate) history_merged: usize,
    pub(crate) history_skipped: usize,
    pub(crate) warnings: Vec<String>,
}

impl ConversionReport {
    /// Log a record-level skip and keep it for the summary.
    pub(crate) fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_names_match_cli_and_config() {
        for policy in [
            ConflictPolicy::SourceWins,
            ConflictPolicy::TargetWins,
            ConflictPolicy::SourceOnly,
            ConflictPolicy::TargetOnly,
        ] {
            let json = serde_json::to_string(&policy).unwrap();
            assert_eq!(json, format!("\"{}\"", policy.as_str()));
            let parsed = ConflictPolicy::from_str(policy.as_str(), false).unwrap();
            assert_eq!(parsed, policy);
        }
    }

    #[test]
    fn report_collects_warnings() {
        let mut report = ConversionReport::default();
        report.warn("skipped video 'x'".into());
        assert_eq!(report.warnings, vec!["skipped video 'x'".to_string()]);
    }
}
