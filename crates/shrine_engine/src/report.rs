//! Scan report generation.
//!
//! `render` is a pure function of a finalized session: the same session
//! always produces the same document. `write` persists it under a
//! timestamped name and degrades to a minimal counters-only summary if
//! the full document cannot be written; a run always ends with a report.

use crate::session::{MatchStatus, ScanSession};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;

/// Render the full Markdown report.
pub fn render(session: &ScanSession) -> String {
    let mut out = String::new();

    let generated = session
        .finished_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "(unfinished)".to_string());

    let _ = writeln!(out, "# Sticker Event Scan Report\n");
    let _ = writeln!(out, "Generated: {generated}\n");

    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "- **Messages Scanned**: {}", session.messages_scanned);
    let _ = writeln!(
        out,
        "- **Matching Stickers Found**: {}",
        session.matching_stickers
    );
    let unaccounted = session.unaccounted_matches();
    if unaccounted > 0 {
        let _ = writeln!(
            out,
            "- **Unprocessed Matching Stickers**: {unaccounted} *(see explanation below)*"
        );
    }
    let _ = writeln!(
        out,
        "- **Non-Matching Stickers Found**: {}",
        session.non_matching_stickers.len()
    );
    let _ = writeln!(
        out,
        "- **Messages Without Stickers**: {}",
        session.messages_without_stickers.len()
    );
    let _ = writeln!(out, "- **New Roles Assigned**: {}", session.roles_assigned);
    let _ = writeln!(
        out,
        "- **Already Processed Users**: {}",
        session.already_processed
    );
    let _ = writeln!(out, "- **Errors Encountered**: {}", session.errors);
    let _ = writeln!(
        out,
        "- **Unknown Members**: {}",
        session.unknown_members.len()
    );
    let _ = writeln!(
        out,
        "- **Processing Time**: {}\n",
        format_elapsed(session.elapsed)
    );

    if unaccounted > 0 {
        let accounted =
            session.roles_assigned + session.already_processed + session.unknown_members.len() as u64;
        let _ = writeln!(out, "## Sticker Discrepancy Explanation\n");
        let _ = writeln!(
            out,
            "The scan found {} messages with matching stickers, but only processed {} of them:\n",
            session.matching_stickers, accounted
        );
        let _ = writeln!(out, "- **Roles Assigned**: {}", session.roles_assigned);
        let _ = writeln!(
            out,
            "- **Already Processed Users**: {}",
            session.already_processed
        );
        let _ = writeln!(
            out,
            "- **Unknown Members**: {}\n",
            session.unknown_members.len()
        );
        let _ = writeln!(
            out,
            "The remaining {unaccounted} messages were from users who sent multiple messages \
             with the target sticker. Only one message per user drives a role grant.\n"
        );
    }

    let _ = writeln!(out, "## Members Added to Role\n");
    if session.assigned_users.is_empty() {
        let _ = writeln!(out, "- No members were added to the role.");
    } else {
        for user in &session.assigned_users {
            let _ = writeln!(out, "- **{}** (ID: {})", user.username, user.user_id);
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Members Not Assigned Role\n");
    let _ = writeln!(out, "### Unknown Members\n");
    if session.unknown_members.is_empty() {
        let _ = writeln!(out, "- None");
    } else {
        for user in &session.unknown_members {
            let _ = writeln!(
                out,
                "- **{}** (ID: {}): Unknown Member",
                user.username, user.user_id
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "### Role Grant Failures\n");
    let grant_errors: Vec<_> = session
        .error_log
        .iter()
        .filter(|e| e.kind.is_grant())
        .collect();
    if grant_errors.is_empty() {
        let _ = writeln!(out, "- None");
    } else {
        for entry in grant_errors {
            let _ = writeln!(
                out,
                "- **{}** (ID: {}): {}",
                entry.username.as_deref().unwrap_or("unknown"),
                entry.user_id.as_deref().unwrap_or("unknown"),
                entry.detail
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Messages With Non-Matching Stickers\n");
    if session.non_matching_stickers.is_empty() {
        let _ = writeln!(out, "- No messages with non-matching stickers found.");
    } else {
        for item in &session.non_matching_stickers {
            let _ = writeln!(
                out,
                "- **{}** / {} / [View Message]({})",
                item.username, item.user_id, item.link
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Messages Without Stickers\n");
    if session.messages_without_stickers.is_empty() {
        let _ = writeln!(out, "- No messages without stickers found.");
    } else {
        let mut sorted: Vec<_> = session.messages_without_stickers.iter().collect();
        sorted.sort_by_key(|item| item.timestamp);
        for item in sorted {
            let _ = writeln!(
                out,
                "- **{}** / {} / [View Message]({})",
                item.username, item.user_id, item.link
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Error Logs\n");
    if session.error_log.is_empty() {
        let _ = writeln!(out, "- No errors logged.");
    } else {
        for entry in &session.error_log {
            let _ = writeln!(out, "### {}", entry.timestamp.to_rfc3339());
            let _ = writeln!(out, "- **Type**: {}", entry.kind.as_str());
            if let (Some(name), Some(id)) = (&entry.username, &entry.user_id) {
                let _ = writeln!(out, "- **User**: {name} ({id})");
            }
            let _ = writeln!(out, "- **Message**: {}\n", entry.detail);
        }
    }

    let _ = writeln!(out, "## All Messages With Matching Stickers\n");
    if session.matching_sticker_messages.is_empty() {
        let _ = writeln!(out, "- No messages with matching stickers found.");
    } else {
        for item in &session.matching_sticker_messages {
            let marker = match item.status {
                MatchStatus::Unprocessed => "no",
                MatchStatus::Processed | MatchStatus::AlreadyProcessed => "yes",
            };
            let _ = writeln!(
                out,
                "- **{}** / {} / [View Message]({}) / Processed: {marker}",
                item.username, item.user_id, item.link
            );
        }
    }

    out
}

/// Minimal counters-only fallback, used when the full document cannot
/// be written.
pub fn render_fallback(session: &ScanSession) -> String {
    format!(
        "# Scan Report\n\nMessages: {}\nStickers: {}\nRoles: {}\nErrors: {}\n",
        session.messages_scanned,
        session.matching_stickers,
        session.roles_assigned,
        session.errors
    )
}

/// Write the report under `dir` with a timestamped filename.
///
/// On any failure creating the directory or writing the document, a
/// minimal fallback summary is written to the current directory
/// instead; only a failure to write even that is surfaced.
pub fn write(session: &ScanSession, dir: &Path) -> std::io::Result<PathBuf> {
    let stamp = session
        .finished_at
        .unwrap_or_else(chrono::Utc::now)
        .format("%Y-%m-%dT%H-%M-%S");
    let filename = format!("scan-report-{stamp}.md");

    let full = fs::create_dir_all(dir)
        .and_then(|()| {
            let path = dir.join(&filename);
            fs::write(&path, render(session)).map(|()| path)
        });

    match full {
        Ok(path) => Ok(path),
        Err(err) => {
            error!(error = %err, "Failed to write full scan report, falling back to summary");
            let fallback = PathBuf::from(&filename);
            fs::write(&fallback, render_fallback(session))?;
            Ok(fallback)
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ErrorKind, MatchingEntry, PlainMessageEntry, UserRef};
    use chrono::{TimeZone, Utc};

    fn sample_session() -> ScanSession {
        let mut session = ScanSession::new();
        session.messages_scanned = 25;
        session.matching_stickers = 3;
        session.roles_assigned = 1;
        session.already_processed = 0;
        session.assigned_users.push(UserRef {
            username: "alice".into(),
            user_id: "u1".into(),
        });
        for i in [2, 1, 3] {
            session.messages_without_stickers.push(PlainMessageEntry {
                username: format!("user{i}"),
                user_id: format!("u{i}"),
                link: format!("link{i}"),
                timestamp: Utc.with_ymd_and_hms(2024, 1, i as u32, 0, 0, 0).unwrap(),
                excerpt: String::new(),
            });
        }
        session.matching_sticker_messages.push(MatchingEntry {
            username: "alice".into(),
            user_id: "u1".into(),
            link: "link-m".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            status: crate::session::MatchStatus::Processed,
        });
        session.finalize(Duration::from_secs(95));
        session
    }

    #[test]
    fn report_contains_summary_and_reconciliation_note() {
        let session = sample_session();
        let report = render(&session);

        assert!(report.contains("- **Messages Scanned**: 25"));
        assert!(report.contains("- **New Roles Assigned**: 1"));
        assert!(report.contains("- **Processing Time**: 1m 35s"));
        // 3 matching, 1 accounted: the gap is explained, not hidden.
        assert!(report.contains("## Sticker Discrepancy Explanation"));
        assert!(report.contains("The remaining 2 messages"));
    }

    #[test]
    fn no_discrepancy_section_when_fully_accounted() {
        let mut session = sample_session();
        session.already_processed = 2;
        let report = render(&session);
        assert!(!report.contains("Sticker Discrepancy"));
    }

    #[test]
    fn plain_messages_are_sorted_by_timestamp() {
        let session = sample_session();
        let report = render(&session);

        let p1 = report.find("link1").unwrap();
        let p2 = report.find("link2").unwrap();
        let p3 = report.find("link3").unwrap();
        assert!(p1 < p2 && p2 < p3);
    }

    #[test]
    fn grant_failures_are_listed() {
        let mut session = sample_session();
        session.record_error(
            ErrorKind::GrantExhausted,
            Some(("bob", "u9")),
            "failed after 3 attempts: transient gateway error: boom",
        );
        let report = render(&session);
        assert!(report.contains("### Role Grant Failures"));
        assert!(report.contains("- **bob** (ID: u9): failed after 3 attempts"));
    }

    #[test]
    fn render_is_deterministic() {
        let session = sample_session();
        assert_eq!(render(&session), render(&session));
    }

    #[test]
    fn write_produces_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let session = sample_session();

        let path = write(&session, tmp.path()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# Sticker Event Scan Report"));
    }

    #[test]
    fn fallback_keeps_the_core_counters() {
        let session = sample_session();
        let fallback = render_fallback(&session);
        assert!(fallback.contains("Messages: 25"));
        assert!(fallback.contains("Roles: 1"));
    }
}
