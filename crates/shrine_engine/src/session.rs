//! In-memory state for one scan run.
//!
//! A [`ScanSession`] is owned by exactly one run, mutated by the
//! classifier and the retry queue, finalized once, and then handed to
//! the report builder. It is never persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Kind of a terminal failure recorded in the error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Ledger rejected the participant key.
    Validation,
    /// Ledger read/write failed.
    Ledger,
    /// Grant failed transiently and was queued for retry.
    Grant,
    /// Grant failed after exhausting the retry budget.
    GrantExhausted,
    /// Member could not be resolved during a retry round.
    UnknownMember,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Ledger => "ledger",
            Self::Grant => "role-grant",
            Self::GrantExhausted => "role-grant-exhausted",
            Self::UnknownMember => "unknown-member",
        }
    }

    /// Grant-related kinds, listed together in the report.
    pub fn is_grant(self) -> bool {
        matches!(self, Self::Grant | Self::GrantExhausted)
    }
}

/// One structured error log entry.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub username: Option<String>,
    pub user_id: Option<String>,
    pub detail: String,
}

/// A user mentioned in a report listing.
#[derive(Debug, Clone, Serialize)]
pub struct UserRef {
    pub username: String,
    pub user_id: String,
}

/// Listing entry for a message that carried no sticker at all.
#[derive(Debug, Clone, Serialize)]
pub struct PlainMessageEntry {
    pub username: String,
    pub user_id: String,
    pub link: String,
    pub timestamp: DateTime<Utc>,
    pub excerpt: String,
}

/// Listing entry for a message whose stickers all missed the target.
#[derive(Debug, Clone, Serialize)]
pub struct NonMatchingEntry {
    pub username: String,
    pub user_id: String,
    pub link: String,
    pub sticker_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Processing outcome of a message carrying the matching sticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchStatus {
    /// Tallied but not acted on (duplicate from an already handled user).
    Unprocessed,
    /// Drove a successful grant this run.
    Processed,
    /// Author was already granted in a previous run.
    AlreadyProcessed,
}

/// Listing entry for a message with the matching sticker.
#[derive(Debug, Clone, Serialize)]
pub struct MatchingEntry {
    pub username: String,
    pub user_id: String,
    pub link: String,
    pub timestamp: DateTime<Utc>,
    pub status: MatchStatus,
}

/// Counters and classified listings accumulated over one run.
#[derive(Debug, Default, Serialize)]
pub struct ScanSession {
    pub messages_scanned: u64,
    pub matching_stickers: u64,
    pub roles_assigned: u64,
    pub already_processed: u64,
    pub errors: u64,

    pub assigned_users: Vec<UserRef>,
    pub unknown_members: Vec<UserRef>,
    pub non_matching_stickers: Vec<NonMatchingEntry>,
    pub messages_without_stickers: Vec<PlainMessageEntry>,
    pub matching_sticker_messages: Vec<MatchingEntry>,
    pub error_log: Vec<ErrorEntry>,

    pub finished_at: Option<DateTime<Utc>>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a terminal failure to the error log and bump the counter.
    pub fn record_error(
        &mut self,
        kind: ErrorKind,
        user: Option<(&str, &str)>,
        detail: impl Into<String>,
    ) {
        self.errors += 1;
        self.error_log.push(ErrorEntry {
            timestamp: Utc::now(),
            kind,
            username: user.map(|(name, _)| name.to_string()),
            user_id: user.map(|(_, id)| id.to_string()),
            detail: detail.into(),
        });
    }

    /// Update the status of the matching entry for `(user_id, link)`.
    ///
    /// The earliest-encountered qualifying message per user is the one
    /// acted on, so the pair identifies at most one entry.
    pub fn set_match_status(&mut self, user_id: &str, link: &str, status: MatchStatus) {
        if let Some(entry) = self
            .matching_sticker_messages
            .iter_mut()
            .find(|e| e.user_id == user_id && e.link == link)
        {
            entry.status = status;
        }
    }

    /// Seal the session. Call exactly once, after the retry queue drains.
    pub fn finalize(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
        self.finished_at = Some(Utc::now());
    }

    /// Qualifying messages minus every accounted-for outcome. A positive
    /// gap is expected when users sent multiple qualifying messages.
    pub fn unaccounted_matches(&self) -> u64 {
        self.matching_stickers.saturating_sub(
            self.roles_assigned + self.already_processed + self.unknown_members.len() as u64,
        )
    }
}
