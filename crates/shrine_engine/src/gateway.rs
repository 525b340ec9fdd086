//! Remote channel service seam.
//!
//! The engine never talks to the platform directly; everything it needs
//! from the remote side goes through [`ChannelGateway`], and progress
//! notifications go through [`ProgressSink`]. Both are async traits so
//! callers can plug in a live client, an archive replay, or a scripted
//! test double.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Message author as delivered by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub username: String,
    /// Automated accounts are ignored for grant consideration.
    #[serde(default)]
    pub bot: bool,
}

/// One channel message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub author: Author,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sticker_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

const EXCERPT_LEN: usize = 50;

impl Message {
    /// Permalink to the message.
    pub fn link(&self) -> String {
        format!(
            "https://discord.com/channels/{}/{}/{}",
            self.guild_id, self.channel_id, self.id
        )
    }

    pub fn has_stickers(&self) -> bool {
        !self.sticker_ids.is_empty()
    }

    pub fn has_sticker(&self, sticker_id: &str) -> bool {
        self.sticker_ids.iter().any(|s| s == sticker_id)
    }

    /// Short content excerpt for report listings.
    pub fn excerpt(&self) -> String {
        let mut out: String = self.content.chars().take(EXCERPT_LEN).collect();
        if self.content.chars().count() > EXCERPT_LEN {
            out.push_str("...");
        }
        out
    }
}

/// A resolved guild member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub role_ids: Vec<String>,
}

impl Member {
    pub fn has_role(&self, role_id: &str) -> bool {
        self.role_ids.iter().any(|r| r == role_id)
    }
}

/// Failures surfaced by the remote service.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Backpressure signal. Always honored and retried, never an error.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The member left or never existed. Terminal per participant.
    #[error("unknown member")]
    UnknownMember,

    /// May succeed on retry (timeout, connection reset, 5xx).
    #[error("transient gateway error: {0}")]
    Transient(String),

    /// The service refused the request (permissions, hierarchy).
    #[error("request denied: {0}")]
    Denied(String),
}

/// Paged, rate-limited access to a channel's history and its guild's
/// members and roles.
#[async_trait]
pub trait ChannelGateway: Send + Sync {
    /// Fetch up to `limit` messages strictly older than `before`
    /// (newest first). `before = None` starts from the present.
    async fn fetch_page(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, GatewayError>;

    /// Resolve a guild member.
    async fn fetch_member(&self, guild_id: &str, user_id: &str) -> Result<Member, GatewayError>;

    /// Attach a role to a member. The side-effecting action the whole
    /// engine exists to perform at most once per participant.
    async fn grant_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), GatewayError>;
}

/// Best-effort progress notifications; implementations must swallow
/// their own failures.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn notify(&self, text: &str);
}

/// Progress sink that drops every notification.
pub struct NullProgress;

#[async_trait]
impl ProgressSink for NullProgress {
    async fn notify(&self, _text: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_content(content: &str) -> Message {
        Message {
            id: "m1".into(),
            guild_id: "g1".into(),
            channel_id: "c1".into(),
            author: Author {
                id: "u1".into(),
                username: "user".into(),
                bot: false,
            },
            content: content.into(),
            sticker_ids: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn excerpt_truncates_long_content() {
        let long = "x".repeat(80);
        let msg = message_with_content(&long);
        assert_eq!(msg.excerpt().len(), 53);
        assert!(msg.excerpt().ends_with("..."));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let msg = message_with_content(&"é".repeat(60));
        assert_eq!(msg.excerpt().chars().count(), 53);
    }

    #[test]
    fn link_points_at_the_message() {
        let msg = message_with_content("hi");
        assert_eq!(msg.link(), "https://discord.com/channels/g1/c1/m1");
    }
}
