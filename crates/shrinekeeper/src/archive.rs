//! Channel archive gateway.
//!
//! Serves a channel export (JSON) through the engine's gateway traits so
//! scans can run offline against a recorded history. Grants are applied
//! to the in-memory member state and recorded, making the ledger the
//! durable outcome of an archive scan.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use shrine_engine::{ChannelGateway, GatewayError, Member, Message};
use std::path::Path;
use std::sync::Mutex;

/// On-disk archive layout.
#[derive(Debug, Deserialize)]
pub struct ChannelArchive {
    pub guild_id: String,
    pub channel_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl ChannelArchive {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read archive: {}", path.display()))?;
        let archive: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid archive format: {}", path.display()))?;
        if archive.channel_id.is_empty() {
            bail!("Archive has no channel id: {}", path.display());
        }
        Ok(archive)
    }
}

struct ArchiveState {
    members: Vec<Member>,
    grants: Vec<(String, String)>,
}

/// Gateway over a loaded archive. Never rate limits and never fails
/// transiently; unknown members surface exactly as the live service
/// would report them.
pub struct ArchiveGateway {
    channel_id: String,
    /// Newest first, matching what the live history endpoint delivers.
    messages: Vec<Message>,
    state: Mutex<ArchiveState>,
}

impl ArchiveGateway {
    pub fn new(archive: ChannelArchive) -> Self {
        let mut messages = archive.messages;
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self {
            channel_id: archive.channel_id,
            messages,
            state: Mutex::new(ArchiveState {
                members: archive.members,
                grants: Vec::new(),
            }),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Grants applied during the scan, as (user_id, role_id) pairs.
    pub fn grants(&self) -> Vec<(String, String)> {
        self.lock().grants.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ArchiveState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChannelGateway for ArchiveGateway {
    async fn fetch_page(
        &self,
        _channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, GatewayError> {
        let start = match before {
            Some(id) => match self.messages.iter().position(|m| m.id == id) {
                Some(pos) => pos + 1,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };
        Ok(self
            .messages
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_member(&self, _guild_id: &str, user_id: &str) -> Result<Member, GatewayError> {
        self.lock()
            .members
            .iter()
            .find(|m| m.user_id == user_id)
            .cloned()
            .ok_or(GatewayError::UnknownMember)
    }

    async fn grant_role(
        &self,
        _guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.lock();
        let Some(member) = state.members.iter_mut().find(|m| m.user_id == user_id) else {
            return Err(GatewayError::UnknownMember);
        };
        if !member.role_ids.iter().any(|r| r == role_id) {
            member.role_ids.push(role_id.to_string());
        }
        state.grants.push((user_id.to_string(), role_id.to_string()));
        Ok(())
    }
}
