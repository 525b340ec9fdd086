//! Row types for the event config store and participation ledger.

/// Per-guild sticker-event configuration.
///
/// The numeric row id doubles as the event id: participation records are
/// scoped to it, so a fresh config row starts a fresh event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConfig {
    pub id: i64,
    pub guild_id: String,
    pub channel_id: Option<String>,
    pub sticker_id: Option<String>,
    pub role_id: Option<String>,
    pub active: bool,
}

impl EventConfig {
    /// Event id under which participation records are keyed.
    pub fn event_id(&self) -> String {
        self.id.to_string()
    }

    /// A scan may only run when both the channel and the sticker are set.
    pub fn is_scan_ready(&self) -> bool {
        self.channel_id.is_some() && self.sticker_id.is_some()
    }
}

/// Partial update for an [`EventConfig`]; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct EventConfigPatch {
    pub channel_id: Option<String>,
    pub sticker_id: Option<String>,
    pub role_id: Option<String>,
    pub active: Option<bool>,
}

/// One participant's durable idempotency record for one event.
///
/// `granted_role` is monotonic: it flips false to true exactly once and
/// never reverts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipationRecord {
    pub id: i64,
    pub guild_id: String,
    pub user_id: String,
    pub event_id: String,
    pub granted_role: bool,
}
