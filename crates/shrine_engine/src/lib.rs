//! Scan & reconciliation engine.
//!
//! Reconciles a channel's entire message history against a sticker
//! eligibility rule and grants a role to each qualifying participant
//! exactly once, across repeated runs, partial failures, and remote
//! rate limits. The durable idempotency store lives in [`shrine_db`];
//! the remote service is reached only through the [`gateway`] traits.
//!
//! A run is strictly sequential: history pages are walked backward one
//! at a time, each message is classified and acted on to completion,
//! failed grants drain through a bounded retry queue after the walk,
//! and the finalized session is rendered into a report.

mod classify;
mod error;
pub mod gateway;
mod pager;
pub mod report;
mod retry;
mod scan;
mod session;
mod tuning;

pub use error::ScanError;
pub use gateway::{Author, ChannelGateway, GatewayError, Member, Message, NullProgress, ProgressSink};
pub use pager::HistoryPager;
pub use retry::{RetryItem, RetryQueue};
pub use scan::Scanner;
pub use session::{
    ErrorEntry, ErrorKind, MatchStatus, MatchingEntry, NonMatchingEntry, PlainMessageEntry,
    ScanSession, UserRef,
};
pub use tuning::ScanTuning;

#[cfg(test)]
pub(crate) mod testutil {
    //! Scripted gateway for unit tests.

    use crate::gateway::{Author, ChannelGateway, GatewayError, Member, Message};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;

    #[derive(Default)]
    struct State {
        history: Vec<Message>,
        fetch_failures: VecDeque<GatewayError>,
        fetch_call_args: Vec<(Option<String>, usize)>,
        members: HashMap<String, Member>,
        member_fail_forever: HashSet<String>,
        grant_failures: HashMap<String, VecDeque<GatewayError>>,
        grant_fail_forever: HashSet<String>,
        grant_calls: HashMap<String, u64>,
    }

    /// In-memory gateway whose history, members, and failure modes are
    /// scripted by the test.
    pub(crate) struct ScriptedGateway {
        guild_id: String,
        channel_id: String,
        state: Mutex<State>,
    }

    impl ScriptedGateway {
        pub fn new(guild_id: &str, channel_id: &str) -> Self {
            Self {
                guild_id: guild_id.to_string(),
                channel_id: channel_id.to_string(),
                state: Mutex::new(State::default()),
            }
        }

        /// History of `n` plain human messages, newest first.
        pub fn with_plain_history(guild_id: &str, channel_id: &str, n: usize) -> Self {
            let gateway = Self::new(guild_id, channel_id);
            for i in 0..n {
                let msg = gateway.plain_message(&format!("m{i}"), &format!("u{i}"), "user");
                gateway.push_history(msg);
            }
            gateway
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// Append to the history; earlier pushes are newer.
        pub fn push_history(&self, message: Message) {
            self.lock().history.push(message);
        }

        pub fn plain_message(&self, id: &str, user_id: &str, username: &str) -> Message {
            self.message(id, user_id, username, &[], false)
        }

        pub fn sticker_message(
            &self,
            id: &str,
            user_id: &str,
            username: &str,
            stickers: &[&str],
        ) -> Message {
            self.message(id, user_id, username, stickers, false)
        }

        pub fn message(
            &self,
            id: &str,
            user_id: &str,
            username: &str,
            stickers: &[&str],
            bot: bool,
        ) -> Message {
            // Later history positions are older messages.
            let age = self.lock().history.len() as i64;
            Message {
                id: id.to_string(),
                guild_id: self.guild_id.clone(),
                channel_id: self.channel_id.clone(),
                author: Author {
                    id: user_id.to_string(),
                    username: username.to_string(),
                    bot,
                },
                content: String::new(),
                sticker_ids: stickers.iter().map(|s| s.to_string()).collect(),
                created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
                    - ChronoDuration::minutes(age),
            }
        }

        pub fn add_member(&self, user_id: &str, username: &str, roles: &[&str]) {
            self.lock().members.insert(
                user_id.to_string(),
                Member {
                    user_id: user_id.to_string(),
                    username: username.to_string(),
                    role_ids: roles.iter().map(|r| r.to_string()).collect(),
                },
            );
        }

        pub fn script_fetch_failure(&self, err: GatewayError) {
            self.lock().fetch_failures.push_back(err);
        }

        pub fn script_grant_failure(&self, user_id: &str, err: GatewayError) {
            self.lock()
                .grant_failures
                .entry(user_id.to_string())
                .or_default()
                .push_back(err);
        }

        pub fn fail_grants_forever(&self, user_id: &str) {
            self.lock().grant_fail_forever.insert(user_id.to_string());
        }

        pub fn fail_member_resolution_forever(&self, user_id: &str) {
            self.lock().member_fail_forever.insert(user_id.to_string());
        }

        pub fn fetch_calls(&self) -> u64 {
            self.lock().fetch_call_args.len() as u64
        }

        pub fn fetch_call_args(&self) -> Vec<(Option<String>, usize)> {
            self.lock().fetch_call_args.clone()
        }

        pub fn grant_calls(&self, user_id: &str) -> u64 {
            self.lock().grant_calls.get(user_id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ChannelGateway for ScriptedGateway {
        async fn fetch_page(
            &self,
            _channel_id: &str,
            before: Option<&str>,
            limit: usize,
        ) -> Result<Vec<Message>, GatewayError> {
            let mut state = self.lock();
            state
                .fetch_call_args
                .push((before.map(str::to_string), limit));

            if let Some(err) = state.fetch_failures.pop_front() {
                return Err(err);
            }

            let start = match before {
                Some(id) => match state.history.iter().position(|m| m.id == id) {
                    Some(pos) => pos + 1,
                    None => return Ok(Vec::new()),
                },
                None => 0,
            };
            Ok(state
                .history
                .iter()
                .skip(start)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn fetch_member(
            &self,
            _guild_id: &str,
            user_id: &str,
        ) -> Result<Member, GatewayError> {
            let state = self.lock();
            if state.member_fail_forever.contains(user_id) {
                return Err(GatewayError::Transient("member service unavailable".into()));
            }
            state
                .members
                .get(user_id)
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
            *state.grant_calls.entry(user_id.to_string()).or_insert(0) += 1;

            if state.grant_fail_forever.contains(user_id) {
                return Err(GatewayError::Transient("grant unavailable".into()));
            }
            if let Some(queue) = state.grant_failures.get_mut(user_id) {
                if let Some(err) = queue.pop_front() {
                    return Err(err);
                }
            }

            if let Some(member) = state.members.get_mut(user_id) {
                if !member.role_ids.iter().any(|r| r == role_id) {
                    member.role_ids.push(role_id.to_string());
                }
            }
            Ok(())
        }
    }
}
