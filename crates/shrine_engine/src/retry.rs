//! Bounded retry queue for failed role grants.
//!
//! Grant failures collected during the history walk are drained here in
//! rounds after the walk completes. Each round snapshots the queue,
//! clears it, and attempts every item once; failures re-enqueue with an
//! incremented attempt count until the budget is spent, at which point
//! the failure is permanent.

use crate::classify::{grant_role, resolve_member, RunCtx};
use crate::gateway::{ChannelGateway, GatewayError, Message};
use crate::session::{ErrorKind, ScanSession, UserRef};
use tokio::time::sleep;
use tracing::{error, warn};

/// One queued grant retry.
#[derive(Debug, Clone)]
pub struct RetryItem {
    pub message: Message,
    pub attempts: u32,
}

/// Work queue of grant retries with a per-item attempt budget.
pub struct RetryQueue {
    items: Vec<RetryItem>,
    max_attempts: u32,
}

impl RetryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            items: Vec::new(),
            max_attempts,
        }
    }

    /// Enqueue a failed grant. `attempts` counts tries already spent.
    pub fn push(&mut self, message: Message, attempts: u32) {
        self.items.push(RetryItem { message, attempts });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain the queue in rounds until it is empty or every remaining
    /// item has exhausted its budget.
    pub(crate) async fn drain<G: ChannelGateway>(
        &mut self,
        ctx: &RunCtx<'_, G>,
        session: &mut ScanSession,
    ) {
        let Some(role_id) = ctx.role_id else {
            // Nothing can be granted without a configured role.
            self.items.clear();
            return;
        };

        while !self.items.is_empty() {
            let round = std::mem::take(&mut self.items);
            for mut item in round {
                let author_id = item.message.author.id.clone();
                let author_name = item.message.author.username.clone();
                let guild_id = item.message.guild_id.clone();

                let member =
                    match resolve_member(ctx.gateway, ctx.tuning, &guild_id, &author_id).await {
                        Ok(member) => member,
                        Err(GatewayError::UnknownMember) => {
                            // Not transient; the item leaves the queue for good.
                            session.record_error(
                                ErrorKind::UnknownMember,
                                Some((&author_name, &author_id)),
                                "unknown member during grant retry",
                            );
                            continue;
                        }
                        Err(err) => {
                            // Spends the budget like a failed grant would;
                            // otherwise a persistently failing member
                            // service keeps the drain spinning forever.
                            item.attempts += 1;
                            self.requeue_or_exhaust(item, &err, session);
                            continue;
                        }
                    };

                if member.has_role(role_id) {
                    if let Err(err) = ctx.db.mark_granted(&guild_id, &author_id, ctx.event_id).await
                    {
                        session.record_error(
                            ErrorKind::Ledger,
                            Some((&author_name, &author_id)),
                            err.to_string(),
                        );
                    }
                    continue;
                }

                match grant_role(ctx.gateway, ctx.tuning, &guild_id, &author_id, role_id).await {
                    Ok(()) => {
                        session.roles_assigned += 1;
                        session.assigned_users.push(UserRef {
                            username: author_name.clone(),
                            user_id: author_id.clone(),
                        });
                        if let Err(err) =
                            ctx.db.mark_granted(&guild_id, &author_id, ctx.event_id).await
                        {
                            session.record_error(
                                ErrorKind::Ledger,
                                Some((&author_name, &author_id)),
                                err.to_string(),
                            );
                        }
                        sleep(ctx.tuning.grant_delay).await;
                    }
                    Err(err) => {
                        item.attempts += 1;
                        self.requeue_or_exhaust(item, &err, session);
                    }
                }
            }

            if !self.items.is_empty() {
                sleep(ctx.tuning.grant_delay).await;
            }
        }
    }

    fn requeue_or_exhaust(&mut self, item: RetryItem, err: &GatewayError, session: &mut ScanSession) {
        let author_id = item.message.author.id.clone();
        let author_name = item.message.author.username.clone();

        if item.attempts < self.max_attempts {
            warn!(
                user = %author_name,
                attempts = item.attempts,
                error = %err,
                "Grant retry failed, re-queueing"
            );
            self.items.push(item);
        } else {
            error!(
                user = %author_name,
                attempts = item.attempts,
                error = %err,
                "Grant failed permanently"
            );
            session.record_error(
                ErrorKind::GrantExhausted,
                Some((&author_name, &author_id)),
                format!("failed after {} attempts: {err}", item.attempts),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RunCtx;
    use crate::session::MatchStatus;
    use crate::testutil::ScriptedGateway;
    use crate::tuning::ScanTuning;
    use shrine_db::ShrineDb;

    async fn harness() -> (ShrineDb, ScanTuning) {
        let db = ShrineDb::memory().await.unwrap();
        db.create_participant("g1", "u1", "1").await.unwrap();
        (db, ScanTuning::unpaced())
    }

    fn ctx<'a>(
        db: &'a ShrineDb,
        gateway: &'a ScriptedGateway,
        tuning: &'a ScanTuning,
    ) -> RunCtx<'a, ScriptedGateway> {
        RunCtx {
            db,
            gateway,
            tuning,
            sticker_id: "s1",
            role_id: Some("r1"),
            event_id: "1",
        }
    }

    #[tokio::test]
    async fn exhausted_item_is_permanent_and_never_reappears() {
        let (db, tuning) = harness().await;
        let gateway = ScriptedGateway::new("g1", "c1");
        gateway.add_member("u1", "alice", &[]);
        gateway.fail_grants_forever("u1");

        let mut session = ScanSession::new();
        let mut queue = RetryQueue::new(3);
        queue.push(gateway.sticker_message("m1", "u1", "alice", &["s1"]), 1);

        queue.drain(&ctx(&db, &gateway, &tuning), &mut session).await;

        assert!(queue.is_empty());
        // Initial attempt happened in the scan phase; the queue spends
        // the remaining budget.
        assert_eq!(gateway.grant_calls("u1"), 2);
        assert_eq!(session.roles_assigned, 0);
        assert_eq!(session.errors, 1);
        assert_eq!(session.error_log[0].kind, ErrorKind::GrantExhausted);

        let record = db.find_participant("g1", "u1", "1").await.unwrap().unwrap();
        assert!(!record.granted_role);
    }

    #[tokio::test]
    async fn failure_then_success_grants_once() {
        let (db, tuning) = harness().await;
        let gateway = ScriptedGateway::new("g1", "c1");
        gateway.add_member("u1", "alice", &[]);
        gateway.script_grant_failure("u1", GatewayError::Transient("socket reset".into()));

        let mut session = ScanSession::new();
        let mut queue = RetryQueue::new(3);
        queue.push(gateway.sticker_message("m1", "u1", "alice", &["s1"]), 1);

        queue.drain(&ctx(&db, &gateway, &tuning), &mut session).await;

        assert!(queue.is_empty());
        assert_eq!(session.roles_assigned, 1);
        assert_eq!(session.errors, 0);
        let record = db.find_participant("g1", "u1", "1").await.unwrap().unwrap();
        assert!(record.granted_role);
    }

    #[tokio::test]
    async fn unresolvable_member_spends_the_attempt_budget() {
        let (db, tuning) = harness().await;
        let gateway = ScriptedGateway::new("g1", "c1");
        gateway.add_member("u1", "alice", &[]);
        gateway.fail_member_resolution_forever("u1");

        let mut session = ScanSession::new();
        let mut queue = RetryQueue::new(3);
        queue.push(gateway.sticker_message("m1", "u1", "alice", &["s1"]), 1);

        queue.drain(&ctx(&db, &gateway, &tuning), &mut session).await;

        // The drain must terminate: each failed resolution costs an
        // attempt, exactly like a failed grant.
        assert!(queue.is_empty());
        assert_eq!(gateway.grant_calls("u1"), 0);
        assert_eq!(session.roles_assigned, 0);
        assert_eq!(session.errors, 1);
        assert_eq!(session.error_log[0].kind, ErrorKind::GrantExhausted);
    }

    #[tokio::test]
    async fn unknown_member_is_not_requeued() {
        let (db, tuning) = harness().await;
        let gateway = ScriptedGateway::new("g1", "c1");
        // u1 never added as a member

        let mut session = ScanSession::new();
        let mut queue = RetryQueue::new(3);
        queue.push(gateway.sticker_message("m1", "u1", "alice", &["s1"]), 1);

        queue.drain(&ctx(&db, &gateway, &tuning), &mut session).await;

        assert!(queue.is_empty());
        assert_eq!(gateway.grant_calls("u1"), 0);
        assert_eq!(session.errors, 1);
        assert_eq!(session.error_log[0].kind, ErrorKind::UnknownMember);
    }

    #[tokio::test]
    async fn member_holding_the_role_is_persisted_without_counting() {
        let (db, tuning) = harness().await;
        let gateway = ScriptedGateway::new("g1", "c1");
        gateway.add_member("u1", "alice", &["r1"]);

        let mut session = ScanSession::new();
        session.matching_sticker_messages.push(crate::session::MatchingEntry {
            username: "alice".into(),
            user_id: "u1".into(),
            link: "l1".into(),
            timestamp: chrono::Utc::now(),
            status: MatchStatus::Unprocessed,
        });
        let mut queue = RetryQueue::new(3);
        queue.push(gateway.sticker_message("m1", "u1", "alice", &["s1"]), 1);

        queue.drain(&ctx(&db, &gateway, &tuning), &mut session).await;

        assert_eq!(session.roles_assigned, 0);
        assert_eq!(gateway.grant_calls("u1"), 0);
        let record = db.find_participant("g1", "u1", "1").await.unwrap().unwrap();
        assert!(record.granted_role);
    }
}
