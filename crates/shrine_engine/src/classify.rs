//! Per-message classification and idempotent ledger writes.
//!
//! Consumes one history page in chronological order, tallies every
//! message into the session, and drives at most one grant attempt per
//! author per run. The ledger split matters: "already granted" is an
//! idempotent skip, while "record exists but not granted" is a resume
//! from an interrupted run and falls through to the grant attempt.

use crate::gateway::{ChannelGateway, GatewayError, Member, Message};
use crate::retry::RetryQueue;
use crate::session::{
    ErrorKind, MatchStatus, MatchingEntry, NonMatchingEntry, PlainMessageEntry, ScanSession,
    UserRef,
};
use crate::tuning::ScanTuning;
use shrine_db::{DbError, ShrineDb};
use std::collections::HashSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Everything the classifier and retry queue need from the run.
pub(crate) struct RunCtx<'a, G: ChannelGateway> {
    pub db: &'a ShrineDb,
    pub gateway: &'a G,
    pub tuning: &'a ScanTuning,
    pub sticker_id: &'a str,
    pub role_id: Option<&'a str>,
    pub event_id: &'a str,
}

/// Process one page. The pager delivers newest-first; messages are
/// handled oldest-first so the earliest qualifying message per user is
/// the authoritative one within a run.
pub(crate) async fn process_page<G: ChannelGateway>(
    ctx: &RunCtx<'_, G>,
    page: Vec<Message>,
    processed_users: &mut HashSet<String>,
    session: &mut ScanSession,
    retries: &mut RetryQueue,
) {
    for message in page.into_iter().rev() {
        process_message(ctx, message, processed_users, session, retries).await;
    }
}

async fn process_message<G: ChannelGateway>(
    ctx: &RunCtx<'_, G>,
    message: Message,
    processed_users: &mut HashSet<String>,
    session: &mut ScanSession,
    retries: &mut RetryQueue,
) {
    let author_id = message.author.id.clone();
    let author_name = message.author.username.clone();

    // Automated accounts are invisible to the event; plain messages are
    // only tallied for humans.
    if !message.author.bot && !message.has_stickers() {
        session.messages_without_stickers.push(PlainMessageEntry {
            username: author_name,
            user_id: author_id,
            link: message.link(),
            timestamp: message.created_at,
            excerpt: message.excerpt(),
        });
        return;
    }
    if message.author.bot {
        return;
    }

    let link = message.link();

    if !message.has_sticker(ctx.sticker_id) {
        session.non_matching_stickers.push(NonMatchingEntry {
            username: author_name,
            user_id: author_id,
            link,
            sticker_ids: message.sticker_ids.clone(),
            timestamp: message.created_at,
        });
        return;
    }

    session.matching_stickers += 1;
    session.matching_sticker_messages.push(MatchingEntry {
        username: author_name.clone(),
        user_id: author_id.clone(),
        link: link.clone(),
        timestamp: message.created_at,
        status: MatchStatus::Unprocessed,
    });

    // Earliest qualifying message this run already handled this author.
    if processed_users.contains(&author_id) {
        return;
    }

    match ctx
        .db
        .find_participant(&message.guild_id, &author_id, ctx.event_id)
        .await
    {
        Ok(Some(record)) if record.granted_role => {
            session.already_processed += 1;
            session.set_match_status(&author_id, &link, MatchStatus::AlreadyProcessed);
            processed_users.insert(author_id);
            return;
        }
        Ok(Some(_)) => {
            // Stale record from an interrupted run: the grant never
            // landed, so retry it without recreating the record.
            debug!(user = %author_id, event = ctx.event_id, "Resuming ungranted participant");
        }
        Ok(None) => {
            match ctx
                .db
                .create_participant(&message.guild_id, &author_id, ctx.event_id)
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_duplicate_key() => {
                    // Another writer beat us to it; not an error.
                    warn!(user = %author_id, event = ctx.event_id, "Duplicate participant record");
                    session.already_processed += 1;
                    session.set_match_status(&author_id, &link, MatchStatus::AlreadyProcessed);
                    processed_users.insert(author_id);
                    return;
                }
                Err(DbError::Validation(detail)) => {
                    session.record_error(
                        ErrorKind::Validation,
                        Some((&author_name, &author_id)),
                        detail,
                    );
                    return;
                }
                Err(err) => {
                    session.record_error(
                        ErrorKind::Ledger,
                        Some((&author_name, &author_id)),
                        err.to_string(),
                    );
                    return;
                }
            }
        }
        Err(err) => {
            session.record_error(
                ErrorKind::Ledger,
                Some((&author_name, &author_id)),
                err.to_string(),
            );
            return;
        }
    }

    processed_users.insert(author_id.clone());

    let Some(role_id) = ctx.role_id else {
        sleep(ctx.tuning.process_delay).await;
        return;
    };

    let member = match resolve_member(ctx.gateway, ctx.tuning, &message.guild_id, &author_id).await
    {
        Ok(member) => member,
        Err(GatewayError::UnknownMember) => {
            warn!(user = %author_name, "Cannot grant role: unknown member");
            session.unknown_members.push(UserRef {
                username: author_name,
                user_id: author_id,
            });
            return;
        }
        Err(err) => {
            session.record_error(
                ErrorKind::Grant,
                Some((&author_name, &author_id)),
                err.to_string(),
            );
            retries.push(message, 1);
            return;
        }
    };

    if member.has_role(role_id) {
        // Nothing to grant, but persist the flag so the next run skips
        // this participant outright.
        if let Err(err) = ctx
            .db
            .mark_granted(&message.guild_id, &author_id, ctx.event_id)
            .await
        {
            session.record_error(
                ErrorKind::Ledger,
                Some((&author_name, &author_id)),
                err.to_string(),
            );
        }
        sleep(ctx.tuning.process_delay).await;
        return;
    }

    match grant_role(ctx.gateway, ctx.tuning, &message.guild_id, &author_id, role_id).await {
        Ok(()) => {
            session.roles_assigned += 1;
            session.assigned_users.push(UserRef {
                username: author_name.clone(),
                user_id: author_id.clone(),
            });
            if let Err(err) = ctx
                .db
                .mark_granted(&message.guild_id, &author_id, ctx.event_id)
                .await
            {
                session.record_error(
                    ErrorKind::Ledger,
                    Some((&author_name, &author_id)),
                    err.to_string(),
                );
            }
            session.set_match_status(&author_id, &link, MatchStatus::Processed);
            info!(user = %author_name, role = role_id, "Role granted");
            sleep(ctx.tuning.grant_delay).await;
        }
        Err(GatewayError::UnknownMember) => {
            session.unknown_members.push(UserRef {
                username: author_name,
                user_id: author_id,
            });
            return;
        }
        Err(err) => {
            warn!(user = %author_name, error = %err, "Role grant failed, queueing for retry");
            session.record_error(
                ErrorKind::Grant,
                Some((&author_name, &author_id)),
                err.to_string(),
            );
            retries.push(message, 1);
            return;
        }
    }

    sleep(ctx.tuning.process_delay).await;
}

/// Resolve a member, honoring rate-limit signals inline. Every other
/// outcome is returned to the caller.
pub(crate) async fn resolve_member<G: ChannelGateway>(
    gateway: &G,
    tuning: &ScanTuning,
    guild_id: &str,
    user_id: &str,
) -> Result<Member, GatewayError> {
    loop {
        match gateway.fetch_member(guild_id, user_id).await {
            Err(GatewayError::RateLimited { retry_after }) => {
                let wait = retry_after.unwrap_or(tuning.rate_limit_fallback);
                warn!(
                    user = %user_id,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limited while resolving member, waiting"
                );
                sleep(wait).await;
            }
            other => return other,
        }
    }
}

/// Attempt a grant, honoring rate-limit signals inline. Rate limits are
/// never an error and never consume the retry budget.
pub(crate) async fn grant_role<G: ChannelGateway>(
    gateway: &G,
    tuning: &ScanTuning,
    guild_id: &str,
    user_id: &str,
    role_id: &str,
) -> Result<(), GatewayError> {
    loop {
        match gateway.grant_role(guild_id, user_id, role_id).await {
            Err(GatewayError::RateLimited { retry_after }) => {
                let wait = retry_after.unwrap_or(tuning.rate_limit_fallback);
                warn!(
                    user = %user_id,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limited while granting role, waiting"
                );
                sleep(wait).await;
            }
            other => return other,
        }
    }
}
