//! Scan orchestrator.
//!
//! One run: backward history walk feeding the classifier, then the
//! retry-queue drain, then session finalization. Strictly sequential;
//! every suspension point is awaited to completion before the next step
//! begins, which is what the ordering and idempotency guarantees rest on.

use crate::classify::{self, RunCtx};
use crate::error::ScanError;
use crate::gateway::{ChannelGateway, ProgressSink};
use crate::pager::HistoryPager;
use crate::retry::RetryQueue;
use crate::session::ScanSession;
use crate::tuning::ScanTuning;
use shrine_db::{EventConfig, ShrineDb};
use std::collections::HashSet;
use tracing::info;

pub struct Scanner<G, P> {
    db: ShrineDb,
    gateway: G,
    progress: P,
    tuning: ScanTuning,
}

impl<G: ChannelGateway, P: ProgressSink> Scanner<G, P> {
    pub fn new(db: ShrineDb, gateway: G, progress: P) -> Self {
        Self::with_tuning(db, gateway, progress, ScanTuning::default())
    }

    pub fn with_tuning(db: ShrineDb, gateway: G, progress: P, tuning: ScanTuning) -> Self {
        Self {
            db,
            gateway,
            progress,
            tuning,
        }
    }

    /// Run one complete scan of `channel_id` under `config`, granting
    /// each qualifying, not-yet-processed participant exactly once.
    ///
    /// Returns the finalized session; the caller renders and persists
    /// the report.
    pub async fn run(
        &self,
        channel_id: &str,
        config: &EventConfig,
        event_id: &str,
    ) -> Result<ScanSession, ScanError> {
        let Some(sticker_id) = config.sticker_id.as_deref() else {
            return Err(ScanError::NotConfigured("sticker_id"));
        };
        if config.channel_id.is_none() {
            return Err(ScanError::NotConfigured("channel_id"));
        }

        let ctx = RunCtx {
            db: &self.db,
            gateway: &self.gateway,
            tuning: &self.tuning,
            sticker_id,
            role_id: config.role_id.as_deref(),
            event_id,
        };

        let mut session = ScanSession::new();
        let mut processed_users: HashSet<String> = HashSet::new();
        let mut retries = RetryQueue::new(self.tuning.max_retry_attempts);
        let mut pager = HistoryPager::new(&self.gateway, &self.tuning, channel_id);

        let started = tokio::time::Instant::now();
        info!(channel = %channel_id, event = %event_id, "Starting scan");

        while !pager.exhausted() {
            let page = pager.next_page().await;
            session.messages_scanned += page.len() as u64;

            if pager.pages_fetched() % self.tuning.progress_every.max(1) == 0 {
                self.progress
                    .notify(&format!(
                        "Progress update: scanned {} messages, found {} stickers, \
                         assigned {} roles, {} errors",
                        session.messages_scanned,
                        session.matching_stickers,
                        session.roles_assigned,
                        session.errors
                    ))
                    .await;
            }

            if page.is_empty() {
                break;
            }

            classify::process_page(&ctx, page, &mut processed_users, &mut session, &mut retries)
                .await;
        }

        if !retries.is_empty() {
            info!(queued = retries.len(), "Draining grant retry queue");
        }
        retries.drain(&ctx, &mut session).await;

        session.finalize(started.elapsed());
        info!(
            scanned = session.messages_scanned,
            matched = session.matching_stickers,
            granted = session.roles_assigned,
            errors = session.errors,
            "Scan complete"
        );

        Ok(session)
    }
}
