//! Backward-walking history pager.
//!
//! Walks a channel's history from "now" toward its origin in fixed-size
//! pages, pacing itself between fetches and absorbing rate-limit and
//! transient failures without ever surfacing them. A page that cannot be
//! fetched is retried at the same cursor indefinitely: a persistently
//! failing channel stalls the scan instead of silently skipping history.

use crate::gateway::{ChannelGateway, GatewayError, Message};
use crate::tuning::ScanTuning;
use tokio::time::sleep;
use tracing::{debug, warn};

pub struct HistoryPager<'a, G: ChannelGateway> {
    gateway: &'a G,
    tuning: &'a ScanTuning,
    channel_id: String,
    cursor: Option<String>,
    exhausted: bool,
    pages_fetched: u64,
}

impl<'a, G: ChannelGateway> HistoryPager<'a, G> {
    pub fn new(gateway: &'a G, tuning: &'a ScanTuning, channel_id: impl Into<String>) -> Self {
        Self {
            gateway,
            tuning,
            channel_id: channel_id.into(),
            cursor: None,
            exhausted: false,
            pages_fetched: 0,
        }
    }

    /// True once a short or empty page has been returned.
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Fetch the next page, newest message first. Returns an empty page
    /// once the history is exhausted.
    ///
    /// Rate-limit signals suspend for the indicated duration (or the
    /// configured fallback) and reissue the identical request. Other
    /// failures retry the same cursor under a doubling backoff.
    pub async fn next_page(&mut self) -> Vec<Message> {
        if self.exhausted {
            return Vec::new();
        }

        if self.pages_fetched > 0 {
            sleep(self.tuning.fetch_delay).await;
        }

        let mut consecutive_failures: u32 = 0;
        loop {
            match self
                .gateway
                .fetch_page(
                    &self.channel_id,
                    self.cursor.as_deref(),
                    self.tuning.page_size,
                )
                .await
            {
                Ok(page) => {
                    self.pages_fetched += 1;
                    if page.len() < self.tuning.page_size {
                        self.exhausted = true;
                    }
                    if let Some(oldest) = page.last() {
                        self.cursor = Some(oldest.id.clone());
                    }
                    debug!(
                        channel = %self.channel_id,
                        page = self.pages_fetched,
                        len = page.len(),
                        exhausted = self.exhausted,
                        "Fetched history page"
                    );
                    return page;
                }
                Err(GatewayError::RateLimited { retry_after }) => {
                    let wait = retry_after.unwrap_or(self.tuning.rate_limit_fallback);
                    warn!(
                        channel = %self.channel_id,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited while fetching messages, waiting before retry"
                    );
                    sleep(wait).await;
                }
                Err(err) => {
                    consecutive_failures += 1;
                    let backoff = self.tuning.fetch_backoff(consecutive_failures);
                    warn!(
                        channel = %self.channel_id,
                        cursor = ?self.cursor,
                        failures = consecutive_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Error fetching messages, retrying same page"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}
