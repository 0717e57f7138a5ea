//! One poll cycle over one mailbox, plus back-off bookkeeping.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::MailboxConfig;
use crate::db::Database;
use crate::message::InboundMessage;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::router::{Disposition, RoutingOutcome};

use super::cursor::{CursorOutcome, CursorStats, MailboxCursor};
use super::error::{EmailError, Result};
use super::parser::parse_message;
use super::transport::{MailTransport, TransportFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    Connected,
    Disconnected,
}

/// What one poll cycle did.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub mailbox: String,
    /// UIDs in the lookback window.
    pub listed: usize,
    /// UIDs not yet in the cursor.
    pub new: usize,
    /// Messages fetched and handled this cycle.
    pub processed: usize,
    pub followups: usize,
    pub duplicates: usize,
    pub dispatched: usize,
    pub logged: usize,
    pub dispatch_failures: usize,
    pub self_skipped: usize,
    pub parse_errors: usize,
    pub fetch_timeouts: usize,
    /// Messages left out of the cursor because of a storage error.
    pub storage_errors: usize,
    pub budget_exhausted: bool,
    /// The cycle was not attempted because the watcher is backing off.
    pub deferred: bool,
    pub transport_error: Option<String>,
    pub outcomes: Vec<RoutingOutcome>,
}

impl PollReport {
    fn new(mailbox: &str) -> Self {
        Self {
            mailbox: mailbox.to_string(),
            ..Default::default()
        }
    }

    fn count(&mut self, outcome: &RoutingOutcome) {
        match outcome.disposition {
            Disposition::FollowUp => {
                self.followups += 1;
                self.dispatched += 1;
            }
            Disposition::Dispatched => self.dispatched += 1,
            Disposition::Logged => self.logged += 1,
            Disposition::Duplicate => self.duplicates += 1,
            Disposition::DispatchFailed => self.dispatch_failures += 1,
        }
    }
}

/// Delay before the next attempt after `failures` consecutive transport
/// failures: `poll_interval * 2^(failures-1)`, capped at `max_backoff`.
pub fn backoff_delay(poll_interval: u64, failures: u32, max_backoff: u64) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let exponent = (failures - 1).min(32);
    let secs = poll_interval.saturating_mul(1u64 << exponent).min(max_backoff);
    Duration::from_secs(secs)
}

/// Watches one mailbox. Owns its cursor; shares the pipeline.
pub struct MailboxWatcher {
    config: MailboxConfig,
    factory: Arc<dyn TransportFactory>,
    pipeline: Arc<Pipeline>,
    cursor: MailboxCursor,
    state: WatcherState,
    consecutive_failures: u32,
    retry_at: Option<Instant>,
}

impl MailboxWatcher {
    pub fn new(
        config: MailboxConfig,
        db: Database,
        factory: Arc<dyn TransportFactory>,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        let cursor = MailboxCursor::new(db, config.name.clone());
        Self {
            config,
            factory,
            pipeline,
            cursor,
            state: WatcherState::Disconnected,
            consecutive_failures: 0,
            retry_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Remaining back-off, if any.
    pub fn backoff_remaining(&self) -> Option<Duration> {
        self.retry_at
            .map(|at| at.saturating_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    pub fn cursor_stats(&self) -> Result<CursorStats> {
        self.cursor.stats()
    }

    /// Scheduled poll. Deferred while backing off; never fails.
    pub async fn poll(&mut self) -> PollReport {
        if let Some(remaining) = self.backoff_remaining() {
            debug!(
                mailbox = %self.config.name,
                remaining_secs = remaining.as_secs(),
                "Backing off, poll deferred"
            );
            let mut report = PollReport::new(&self.config.name);
            report.deferred = true;
            return report;
        }
        self.run_cycle().await
    }

    /// Manual one-off poll that ignores back-off.
    pub async fn sweep(&mut self) -> PollReport {
        self.run_cycle().await
    }

    /// Parsed messages of the lookback window, excluding our own mail.
    /// Leaves the cursor and back-off state alone.
    pub async fn snapshot(&self) -> Result<Vec<InboundMessage>> {
        let span = info_span!("snapshot", mailbox = %self.config.name);
        async {
            let deadline = self.cycle_deadline();
            let mut transport = self.factory.create(&self.config);
            bounded("connect", self.step_limit(deadline), transport.connect()).await?;
            let result = self.snapshot_folder(transport.as_mut(), deadline).await;
            disconnect_quietly(transport.as_mut()).await;
            let messages = result?;
            info!(count = messages.len(), "Snapshot taken");
            Ok(messages)
        }
        .instrument(span)
        .await
    }

    async fn snapshot_folder(
        &self,
        transport: &mut dyn MailTransport,
        deadline: Instant,
    ) -> Result<Vec<InboundMessage>> {
        let folder = &self.config.folder;
        bounded("examine", self.step_limit(deadline), transport.examine(folder)).await?;
        let uids = bounded(
            "search",
            self.step_limit(deadline),
            transport.search_since(self.since_date()),
        )
        .await?;

        let fetch_timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        let mut messages = Vec::with_capacity(uids.len());
        for uid in uids {
            let raw = match tokio::time::timeout(fetch_timeout, transport.fetch_peek(uid)).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) if e.is_transport() => return Err(e),
                Ok(Err(e)) => {
                    warn!(uid, "Skipping message in snapshot: {}", e);
                    continue;
                }
                Err(_) => {
                    warn!(uid, "Fetch timed out in snapshot");
                    continue;
                }
            };
            match parse_message(&raw, uid, &self.config.name, Utc::now()) {
                Ok(message) if self.pipeline.is_own(&message.sender_email) => {}
                Ok(message) => messages.push(message),
                Err(e) => warn!(uid, "Skipping unparseable message in snapshot: {}", e),
            }
        }
        Ok(messages)
    }

    async fn run_cycle(&mut self) -> PollReport {
        let span = info_span!("poll", mailbox = %self.config.name);
        let mut report = PollReport::new(&self.config.name);

        let result = self.cycle(&mut report).instrument(span.clone()).await;
        let _entered = span.enter();

        match result {
            Ok(()) => {
                if self.state == WatcherState::Disconnected && self.consecutive_failures > 0 {
                    info!(
                        failures = self.consecutive_failures,
                        "Mailbox reachable again"
                    );
                }
                self.state = WatcherState::Connected;
                self.consecutive_failures = 0;
                self.retry_at = None;
                info!(
                    listed = report.listed,
                    new = report.new,
                    processed = report.processed,
                    dispatched = report.dispatched,
                    duplicates = report.duplicates,
                    budget_exhausted = report.budget_exhausted,
                    "Poll cycle complete"
                );
            }
            Err(e) if e.is_transport() => {
                self.state = WatcherState::Disconnected;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let delay = backoff_delay(
                    self.config.poll_interval,
                    self.consecutive_failures,
                    self.config.max_backoff_secs,
                );
                self.retry_at = Some(Instant::now() + delay);
                warn!(
                    failures = self.consecutive_failures,
                    backoff_secs = delay.as_secs(),
                    "Mailbox unavailable: {}",
                    e
                );
                report.transport_error = Some(e.to_string());
            }
            Err(e) => {
                error!("Poll cycle aborted: {}", e);
                report.transport_error = Some(e.to_string());
            }
        }

        report
    }

    async fn cycle(&mut self, report: &mut PollReport) -> Result<()> {
        let deadline = self.cycle_deadline();
        let mut transport = self.factory.create(&self.config);
        bounded("connect", self.step_limit(deadline), transport.connect()).await?;

        let result = self.process_folder(transport.as_mut(), report, deadline).await;
        disconnect_quietly(transport.as_mut()).await;
        result
    }

    async fn process_folder(
        &mut self,
        transport: &mut dyn MailTransport,
        report: &mut PollReport,
        deadline: Instant,
    ) -> Result<()> {
        let folder = &self.config.folder;
        let uidvalidity =
            bounded("examine", self.step_limit(deadline), transport.examine(folder)).await?;
        self.cursor.set_uidvalidity(uidvalidity)?;

        let mut uids = bounded(
            "search",
            self.step_limit(deadline),
            transport.search_since(self.since_date()),
        )
        .await?;
        // Listing order is kept; only repeats are dropped.
        let mut seen = HashSet::with_capacity(uids.len());
        uids.retain(|uid| seen.insert(*uid));
        report.listed = uids.len();

        let unprocessed = self.cursor.filter_unprocessed(uids)?;
        report.new = unprocessed.len();
        if unprocessed.is_empty() {
            debug!("No new messages");
            return Ok(());
        }

        let fetch_timeout = Duration::from_secs(self.config.fetch_timeout_secs);

        for uid in unprocessed.into_iter().take(self.config.batch_size as usize) {
            if Instant::now() >= deadline {
                info!(
                    processed = report.processed,
                    "Cycle budget exhausted, remaining messages wait for the next tick"
                );
                report.budget_exhausted = true;
                break;
            }

            let raw = match tokio::time::timeout(fetch_timeout, transport.fetch_peek(uid)).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) if e.is_transport() => return Err(e),
                Ok(Err(e)) => {
                    warn!(uid, "Fetch failed, retrying next cycle: {}", e);
                    continue;
                }
                Err(_) => {
                    warn!(
                        uid,
                        timeout_secs = fetch_timeout.as_secs(),
                        "Fetch timed out, retrying next cycle"
                    );
                    report.fetch_timeouts += 1;
                    continue;
                }
            };

            self.handle_message(uid, &raw, report);
        }

        Ok(())
    }

    /// Parse, process, record. Never fails the cycle.
    fn handle_message(&self, uid: u32, raw: &[u8], report: &mut PollReport) {
        let message = match parse_message(raw, uid, &self.config.name, Utc::now()) {
            Ok(message) => message,
            Err(e) => {
                warn!(uid, mailbox = %self.config.name, "Unparseable message: {}", e);
                report.parse_errors += 1;
                report.processed += 1;
                self.record(uid, None, None, CursorOutcome::ParseError);
                return;
            }
        };

        match self.pipeline.process(&message) {
            Ok(PipelineOutcome::SelfSent) => {
                report.self_skipped += 1;
                report.processed += 1;
                self.record(uid, message.headers.message_id.clone(), None, CursorOutcome::SelfSent);
            }
            Ok(PipelineOutcome::Routed(outcome)) => {
                report.count(&outcome);
                report.processed += 1;
                self.record(
                    uid,
                    message.headers.message_id.clone(),
                    outcome.fingerprint.clone(),
                    CursorOutcome::Routed(outcome.disposition),
                );
                report.outcomes.push(outcome);
            }
            Err(e) => {
                error!(uid, "Storage error, message left for the next cycle: {}", e);
                report.storage_errors += 1;
            }
        }
    }

    fn record(
        &self,
        uid: u32,
        message_id: Option<String>,
        fingerprint: Option<String>,
        outcome: CursorOutcome,
    ) {
        if let Err(e) = self.cursor.mark(uid, message_id, fingerprint, outcome) {
            error!(uid, "Failed to record UID in cursor: {}", e);
        }
    }

    fn cycle_deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(self.config.cycle_budget_secs)
    }

    /// Time allowed for one session step: the fetch timeout, cut short by
    /// whatever is left of the cycle budget.
    fn step_limit(&self, deadline: Instant) -> Duration {
        Duration::from_secs(self.config.fetch_timeout_secs)
            .min(deadline.saturating_duration_since(Instant::now()))
    }

    fn since_date(&self) -> NaiveDate {
        Utc::now().date_naive() - chrono::Duration::days(i64::from(self.config.lookback_days))
    }
}

/// Runs a session step under `limit`. A server that stops answering yields
/// `EmailError::Timeout`, which backs the watcher off like any outage.
async fn bounded<T>(
    step: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(EmailError::Timeout(format!(
            "{} did not complete within {}s",
            step,
            limit.as_secs()
        ))),
    }
}

async fn disconnect_quietly(transport: &mut dyn MailTransport) {
    if let Err(e) = transport.disconnect().await {
        debug!("Disconnect failed: {}", e);
    }
}
