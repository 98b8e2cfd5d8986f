//! Recurring escalation loop.
//!
//! Each tick snapshots the pending reviews, evaluates the escalation policy
//! against one shared `now`, and dispatches reminders with bounded
//! concurrency. Failures are isolated per review and counted in the
//! [`TickReport`]; a failed listing only skips the current tick.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use prbot_core::{elapsed_between, Clock, ErrorKind, Review, ReviewError, ReviewerSet};
use prbot_store::ReviewStore;
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::dispatcher::NotificationDispatcher;
use crate::engagement::EngagementResolver;
use crate::policy::{EscalationPolicy, TierLevel};

const DEFAULT_DISPATCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationSchedulerConfig {
    pub tick_interval: Duration,
    pub policy: EscalationPolicy,
    /// Upper bound on reminders in flight within one tick.
    pub dispatch_concurrency: usize,
    /// When set, a review is re-notified only after its tier changes or this
    /// much time passed since its last reminder.
    pub reminder_cooldown: Option<Duration>,
}

impl EscalationSchedulerConfig {
    pub fn production() -> Self {
        Self {
            tick_interval: Duration::from_secs(24 * 3_600),
            policy: EscalationPolicy::production(),
            dispatch_concurrency: DEFAULT_DISPATCH_CONCURRENCY,
            reminder_cooldown: None,
        }
    }

    pub fn fast() -> Self {
        Self {
            tick_interval: Duration::from_secs(7),
            policy: EscalationPolicy::fast(),
            dispatch_concurrency: DEFAULT_DISPATCH_CONCURRENCY,
            reminder_cooldown: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            anyhow::bail!("escalation tick interval must be greater than zero");
        }
        if self.dispatch_concurrency == 0 {
            anyhow::bail!("dispatch concurrency must be greater than zero");
        }
        if self.reminder_cooldown.is_some_and(|cooldown| cooldown.is_zero()) {
            anyhow::bail!("reminder cooldown must be greater than zero when set");
        }
        Ok(())
    }
}

/// What a single tick did with one pending review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReviewOutcome {
    NotDue,
    /// Approved between the snapshot and the refresh.
    Resolved,
    CoolingDown { tier: TierLevel },
    Dispatched { tier: TierLevel },
    Failed { error_kind: ErrorKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub tick_at: DateTime<Utc>,
    pub listing_failed: bool,
    pub pending_reviews: usize,
    pub not_due: usize,
    pub resolved: usize,
    pub cooling_down: usize,
    pub direct_reminders: usize,
    pub broadcast_reminders: usize,
    pub failed: usize,
    pub failed_keys: Vec<String>,
}

impl TickReport {
    fn new(tick: u64, tick_at: DateTime<Utc>) -> Self {
        Self {
            tick,
            tick_at,
            listing_failed: false,
            pending_reviews: 0,
            not_due: 0,
            resolved: 0,
            cooling_down: 0,
            direct_reminders: 0,
            broadcast_reminders: 0,
            failed: 0,
            failed_keys: Vec::new(),
        }
    }

    fn record(&mut self, correlation_key: String, outcome: ReviewOutcome) {
        match outcome {
            ReviewOutcome::NotDue => self.not_due += 1,
            ReviewOutcome::Resolved => self.resolved += 1,
            ReviewOutcome::CoolingDown { .. } => self.cooling_down += 1,
            ReviewOutcome::Dispatched { tier } => match tier {
                TierLevel::Broadcast => self.broadcast_reminders += 1,
                TierLevel::Direct => self.direct_reminders += 1,
                TierLevel::None => {}
            },
            ReviewOutcome::Failed { .. } => {
                self.failed += 1;
                self.failed_keys.push(correlation_key);
            }
        }
    }

    pub fn reminders_sent(&self) -> usize {
        self.direct_reminders + self.broadcast_reminders
    }
}

#[derive(Debug, Clone, Copy)]
struct ReminderMark {
    tier: TierLevel,
    at: DateTime<Utc>,
}

pub struct EscalationScheduler {
    config: EscalationSchedulerConfig,
    store: Arc<dyn ReviewStore>,
    engagement: Arc<dyn EngagementResolver>,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    ticks: AtomicU64,
    reminder_marks: Mutex<HashMap<String, ReminderMark>>,
}

impl EscalationScheduler {
    pub fn new(
        config: EscalationSchedulerConfig,
        store: Arc<dyn ReviewStore>,
        engagement: Arc<dyn EngagementResolver>,
        dispatcher: NotificationDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            engagement,
            dispatcher,
            clock,
            ticks: AtomicU64::new(0),
            reminder_marks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EscalationSchedulerConfig {
        &self.config
    }

    /// Runs one escalation pass over the current pending snapshot.
    pub async fn run_tick(&self) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let now = self.clock.now();
        let mut report = TickReport::new(tick, now);

        let pending = match self.store.list_pending().await {
            Ok(pending) => pending,
            Err(error) => {
                tracing::warn!(tick, %error, "escalation tick skipped: pending listing failed");
                report.listing_failed = true;
                return report;
            }
        };
        report.pending_reviews = pending.len();

        let outcomes = stream::iter(pending.clone())
            .map(|review| async move {
                let outcome = self.process_review(&review, now).await;
                (review.correlation_key, outcome)
            })
            .buffer_unordered(self.config.dispatch_concurrency.max(1))
            .collect::<Vec<_>>()
            .await;
        for (correlation_key, outcome) in outcomes {
            report.record(correlation_key, outcome);
        }
        self.forget_marks_outside(&pending);

        tracing::info!(
            tick,
            pending = report.pending_reviews,
            direct = report.direct_reminders,
            broadcast = report.broadcast_reminders,
            cooling_down = report.cooling_down,
            failed = report.failed,
            "escalation tick complete"
        );
        report
    }

    async fn process_review(&self, review: &Review, now: DateTime<Utc>) -> ReviewOutcome {
        let policy = &self.config.policy;
        let elapsed = elapsed_between(review.created_at, now);
        if elapsed < policy.start_after() {
            return ReviewOutcome::NotDue;
        }

        let current = match self
            .store
            .get_by_correlation_key(&review.correlation_key)
            .await
        {
            Ok(current) => current,
            Err(error) => {
                let error = ReviewError::from(error);
                tracing::warn!(
                    correlation_key = %review.correlation_key,
                    %error,
                    "review refresh failed"
                );
                return ReviewOutcome::Failed {
                    error_kind: error.kind(),
                };
            }
        };
        if current.status().is_terminal() {
            return ReviewOutcome::Resolved;
        }

        let engaged = if policy.needs_engagement(elapsed) {
            self.engagement.resolve(&current).await
        } else {
            ReviewerSet::new()
        };
        let tier = policy.evaluate(elapsed, &current.reviewers, &engaged);
        let level = tier.level();
        if level == TierLevel::None {
            return ReviewOutcome::NotDue;
        }
        if self.is_cooling_down(&current.correlation_key, level, now) {
            tracing::debug!(
                correlation_key = %current.correlation_key,
                tier = level.as_str(),
                "reminder suppressed by cooldown"
            );
            return ReviewOutcome::CoolingDown { tier: level };
        }

        match self.dispatcher.dispatch(&current, &tier).await {
            Ok(_) => {
                self.mark_reminded(&current.correlation_key, level, now);
                ReviewOutcome::Dispatched { tier: level }
            }
            Err(error) => {
                tracing::warn!(
                    correlation_key = %current.correlation_key,
                    tier = level.as_str(),
                    %error,
                    "review reminder failed"
                );
                ReviewOutcome::Failed {
                    error_kind: error.kind(),
                }
            }
        }
    }

    fn is_cooling_down(&self, correlation_key: &str, tier: TierLevel, now: DateTime<Utc>) -> bool {
        let Some(cooldown) = self.config.reminder_cooldown else {
            return false;
        };
        let marks = self
            .reminder_marks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        marks.get(correlation_key).is_some_and(|mark| {
            mark.tier == tier && elapsed_between(mark.at, now) < cooldown
        })
    }

    fn mark_reminded(&self, correlation_key: &str, tier: TierLevel, now: DateTime<Utc>) {
        if self.config.reminder_cooldown.is_none() {
            return;
        }
        let mut marks = self
            .reminder_marks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        marks.insert(correlation_key.to_string(), ReminderMark { tier, at: now });
    }

    fn forget_marks_outside(&self, pending: &[Review]) {
        if self.config.reminder_cooldown.is_none() {
            return;
        }
        let live = pending
            .iter()
            .map(|review| review.correlation_key.as_str())
            .collect::<HashSet<_>>();
        let mut marks = self
            .reminder_marks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        marks.retain(|key, _| live.contains(key.as_str()));
    }
}

pub struct EscalationSchedulerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    reports: watch::Receiver<Option<TickReport>>,
}

impl EscalationSchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Receiver updated after every completed tick.
    pub fn subscribe(&self) -> watch::Receiver<Option<TickReport>> {
        self.reports.clone()
    }

    pub fn latest_report(&self) -> Option<TickReport> {
        self.reports.borrow().clone()
    }

    /// Stops the loop after the in-flight tick, if any, completes.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

pub fn start_escalation_scheduler(
    scheduler: Arc<EscalationScheduler>,
) -> Result<EscalationSchedulerHandle> {
    scheduler.config.validate()?;
    let handle = tokio::runtime::Handle::try_current()
        .context("escalation scheduler requires an active Tokio runtime")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (report_tx, report_rx) = watch::channel(None);
    tracing::info!(
        tick_interval_ms = scheduler.config.tick_interval.as_millis() as u64,
        start_after_secs = scheduler.config.policy.start_after().as_secs(),
        channel_after_secs = scheduler.config.policy.channel_after().as_secs(),
        "escalation scheduler started"
    );
    let task = handle.spawn(async move {
        run_escalation_loop(scheduler, shutdown_rx, report_tx).await;
    });
    Ok(EscalationSchedulerHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
        reports: report_rx,
    })
}

async fn run_escalation_loop(
    scheduler: Arc<EscalationScheduler>,
    mut shutdown_rx: oneshot::Receiver<()>,
    report_tx: watch::Sender<Option<TickReport>>,
) {
    let period = scheduler.config.tick_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {
                let report = scheduler.run_tick().await;
                report_tx.send_replace(Some(report));
            }
        }
    }
    tracing::info!(
        ticks = scheduler.ticks.load(Ordering::Relaxed),
        "escalation scheduler stopped"
    );
}
