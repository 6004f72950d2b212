use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use herald_core::config::SchedulerConfig;
use herald_core::message::WireMessage;
use herald_core::Clock;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    dispatch::{DispatchError, Dispatcher},
    error::Result,
    store::JobStore,
    types::{ScheduleJob, SchedulePatch},
};

#[derive(Debug, Clone)]
pub struct TickerConfig {
    pub tick_interval: Duration,
    /// Delay before the first pass after start, which catches up on anything
    /// that came due while the process was down.
    pub catch_up_delay: Duration,
    pub max_concurrent_dispatch: usize,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for TickerConfig {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(cfg.tick_secs.max(1)),
            catch_up_delay: Duration::from_secs(cfg.catch_up_delay_secs),
            max_concurrent_dispatch: cfg.max_concurrent_dispatch.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unsupported route or unusable payload; retrying will not help.
    Configuration,
    /// Network or collaborator failure; the row stays due and is retried.
    Transient,
}

/// Result of one dispatch attempt for one row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FireOutcome {
    pub id: i64,
    pub label: String,
    pub target: String,
    pub message_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    pub fired_at: i64,
    /// The message as sent, when the dispatch succeeded.
    #[serde(skip)]
    pub sent: Option<WireMessage>,
}

impl FireOutcome {
    fn success(job: &ScheduleJob, fired_at: i64, sent: WireMessage) -> Self {
        Self {
            id: job.id,
            label: job.label.clone(),
            target: job.target.clone(),
            message_type: job.message_type.clone(),
            success: true,
            error: None,
            failure_kind: None,
            fired_at,
            sent: Some(sent),
        }
    }

    fn failure(job: &ScheduleJob, fired_at: i64, err: &DispatchError) -> Self {
        let kind = if err.is_configuration_error() {
            FailureKind::Configuration
        } else {
            FailureKind::Transient
        };
        Self {
            id: job.id,
            label: job.label.clone(),
            target: job.target.clone(),
            message_type: job.message_type.clone(),
            success: false,
            error: Some(err.to_string()),
            failure_kind: Some(kind),
            fired_at,
            sent: None,
        }
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// The pass did not run: another pass held the guard, or no live session.
    pub skipped: bool,
    pub outcomes: Vec<FireOutcome>,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            outcomes: Vec::new(),
        }
    }

    pub fn fired(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }
}

#[derive(Debug)]
pub enum RunNow {
    NotFound,
    /// The row is disabled; nothing was written or sent.
    NotDue(ScheduleJob),
    Fired(FireOutcome),
}

/// Periodic reconciliation: fires every due row once per pass.
///
/// Passes are single-flight. A periodic pass that finds another pass in
/// progress is skipped; [`Ticker::run_now`] waits for it instead.
pub struct Ticker {
    store: JobStore,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    config: TickerConfig,
    guard: Mutex<()>,
    /// If set, every outcome is forwarded here for notification routing.
    outcome_tx: Option<mpsc::Sender<FireOutcome>>,
}

impl Ticker {
    pub fn new(
        store: JobStore,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        config: TickerConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            config,
            guard: Mutex::new(()),
            outcome_tx: None,
        }
    }

    /// Forward a copy of every [`FireOutcome`] to `tx`.
    ///
    /// Uses `try_send`, so a slow consumer never stalls a pass.
    pub fn with_outcomes(mut self, tx: mpsc::Sender<FireOutcome>) -> Self {
        self.outcome_tx = Some(tx);
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run one pass unless another is in progress.
    ///
    /// Dispatch failures are reported in the outcomes; only persistence
    /// failures are returned as errors.
    pub async fn tick(&self) -> Result<TickReport> {
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("previous pass still running, skipping tick");
            return Ok(TickReport::skipped());
        };
        self.reconcile().await
    }

    /// Force `id` due and fire it now, after any pass in progress.
    ///
    /// Disabled rows are left untouched and reported as [`RunNow::NotDue`].
    pub async fn run_now(&self, id: i64) -> Result<RunNow> {
        let _guard = self.guard.lock().await;

        let Some(job) = self.store.get(id)? else {
            return Ok(RunNow::NotFound);
        };
        if !job.enabled {
            debug!(job_id = id, "run_now: row is disabled");
            return Ok(RunNow::NotDue(job));
        }
        // Due from here on, so a transient failure is retried by the next pass.
        let Some(job) = self.store.patch(id, SchedulePatch::run_now())? else {
            return Ok(RunNow::NotFound);
        };
        let result = self
            .dispatcher
            .dispatch(&job.target, &job.category, &job.message_type, &job.payload)
            .await;
        let outcome = self.settle(job, result)?;
        self.emit(&outcome);
        Ok(RunNow::Fired(outcome))
    }

    /// Main loop: a catch-up pass after `catch_up_delay`, then one pass per
    /// `tick_interval`, until `shutdown` broadcasts `true`. A pass already
    /// under way is finished first.
    ///
    /// Returns `Err` on persistence failure; the caller should treat that as fatal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            "scheduler ticker started"
        );
        let start = tokio::time::Instant::now() + self.config.catch_up_delay;
        let mut interval = tokio::time::interval_at(start, self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler ticker shutting down");
                        break;
                    }
                    continue;
                }
            }

            // Not raced against shutdown: a started pass always settles.
            match self.tick().await {
                Ok(report) if !report.outcomes.is_empty() => {
                    info!(fired = report.fired(), failed = report.failed(), "tick complete");
                }
                Ok(_) => {}
                Err(e) => {
                    error!("scheduler persistence failure: {e}");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    // --- private helpers ---------------------------------------------------

    /// One pass. Caller holds the guard.
    async fn reconcile(&self) -> Result<TickReport> {
        if !self.dispatcher.is_connected() {
            debug!("no live session, skipping tick");
            return Ok(TickReport::skipped());
        }

        let due = self.store.due(self.clock.now_ms())?;
        if due.is_empty() {
            return Ok(TickReport::default());
        }
        debug!(count = due.len(), "due schedules");

        let dispatcher = &self.dispatcher;
        let mut in_flight = stream::iter(due)
            .map(move |job| async move {
                let result = dispatcher
                    .dispatch(&job.target, &job.category, &job.message_type, &job.payload)
                    .await;
                (job, result)
            })
            .buffer_unordered(self.config.max_concurrent_dispatch);

        let mut report = TickReport::default();
        // Results are settled one at a time, so store writes never interleave.
        while let Some((job, result)) = in_flight.next().await {
            let outcome = self.settle(job, result)?;
            self.emit(&outcome);
            report.outcomes.push(outcome);
        }
        Ok(report)
    }

    /// Persist the result of one dispatch and describe it.
    fn settle(
        &self,
        job: ScheduleJob,
        result: std::result::Result<WireMessage, DispatchError>,
    ) -> Result<FireOutcome> {
        let fired_at = self.clock.now_ms();
        match result {
            Ok(sent) => {
                let updated = self.store.mark_fired(job.id, fired_at)?;
                info!(
                    job_id = job.id,
                    label = %job.label,
                    target = %job.target,
                    next_run_at = ?updated.as_ref().and_then(|j| j.next_run_at),
                    "schedule fired"
                );
                Ok(FireOutcome::success(&job, fired_at, sent))
            }
            Err(e) => {
                if e.is_configuration_error() {
                    error!(job_id = job.id, "schedule misconfigured: {e}");
                } else {
                    warn!(job_id = job.id, "dispatch failed, will retry next tick: {e}");
                }
                Ok(FireOutcome::failure(&job, fired_at, &e))
            }
        }
    }

    fn emit(&self, outcome: &FireOutcome) {
        if let Some(ref tx) = self.outcome_tx {
            if tx.try_send(outcome.clone()).is_err() {
                warn!(job_id = outcome.id, "outcome channel full or closed, notification dropped");
            }
        }
    }
}
