//! Fallback pull channel: periodically checks orders the vendor has not pushed updates for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::aggregate::AggregateStatusDeriver;
use super::clock::Clock;
use super::credentials::CredentialResolver;
use super::domain::ScreeningOrder;
use super::reconcile::{
    apply_check_failure, apply_status_result, expire_polling, poll_window_elapsed,
    BackoffPolicy, FailureDisposition,
};
use super::repository::{OrderStore, SubmissionStore};
use super::vendor::VendorClient;

/// Timing knobs for the poll loop.
#[derive(Debug, Clone)]
pub struct PollSchedulerConfig {
    /// How often the loop wakes to scan for due orders.
    pub tick_interval: Duration,
    /// Delay before the next check after a successful one.
    pub check_interval: Duration,
    pub backoff: BackoffPolicy,
    /// Pause between consecutive vendor calls within a tick.
    pub inter_order_pause: Duration,
    pub batch_limit: usize,
}

/// Summary of one pass over the due orders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub started_at: Option<DateTime<Utc>>,
    /// Set when another tick was still running and this one did nothing.
    pub skipped: bool,
    pub due: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub capped: usize,
    pub expired: usize,
    /// Orders a webhook settled between the scan and the write.
    pub superseded: usize,
    pub skipped_orders: usize,
    pub store_errors: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("poll scheduler is already running")]
    AlreadyRunning,
}

struct RunningLoop {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Poll service with an explicit start/stop lifecycle.
pub struct PollScheduler<O, S> {
    orders: Arc<O>,
    deriver: AggregateStatusDeriver<O, S>,
    credentials: CredentialResolver<S>,
    vendor: Arc<dyn VendorClient>,
    clock: Arc<dyn Clock>,
    config: PollSchedulerConfig,
    tick_in_progress: AtomicBool,
    last_report: Mutex<Option<TickReport>>,
    running: Mutex<Option<RunningLoop>>,
}

/// Clears the reentrancy flag however the tick exits.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<O, S> PollScheduler<O, S>
where
    O: OrderStore + 'static,
    S: SubmissionStore + 'static,
{
    pub fn new(
        orders: Arc<O>,
        submissions: Arc<S>,
        credentials: CredentialResolver<S>,
        vendor: Arc<dyn VendorClient>,
        clock: Arc<dyn Clock>,
        config: PollSchedulerConfig,
    ) -> Self {
        let deriver = AggregateStatusDeriver::new(Arc::clone(&orders), submissions);
        Self {
            orders,
            deriver,
            credentials,
            vendor,
            clock,
            config,
            tick_in_progress: AtomicBool::new(false),
            last_report: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    pub fn last_report(&self) -> Option<TickReport> {
        self.last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Spawn the timer loop on the current tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let scheduler = Arc::clone(self);
        let period = self.config.tick_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        scheduler.run_tick().await;
                    }
                }
            }

            info!("screening poll scheduler stopped");
        });

        info!(
            tick_secs = period.as_secs(),
            check_interval_secs = self.config.check_interval.as_secs(),
            max_failures = self.config.backoff.max_consecutive_failures,
            "screening poll scheduler started"
        );
        *running = Some(RunningLoop { shutdown, task });
        Ok(())
    }

    /// Signal the loop and wait for any in-flight tick to finish. Returns false if idle.
    pub async fn stop(&self) -> bool {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match running {
            Some(RunningLoop { shutdown, task }) => {
                let _ = shutdown.send(());
                if let Err(err) = task.await {
                    error!(error = %err, "poll scheduler task ended abnormally");
                }
                true
            }
            None => false,
        }
    }

    /// One pass over due orders, sequential with a pause between vendor calls.
    pub async fn run_tick(&self) -> TickReport {
        if self.tick_in_progress.swap(true, Ordering::AcqRel) {
            debug!("previous poll tick still running; skipping");
            return TickReport {
                started_at: Some(self.clock.now()),
                skipped: true,
                ..TickReport::default()
            };
        }
        let _guard = TickGuard(&self.tick_in_progress);

        let started_at = self.clock.now();
        let mut report = TickReport {
            started_at: Some(started_at),
            ..TickReport::default()
        };

        let due = match self.orders.due_for_poll(started_at, self.config.batch_limit) {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "could not load orders due for polling");
                report.store_errors += 1;
                self.record(&report);
                return report;
            }
        };
        report.due = due.len();

        for (index, order) in due.into_iter().enumerate() {
            if index > 0 && !self.config.inter_order_pause.is_zero() {
                tokio::time::sleep(self.config.inter_order_pause).await;
            }
            self.poll_order(order, &mut report).await;
        }

        if report.due > 0 {
            info!(
                due = report.due,
                succeeded = report.succeeded,
                rescheduled = report.rescheduled,
                capped = report.capped,
                expired = report.expired,
                skipped = report.skipped_orders,
                "poll tick finished"
            );
        }
        self.record(&report);
        report
    }

    fn record(&self, report: &TickReport) {
        *self
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report.clone());
    }

    /// Latest stored copy of an order; webhooks may have changed it since the scan.
    fn reload(&self, order: &ScreeningOrder, report: &mut TickReport) -> Option<ScreeningOrder> {
        match self.orders.fetch(&order.id) {
            Ok(Some(latest)) => Some(latest),
            Ok(None) => {
                warn!(reference = %order.reference_number, order_id = %order.id, "order vanished during poll tick");
                report.skipped_orders += 1;
                None
            }
            Err(err) => {
                error!(reference = %order.reference_number, order_id = %order.id, error = %err, "could not reload polled order");
                report.store_errors += 1;
                None
            }
        }
    }

    async fn poll_order(&self, scanned: ScreeningOrder, report: &mut TickReport) {
        let Some(mut order) = self.reload(&scanned, report) else {
            return;
        };
        let reference = order.reference_number.clone();
        let now = self.clock.now();

        if !order.is_due(now) {
            debug!(%reference, status = %order.status, "order settled since the scan; not polling");
            report.superseded += 1;
            return;
        }

        if poll_window_elapsed(&order, now) {
            expire_polling(&mut order);
            warn!(%reference, order_id = %order.id, status = %order.status, "poll window elapsed; no longer polling order");
            report.expired += 1;
            self.persist(order, report);
            return;
        }

        let credentials = match self.credentials.resolve(&order.submission_id) {
            Ok(credentials) => credentials,
            Err(err) => {
                warn!(%reference, order_id = %order.id, error = %err, "skipping order: credentials unavailable");
                report.skipped_orders += 1;
                return;
            }
        };

        let outcome = self
            .vendor
            .check_order_status(&reference, &credentials)
            .await;
        let now = self.clock.now();

        let Some(mut order) = self.reload(&order, report) else {
            return;
        };
        if order.status.is_terminal() {
            debug!(%reference, status = %order.status, "order settled during the status check; result discarded");
            report.superseded += 1;
            return;
        }

        match outcome {
            Ok(result) => {
                apply_status_result(&mut order, &result, now, self.config.check_interval);
                debug!(%reference, status = %order.status, "status check succeeded");
                report.succeeded += 1;
            }
            Err(err) => match apply_check_failure(&mut order, &err, now, &self.config.backoff) {
                FailureDisposition::Rescheduled {
                    failures,
                    next_check_at,
                } => {
                    warn!(%reference, failures, %next_check_at, error = %err, "status check failed; backing off");
                    report.rescheduled += 1;
                }
                FailureDisposition::Capped { failures } => {
                    error!(%reference, failures, error = %err, "status check failures capped; order moved to error");
                    report.capped += 1;
                }
            },
        }

        self.persist(order, report);
    }

    fn persist(&self, order: ScreeningOrder, report: &mut TickReport) {
        let submission_id = order.submission_id.clone();
        if let Err(err) = self.orders.update(order) {
            error!(%submission_id, error = %err, "failed to persist polled order");
            report.store_errors += 1;
            return;
        }
        self.deriver.derive(&submission_id);
    }
}
