use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{ScreeningOrder, ScreeningStatus, SubmissionId, SubmissionStatus};
use super::repository::{OrderStore, SubmissionStore};

/// Result of recomputing a submission's status after an order changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AggregateOutcome {
    Advanced {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
    Unchanged {
        current: SubmissionStatus,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SubmissionMissing,
    DecisionRecorded,
    NoOrders,
    AllOrdersErrored,
}

/// Status the order set implies, or `None` when every order errored (or there are none).
pub fn candidate_status(orders: &[ScreeningOrder]) -> Option<SubmissionStatus> {
    if orders.is_empty() {
        return None;
    }

    let all = |status: ScreeningStatus| orders.iter().all(|order| order.status == status);
    let any = |status: ScreeningStatus| orders.iter().any(|order| order.status == status);

    if all(ScreeningStatus::Complete) {
        Some(SubmissionStatus::Complete)
    } else if any(ScreeningStatus::InProgress) {
        Some(SubmissionStatus::InProgress)
    } else if !all(ScreeningStatus::Error) {
        Some(SubmissionStatus::ScreeningRequested)
    } else {
        None
    }
}

/// Recomputes the owning submission's status from all of its orders, forward only.
pub struct AggregateStatusDeriver<O, S> {
    orders: Arc<O>,
    submissions: Arc<S>,
}

impl<O, S> Clone for AggregateStatusDeriver<O, S> {
    fn clone(&self) -> Self {
        Self {
            orders: Arc::clone(&self.orders),
            submissions: Arc::clone(&self.submissions),
        }
    }
}

impl<O, S> AggregateStatusDeriver<O, S>
where
    O: OrderStore + 'static,
    S: SubmissionStore + 'static,
{
    pub fn new(orders: Arc<O>, submissions: Arc<S>) -> Self {
        Self {
            orders,
            submissions,
        }
    }

    pub fn derive(&self, submission_id: &SubmissionId) -> AggregateOutcome {
        let outcome = self.try_derive(submission_id);
        match &outcome {
            AggregateOutcome::Advanced { from, to } => {
                info!(%submission_id, %from, %to, "submission status advanced")
            }
            AggregateOutcome::Failed { error } => {
                warn!(%submission_id, %error, "submission status derivation failed")
            }
            other => debug!(%submission_id, ?other, "submission status left unchanged"),
        }
        outcome
    }

    fn try_derive(&self, submission_id: &SubmissionId) -> AggregateOutcome {
        let submission = match self.submissions.fetch(submission_id) {
            Ok(Some(submission)) => submission,
            Ok(None) => {
                return AggregateOutcome::Skipped {
                    reason: SkipReason::SubmissionMissing,
                }
            }
            Err(err) => {
                return AggregateOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        if submission.has_decision {
            return AggregateOutcome::Skipped {
                reason: SkipReason::DecisionRecorded,
            };
        }

        let orders = match self.orders.for_submission(submission_id) {
            Ok(orders) => orders,
            Err(err) => {
                return AggregateOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        let candidate = match candidate_status(&orders) {
            Some(candidate) => candidate,
            None if orders.is_empty() => {
                return AggregateOutcome::Skipped {
                    reason: SkipReason::NoOrders,
                }
            }
            None => {
                return AggregateOutcome::Skipped {
                    reason: SkipReason::AllOrdersErrored,
                }
            }
        };

        if candidate <= submission.status {
            return AggregateOutcome::Unchanged {
                current: submission.status,
            };
        }

        // The snapshot above may be stale by now; the store decides under its own lock.
        match self.submissions.advance_status(submission_id, candidate) {
            Ok(Some(from)) => AggregateOutcome::Advanced {
                from,
                to: candidate,
            },
            Ok(None) => AggregateOutcome::Unchanged {
                current: self
                    .submissions
                    .fetch(submission_id)
                    .ok()
                    .flatten()
                    .map_or(submission.status, |latest| latest.status),
            },
            Err(err) => AggregateOutcome::Failed {
                error: err.to_string(),
            },
        }
    }
}
