//! Order mutations shared by the webhook and poll channels.
//!
//! Both channels are last-write-wins on `status`; neither enforces per-order ordering
//! because the vendor does not order its own channels.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{ScreeningOrder, ScreeningStatus, VendorReading};
use super::vendor::{ProtocolError, StatusResult, WebhookEvent, WebhookKind};

/// Exponential backoff with a delay ceiling and a failure cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_consecutive_failures: u32,
}

impl BackoffPolicy {
    /// `min(initial * 2^(failures-1), max)`; the first failure waits `initial`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_consecutive_failures
    }
}

/// `now + duration`, saturating at the latest representable instant.
pub(crate) fn instant_after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Merge a parsed push into the order. Identical events are idempotent.
pub fn apply_webhook_event(order: &mut ScreeningOrder, event: &WebhookEvent) {
    order.merge_report(event.report_id.as_deref(), event.report_url.as_deref());

    let status = match event.kind {
        WebhookKind::Status => {
            order.raw_status_xml = Some(event.raw_xml.clone());
            event.reading.map(VendorReading::as_status)
        }
        WebhookKind::Result => {
            order.raw_result_xml = Some(event.raw_xml.clone());
            Some(ScreeningStatus::Complete)
        }
    };

    match status {
        Some(ScreeningStatus::Error) => {
            let message = event
                .status_text
                .clone()
                .unwrap_or_else(|| "vendor reported an error".to_string());
            order.mark_error(message);
        }
        Some(status) => order.set_status(status),
        None => {}
    }
}

/// Apply a successful status check and schedule the next one unless the order is done.
pub fn apply_status_result(
    order: &mut ScreeningOrder,
    result: &StatusResult,
    now: DateTime<Utc>,
    interval: Duration,
) {
    match result.status() {
        Some(ScreeningStatus::Error) => {
            let message = result
                .message
                .clone()
                .or_else(|| result.status_text.clone())
                .unwrap_or_else(|| "vendor reported an error".to_string());
            order.mark_error(message);
        }
        Some(status) => order.set_status(status),
        None => {}
    }

    order.merge_report(result.report_id.as_deref(), result.report_url.as_deref());
    order.raw_status_xml = Some(result.raw_xml.clone());
    order.last_status_check_at = Some(now);
    order.consecutive_failures = 0;
    order.next_status_check_at = if order.status.is_terminal() {
        None
    } else {
        Some(instant_after(now, interval))
    };
}

/// What a failed status check did to the order's schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum FailureDisposition {
    Rescheduled {
        failures: u32,
        next_check_at: DateTime<Utc>,
    },
    Capped {
        failures: u32,
    },
}

pub fn apply_check_failure(
    order: &mut ScreeningOrder,
    error: &ProtocolError,
    now: DateTime<Utc>,
    policy: &BackoffPolicy,
) -> FailureDisposition {
    let failures = order.consecutive_failures.saturating_add(1);
    order.consecutive_failures = failures;
    order.last_status_check_at = Some(now);

    if policy.is_exhausted(failures) {
        order.mark_error(format!(
            "status check failed {failures} consecutive times; last error: {error}"
        ));
        return FailureDisposition::Capped { failures };
    }

    let next_check_at = instant_after(now, policy.delay_for(failures));
    order.next_status_check_at = Some(next_check_at);
    FailureDisposition::Rescheduled {
        failures,
        next_check_at,
    }
}

/// True once the order has outlived its polling window.
pub fn poll_window_elapsed(order: &ScreeningOrder, now: DateTime<Utc>) -> bool {
    order.poll_until.map(|until| now >= until).unwrap_or(false)
}

/// Stop polling an order whose window elapsed; its status is left as-is.
pub fn expire_polling(order: &mut ScreeningOrder) {
    order.next_status_check_at = None;
}
