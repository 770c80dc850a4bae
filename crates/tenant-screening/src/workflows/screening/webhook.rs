use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use super::aggregate::{AggregateOutcome, AggregateStatusDeriver};
use super::domain::{OrderId, ReferenceNumber, ScreeningStatus, SubmissionId};
use super::reconcile::apply_webhook_event;
use super::repository::{OrderStore, SubmissionStore};
use super::vendor::{parse_webhook, WebhookKind};

pub const STATUS_WEBHOOK_PATH: &str = "/webhooks/screening/status";
pub const RESULT_WEBHOOK_PATH: &str = "/webhooks/screening/result";

/// Outcome of one inbound push. Never an error: stray deliveries are expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Handled {
        order_id: OrderId,
        submission_id: SubmissionId,
        status: ScreeningStatus,
        aggregate: AggregateOutcome,
    },
    NotHandled {
        reason: NotHandledReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum NotHandledReason {
    Unparseable(String),
    UnknownReference(ReferenceNumber),
    StoreUnavailable(String),
}

/// Accepts vendor pushes and merges them into the matching order.
pub struct WebhookReceiver<O, S> {
    orders: Arc<O>,
    deriver: AggregateStatusDeriver<O, S>,
    secret: String,
}

impl<O, S> WebhookReceiver<O, S>
where
    O: OrderStore + 'static,
    S: SubmissionStore + 'static,
{
    pub fn new(orders: Arc<O>, submissions: Arc<S>, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if secret.is_empty() {
            warn!("webhook secret is empty; every webhook delivery will be rejected");
        }
        let deriver = AggregateStatusDeriver::new(Arc::clone(&orders), submissions);
        Self {
            orders,
            deriver,
            secret,
        }
    }

    /// Constant-time comparison of the query-string token against the shared secret.
    pub fn authorize(&self, token: Option<&str>) -> bool {
        let Some(token) = token else {
            return false;
        };
        if self.secret.is_empty() || token.len() != self.secret.len() {
            return false;
        }
        token
            .bytes()
            .zip(self.secret.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    pub fn handle(&self, kind: WebhookKind, body: &str) -> WebhookOutcome {
        let event = match parse_webhook(body, kind) {
            Ok(event) => event,
            Err(err) => {
                warn!(?kind, error = %err, "dropping unparseable screening webhook");
                return WebhookOutcome::NotHandled {
                    reason: NotHandledReason::Unparseable(err.to_string()),
                };
            }
        };

        let reference = &event.reference_number;
        let mut order = match self.orders.find_by_reference(reference) {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(?kind, %reference, "webhook references unknown screening order");
                return WebhookOutcome::NotHandled {
                    reason: NotHandledReason::UnknownReference(reference.clone()),
                };
            }
            Err(err) => {
                error!(?kind, %reference, error = %err, "order lookup failed for webhook");
                return WebhookOutcome::NotHandled {
                    reason: NotHandledReason::StoreUnavailable(err.to_string()),
                };
            }
        };

        let previous = order.status;
        apply_webhook_event(&mut order, &event);

        if let Err(err) = self.orders.update(order.clone()) {
            error!(%reference, order_id = %order.id, error = %err, "failed to persist webhook merge");
            return WebhookOutcome::NotHandled {
                reason: NotHandledReason::StoreUnavailable(err.to_string()),
            };
        }

        info!(
            ?kind,
            %reference,
            order_id = %order.id,
            from = %previous,
            to = %order.status,
            "merged screening webhook"
        );

        let aggregate = self.deriver.derive(&order.submission_id);
        WebhookOutcome::Handled {
            order_id: order.id,
            submission_id: order.submission_id,
            status: order.status,
            aggregate,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WebhookQuery {
    token: Option<String>,
}

/// Routes for the two vendor callback URLs.
pub fn webhook_router<O, S>(receiver: Arc<WebhookReceiver<O, S>>) -> Router
where
    O: OrderStore + 'static,
    S: SubmissionStore + 'static,
{
    Router::new()
        .route(STATUS_WEBHOOK_PATH, post(status_handler::<O, S>))
        .route(RESULT_WEBHOOK_PATH, post(result_handler::<O, S>))
        .with_state(receiver)
}

pub(crate) async fn status_handler<O, S>(
    State(receiver): State<Arc<WebhookReceiver<O, S>>>,
    Query(query): Query<WebhookQuery>,
    body: String,
) -> Response
where
    O: OrderStore + 'static,
    S: SubmissionStore + 'static,
{
    respond(&receiver, WebhookKind::Status, query, &body)
}

pub(crate) async fn result_handler<O, S>(
    State(receiver): State<Arc<WebhookReceiver<O, S>>>,
    Query(query): Query<WebhookQuery>,
    body: String,
) -> Response
where
    O: OrderStore + 'static,
    S: SubmissionStore + 'static,
{
    respond(&receiver, WebhookKind::Result, query, &body)
}

fn respond<O, S>(
    receiver: &WebhookReceiver<O, S>,
    kind: WebhookKind,
    query: WebhookQuery,
    body: &str,
) -> Response
where
    O: OrderStore + 'static,
    S: SubmissionStore + 'static,
{
    if !receiver.authorize(query.token.as_deref()) {
        warn!(?kind, "rejected webhook with invalid token");
        let payload = json!({ "error": "invalid webhook token" });
        return (StatusCode::UNAUTHORIZED, axum::Json(payload)).into_response();
    }

    match receiver.handle(kind, body) {
        WebhookOutcome::Handled {
            order_id,
            submission_id,
            status,
            ..
        } => {
            let payload = json!({
                "handled": true,
                "order_id": order_id,
                "submission_id": submission_id,
                "status": status,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        WebhookOutcome::NotHandled {
            reason: NotHandledReason::StoreUnavailable(detail),
        } => {
            let payload = json!({ "handled": false, "error": detail });
            (StatusCode::SERVICE_UNAVAILABLE, axum::Json(payload)).into_response()
        }
        WebhookOutcome::NotHandled { reason } => {
            let payload = json!({ "handled": false, "reason": reason });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
    }
}
