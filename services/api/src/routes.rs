use crate::infra::{AppState, ScreeningComponents};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tenant_screening::error::AppError;
use tenant_screening::workflows::screening::{
    webhook_router, CreateOrdersRequest, LandlordId, OrderId, OrderView, ScreeningOrder,
    TickReport, VendorCredentials,
};

#[derive(Debug, Deserialize)]
pub(crate) struct CreateOrdersBody {
    #[serde(flatten)]
    pub(crate) request: CreateOrdersRequest,
    /// Landlord whose stored vendor account should be used, if any.
    #[serde(default)]
    pub(crate) landlord_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VerifyCredentialsBody {
    pub(crate) username: String,
    pub(crate) password: String,
    /// When set, verified credentials are stored for this landlord.
    #[serde(default)]
    pub(crate) landlord_id: Option<String>,
}

pub(crate) fn with_application_routes(components: Arc<ScreeningComponents>) -> Router {
    let webhooks = webhook_router(Arc::clone(&components.receiver));

    Router::new()
        .route("/api/v1/screening/orders", post(create_orders_endpoint))
        .route("/api/v1/screening/orders/:order_id", get(order_endpoint))
        .route("/api/v1/screening/invitations", get(invitations_endpoint))
        .route(
            "/api/v1/screening/credentials/verify",
            post(verify_credentials_endpoint),
        )
        .route("/api/v1/screening/poll", post(poll_endpoint))
        .with_state(components)
        .merge(webhooks)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn create_orders_endpoint(
    State(components): State<Arc<ScreeningComponents>>,
    Json(body): Json<CreateOrdersBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let CreateOrdersBody {
        request,
        landlord_id,
    } = body;

    components
        .submissions
        .register(&request.submission_id, landlord_id.map(LandlordId));
    let orders = components.service.create_orders(request).await?;
    let views: Vec<OrderView> = orders.iter().map(ScreeningOrder::view).collect();

    Ok((StatusCode::CREATED, Json(json!({ "orders": views }))))
}

pub(crate) async fn order_endpoint(
    State(components): State<Arc<ScreeningComponents>>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderView>, AppError> {
    let order = components.service.get(&OrderId(order_id))?;
    Ok(Json(order.view()))
}

pub(crate) async fn invitations_endpoint(
    State(components): State<Arc<ScreeningComponents>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let invitations = components.service.list_invitations(None).await?;
    Ok(Json(json!({ "invitations": invitations })))
}

pub(crate) async fn verify_credentials_endpoint(
    State(components): State<Arc<ScreeningComponents>>,
    Json(body): Json<VerifyCredentialsBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let credentials = VendorCredentials {
        username: body.username,
        password: body.password,
    };
    components.service.verify_credentials(&credentials).await?;

    let stored_for = body.landlord_id.map(LandlordId);
    if let Some(landlord) = &stored_for {
        components
            .credentials
            .store_verified(landlord.clone(), credentials);
    }

    Ok(Json(json!({ "verified": true, "stored_for": stored_for })))
}

pub(crate) async fn poll_endpoint(
    State(components): State<Arc<ScreeningComponents>>,
) -> Json<TickReport> {
    Json(components.scheduler.run_tick().await)
}

#[cfg(test)]
mod tests;
