use super::*;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tenant_screening::config::{
    AppConfig, AppEnvironment, PollingConfig, ServerConfig, TelemetryConfig, VendorConfig,
    WebhookConfig,
};
use tenant_screening::workflows::screening::{
    Invitation, OrderRequest, ProtocolError, ReferenceNumber, StatusResult, SubmissionId,
    SubmissionStatus, SubmitReceipt, SystemClock, VendorClient,
};
use tower::ServiceExt;

const SECRET: &str = "route-secret";

struct AcceptingVendor;

#[async_trait]
impl VendorClient for AcceptingVendor {
    async fn verify_credentials(&self, credentials: &VendorCredentials) -> Result<(), ProtocolError> {
        if credentials.password == "correct" {
            Ok(())
        } else {
            Err(ProtocolError::Rejected("Authentication Failed".to_string()))
        }
    }

    async fn retrieve_invitations(
        &self,
        _credentials: &VendorCredentials,
    ) -> Result<Vec<Invitation>, ProtocolError> {
        Ok(vec![Invitation {
            id: "BASIC".to_string(),
            name: "Basic screening".to_string(),
        }])
    }

    async fn submit_screening_request(
        &self,
        _request: OrderRequest<'_>,
        _credentials: &VendorCredentials,
    ) -> Result<SubmitReceipt, ProtocolError> {
        Ok(SubmitReceipt {
            message: None,
            raw_xml: "<BackgroundReports><Status>Received</Status></BackgroundReports>"
                .to_string(),
        })
    }

    async fn check_order_status(
        &self,
        _reference: &ReferenceNumber,
        _credentials: &VendorCredentials,
    ) -> Result<StatusResult, ProtocolError> {
        Err(ProtocolError::Timeout)
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        environment: AppEnvironment::Test,
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        telemetry: TelemetryConfig {
            log_level: "info".to_string(),
        },
        vendor: VendorConfig {
            endpoint: "http://vendor.invalid/xml".to_string(),
            default_credentials: Some(VendorCredentials {
                username: "system".to_string(),
                password: "correct".to_string(),
            }),
            timeout: Duration::from_secs(5),
        },
        webhooks: WebhookConfig {
            secret: SECRET.to_string(),
            public_base_url: "https://screening.test".to_string(),
        },
        polling: PollingConfig {
            tick_interval: Duration::from_secs(300),
            check_interval: Duration::from_secs(3_600),
            initial_delay: Duration::from_secs(300),
            max_delay: Duration::from_secs(21_600),
            max_consecutive_failures: 5,
            inter_order_pause: Duration::ZERO,
            poll_window: Duration::from_secs(48 * 3_600),
            batch_limit: 100,
        },
    }
}

fn app(ready: bool) -> (Router, Arc<ScreeningComponents>) {
    let components = Arc::new(ScreeningComponents::assemble(
        &test_config(),
        Arc::new(AcceptingVendor),
        Arc::new(SystemClock),
    ));
    let state = AppState {
        readiness: Arc::new(AtomicBool::new(ready)),
        metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
    };
    let router = with_application_routes(Arc::clone(&components)).layer(Extension(state));
    (router, components)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn order_payload() -> serde_json::Value {
    json!({
        "submission_id": "sub-42",
        "invitation_id": "BASIC",
        "applicants": [
            {
                "person_id": "person-1",
                "first_name": "Jordan",
                "last_name": "Lee",
                "email": "jordan@example.com"
            }
        ]
    })
}

#[tokio::test]
async fn health_and_readiness_report_status() {
    let (router, _) = app(false);

    let health = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(health.status(), StatusCode::OK);

    let ready = router
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(ready).await["status"], "initializing");
}

#[tokio::test]
async fn create_then_fetch_order() {
    let (router, components) = app(true);

    let created = router
        .clone()
        .oneshot(json_request("POST", "/api/v1/screening/orders", order_payload()))
        .await
        .expect("response");
    assert_eq!(created.status(), StatusCode::CREATED);
    let payload = body_json(created).await;
    let order = &payload["orders"][0];
    assert_eq!(order["status"], "sent");
    assert!(order.get("raw_status_xml").is_none());
    let order_id = order["id"].as_str().expect("order id").to_string();

    let fetched = router
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/screening/orders/{order_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(body_json(fetched).await["reference_number"], order["reference_number"]);

    assert_eq!(
        components
            .submissions
            .status_of(&SubmissionId("sub-42".to_string())),
        Some(SubmissionStatus::ScreeningRequested)
    );
}

#[tokio::test]
async fn unknown_order_is_not_found_and_empty_request_is_rejected() {
    let (router, _) = app(true);

    let missing = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/screening/orders/does-not-exist")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let empty = router
        .oneshot(json_request(
            "POST",
            "/api/v1/screening/orders",
            json!({ "submission_id": "sub-1", "applicants": [] }),
        ))
        .await
        .expect("response");
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_routes_are_mounted_and_update_the_submission() {
    let (router, components) = app(true);

    let created = router
        .clone()
        .oneshot(json_request("POST", "/api/v1/screening/orders", order_payload()))
        .await
        .expect("response");
    let payload = body_json(created).await;
    let reference = payload["orders"][0]["reference_number"]
        .as_str()
        .expect("reference")
        .to_string();

    let push = Request::builder()
        .method("POST")
        .uri(format!("/webhooks/screening/status?token={SECRET}"))
        .header("content-type", "application/xml")
        .body(Body::from(format!(
            "<OrderStatusUpdate><Order><ReferenceNumber>{reference}</ReferenceNumber><Status>In Progress</Status></Order></OrderStatusUpdate>"
        )))
        .expect("request");
    let response = router.oneshot(push).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["handled"], true);
    assert_eq!(
        components
            .submissions
            .status_of(&SubmissionId("sub-42".to_string())),
        Some(SubmissionStatus::InProgress)
    );
}

#[tokio::test]
async fn credential_verification_stores_landlord_account() {
    let (router, _) = app(true);

    let rejected = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/screening/credentials/verify",
            json!({ "username": "acct", "password": "nope" }),
        ))
        .await
        .expect("response");
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let accepted = router
        .oneshot(json_request(
            "POST",
            "/api/v1/screening/credentials/verify",
            json!({ "username": "acct", "password": "correct", "landlord_id": "ll-1" }),
        ))
        .await
        .expect("response");
    assert_eq!(accepted.status(), StatusCode::OK);
    let payload = body_json(accepted).await;
    assert_eq!(payload["verified"], true);
    assert_eq!(payload["stored_for"], "ll-1");
}

#[tokio::test]
async fn invitations_and_manual_poll_are_exposed() {
    let (router, _) = app(true);

    let invitations = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/screening/invitations")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(invitations.status(), StatusCode::OK);
    assert_eq!(body_json(invitations).await["invitations"][0]["id"], "BASIC");

    let poll = router
        .oneshot(json_request("POST", "/api/v1/screening/poll", json!({})))
        .await
        .expect("response");
    assert_eq!(poll.status(), StatusCode::OK);
    let report = body_json(poll).await;
    assert_eq!(report["skipped"], false);
    assert_eq!(report["due"], 0);
}
