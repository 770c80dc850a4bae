use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::screening::{
    CredentialResolutionError, ProtocolError, RepositoryError, SchedulerError, ServiceError,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server error: {0}")]
    Server(#[from] axum::Error),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("screening error: {0}")]
    Screening(#[from] ServiceError),
    #[error("vendor error: {0}")]
    Vendor(#[from] ProtocolError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Screening(err) => match err {
                ServiceError::NoApplicants
                | ServiceError::ApplicantMismatch
                | ServiceError::InvalidCallbackUrl(_) => StatusCode::BAD_REQUEST,
                ServiceError::AlreadySubmitted(_)
                | ServiceError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
                ServiceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
                ServiceError::Credentials(CredentialResolutionError::NoneAvailable) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ServiceError::Protocol(protocol) => vendor_status(protocol),
                ServiceError::Repository(_) | ServiceError::Credentials(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::Vendor(protocol) => vendor_status(protocol),
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Scheduler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn vendor_status(error: &ProtocolError) -> StatusCode {
    match error {
        ProtocolError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ProtocolError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
