use crate::cli::{ServeArgs, VerifyCredentialsArgs};
use crate::infra::{AppState, ScreeningComponents};
use crate::routes::with_application_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tenant_screening::config::AppConfig;
use tenant_screening::error::AppError;
use tenant_screening::telemetry;
use tenant_screening::workflows::screening::{
    HttpVendorClient, ProtocolError, SystemClock, VendorClient, VendorCredentials,
};
use tracing::{info, warn};

fn vendor_client(config: &AppConfig) -> Result<Arc<dyn VendorClient>, AppError> {
    let client = HttpVendorClient::new(config.vendor.endpoint.clone(), config.vendor.timeout)?;
    Ok(Arc::new(client))
}

fn load(host: Option<String>, port: Option<u16>) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::load()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;
    if config.vendor.default_credentials.is_none() {
        warn!("no system vendor credentials configured; only landlord accounts can be used");
    }
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

pub(crate) async fn run(args: ServeArgs) -> Result<(), AppError> {
    let config = load(args.host, args.port)?;
    let components = Arc::new(ScreeningComponents::assemble(
        &config,
        vendor_client(&config)?,
        Arc::new(SystemClock),
    ));

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let app = with_application_routes(Arc::clone(&components))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    components.scheduler.start()?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        vendor = %config.vendor.endpoint,
        callbacks = %config.webhooks.public_base_url,
        "screening service ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    readiness_flag.store(false, Ordering::Release);
    components.scheduler.stop().await;
    Ok(())
}

pub(crate) async fn verify_credentials(args: VerifyCredentialsArgs) -> Result<(), AppError> {
    let config = load(None, None)?;
    let client = vendor_client(&config)?;
    let credentials = VendorCredentials {
        username: args.username,
        password: args.password,
    };

    match client.verify_credentials(&credentials).await {
        Ok(()) => {
            println!("Credentials accepted by {}", config.vendor.endpoint);
            Ok(())
        }
        Err(ProtocolError::Rejected(reason)) => {
            println!("Credentials rejected: {reason}");
            Err(AppError::Vendor(ProtocolError::Rejected(reason)))
        }
        Err(err) => Err(AppError::Vendor(err)),
    }
}
