use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::workflows::screening::{
    BackoffPolicy, OrderSettings, PollSchedulerConfig, VendorCredentials,
};

const DEV_WEBHOOK_SECRET: &str = "dev-webhook-secret";
/// Longest interval the scheduler accepts for any timer or window.
const MAX_SCHEDULE_SPAN: Duration = Duration::from_secs(365 * 24 * 3_600);

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub vendor: VendorConfig,
    pub webhooks: WebhookConfig,
    pub polling: PollingConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_var("APP_PORT", 3000u16)?;
        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let vendor = VendorConfig {
            endpoint: env::var("SCREENING_VENDOR_URL")
                .unwrap_or_else(|_| "https://screening.vendor.invalid/api".to_string()),
            default_credentials: match (
                non_empty_var("SCREENING_VENDOR_USERNAME"),
                non_empty_var("SCREENING_VENDOR_PASSWORD"),
            ) {
                (Some(username), Some(password)) => Some(VendorCredentials { username, password }),
                _ => None,
            },
            timeout: Duration::from_secs(parse_var("SCREENING_VENDOR_TIMEOUT_SECS", 30u64)?),
        };

        let secret = match non_empty_var("SCREENING_WEBHOOK_SECRET") {
            Some(secret) => secret,
            None if environment == AppEnvironment::Production => {
                return Err(ConfigError::Missing("SCREENING_WEBHOOK_SECRET"))
            }
            None => DEV_WEBHOOK_SECRET.to_string(),
        };
        let webhooks = WebhookConfig {
            secret,
            public_base_url: env::var("SCREENING_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://{host}:{port}")),
        };

        let polling = PollingConfig {
            tick_interval: Duration::from_secs(parse_var("SCREENING_POLL_TICK_SECS", 300u64)?),
            check_interval: Duration::from_secs(parse_var(
                "SCREENING_POLL_INTERVAL_SECS",
                3_600u64,
            )?),
            initial_delay: Duration::from_secs(parse_var(
                "SCREENING_POLL_INITIAL_DELAY_SECS",
                300u64,
            )?),
            max_delay: Duration::from_secs(parse_var("SCREENING_POLL_MAX_DELAY_SECS", 21_600u64)?),
            max_consecutive_failures: parse_var("SCREENING_POLL_MAX_FAILURES", 5u32)?,
            inter_order_pause: Duration::from_millis(parse_var("SCREENING_POLL_PAUSE_MS", 500u64)?),
            poll_window: parse_var("SCREENING_POLL_WINDOW_HOURS", 48u64)?
                .checked_mul(3_600)
                .map(Duration::from_secs)
                .ok_or(ConfigError::Constraint(
                    "SCREENING_POLL_WINDOW_HOURS is too large",
                ))?,
            batch_limit: parse_var("SCREENING_POLL_BATCH_LIMIT", 100usize)?,
        };
        polling.validate()?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            vendor,
            webhooks,
            polling,
        })
    }

    pub fn order_settings(&self) -> OrderSettings {
        OrderSettings {
            public_base_url: self.webhooks.public_base_url.clone(),
            webhook_secret: self.webhooks.secret.clone(),
            check_interval: self.polling.check_interval,
            poll_window: self.polling.poll_window,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty_var(name) {
        Some(raw) => raw.parse::<T>().map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where and how to reach the screening vendor.
#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub endpoint: String,
    /// System-wide account used when a landlord has no verified credentials of their own.
    pub default_credentials: Option<VendorCredentials>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub tick_interval: Duration,
    pub check_interval: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_consecutive_failures: u32,
    pub inter_order_pause: Duration,
    pub poll_window: Duration,
    pub batch_limit: usize,
}

impl PollingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Constraint(
                "SCREENING_POLL_TICK_SECS must be greater than zero",
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::Constraint(
                "SCREENING_POLL_MAX_FAILURES must be at least 1",
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::Constraint(
                "SCREENING_POLL_MAX_DELAY_SECS must not be below the initial delay",
            ));
        }

        let bounded = [
            (self.tick_interval, "SCREENING_POLL_TICK_SECS exceeds one year"),
            (self.check_interval, "SCREENING_POLL_INTERVAL_SECS exceeds one year"),
            (self.max_delay, "SCREENING_POLL_MAX_DELAY_SECS exceeds one year"),
            (self.inter_order_pause, "SCREENING_POLL_PAUSE_MS exceeds one year"),
            (self.poll_window, "SCREENING_POLL_WINDOW_HOURS exceeds one year"),
        ];
        if let Some((_, message)) = bounded
            .iter()
            .find(|(duration, _)| *duration > MAX_SCHEDULE_SPAN)
        {
            return Err(ConfigError::Constraint(*message));
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }

    pub fn scheduler_config(&self) -> PollSchedulerConfig {
        PollSchedulerConfig {
            tick_interval: self.tick_interval,
            check_interval: self.check_interval,
            backoff: self.backoff(),
            inter_order_pause: self.inter_order_pause,
            batch_limit: self.batch_limit,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0}")]
    Constraint(&'static str),
    #[error("APP_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost {
        #[source]
        source: std::net::AddrParseError,
    },
}
