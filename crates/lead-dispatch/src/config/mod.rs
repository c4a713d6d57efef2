use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::workflows::leads::ScoringConfig;

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

/// Top-level configuration for the engine and its HTTP surface.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub scoring: ScoringConfig,
    pub dispatch: DispatchConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = ScoringConfig::default();
        let scoring = ScoringConfig {
            max_assignments: parse_var("LEAD_MAX_ASSIGNMENTS", defaults.max_assignments)?,
            category_weight: parse_var("LEAD_WEIGHT_CATEGORY", defaults.category_weight)?,
            proximity_weight: parse_var("LEAD_WEIGHT_PROXIMITY", defaults.proximity_weight)?,
            performance_weight: parse_var(
                "LEAD_WEIGHT_PERFORMANCE",
                defaults.performance_weight,
            )?,
        };
        validate_scoring(&scoring)?;

        let dispatch = DispatchConfig {
            concurrency: parse_var("DISPATCH_CONCURRENCY", 4usize)?,
            notification_timeout: Duration::from_secs(parse_var("DISPATCH_TIMEOUT_SECS", 10u64)?),
            claim_ttl: Duration::from_secs(parse_var("DISPATCH_CLAIM_TTL_SECS", 300u64)?),
            reconcile_interval: Duration::from_secs(parse_var(
                "DISPATCH_RECONCILE_INTERVAL_SECS",
                60u64,
            )?),
        };
        dispatch.validate()?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                with_target: false,
            },
            scoring,
            dispatch,
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn validate_scoring(scoring: &ScoringConfig) -> Result<(), ConfigError> {
    if scoring.max_assignments == 0 {
        return Err(ConfigError::OutOfRange {
            key: "LEAD_MAX_ASSIGNMENTS",
            reason: "at least one assignment per lead is required",
        });
    }
    if scoring.max_assignments > usize::from(u16::MAX) {
        return Err(ConfigError::OutOfRange {
            key: "LEAD_MAX_ASSIGNMENTS",
            reason: "ranks are limited to 65535 assignments per lead",
        });
    }
    let total = u16::from(scoring.category_weight)
        + u16::from(scoring.proximity_weight)
        + u16::from(scoring.performance_weight);
    if total != 100 {
        return Err(ConfigError::WeightSum(total));
    }
    Ok(())
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
    pub with_target: bool,
}

/// Fan-out limits and claim timing for the dispatch notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Upper bound on notifications in flight across every dispatch call.
    pub concurrency: usize,
    pub notification_timeout: Duration,
    /// How long an assignment may sit in `dispatching` before the sweep hands it back.
    pub claim_ttl: Duration,
    pub reconcile_interval: Duration,
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::OutOfRange {
                key: "DISPATCH_CONCURRENCY",
                reason: "must allow at least one notification in flight",
            });
        }
        if self.claim_ttl <= self.notification_timeout {
            return Err(ConfigError::OutOfRange {
                key: "DISPATCH_CLAIM_TTL_SECS",
                reason: "must exceed DISPATCH_TIMEOUT_SECS",
            });
        }
        if self.reconcile_interval.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "DISPATCH_RECONCILE_INTERVAL_SECS",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            notification_timeout: Duration::from_secs(10),
            claim_ttl: Duration::from_secs(300),
            reconcile_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
    OutOfRange { key: &'static str, reason: &'static str },
    WeightSum(u16),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a non-negative integer (got '{value}')")
            }
            ConfigError::OutOfRange { key, reason } => write!(f, "{key} {reason}"),
            ConfigError::WeightSum(total) => {
                write!(f, "lead scoring weights must sum to 100 (got {total})")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
