use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::leads::DirectoryImportError;
use thiserror::Error;

/// Startup and shutdown failures of the service binary. Request-level errors are mapped to HTTP
/// responses by the lead router and never reach this type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("company directory error: {0}")]
    Directory(#[from] DirectoryImportError),
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}
