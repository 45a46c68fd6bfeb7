use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Metrics system already initialized")]
    AlreadyInitialized,

    #[error("OpenTelemetry error: {0}")]
    OpenTelemetry(String),
}
