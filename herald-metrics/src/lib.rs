//! OpenTelemetry metrics for herald
//!
//! Instruments are pushed over OTLP/HTTP to an OpenTelemetry Collector.
//!
//! ```text
//! herald → OTLP/HTTP → OpenTelemetry Collector → Prometheus (scrape)
//! ```
//!
//! Recording sites go through [`try_metrics`], so nothing is recorded (and
//! nothing fails) when [`init_metrics`] was never called or metrics are
//! disabled.

mod config;
mod dispatch;
mod error;
mod exporter;
mod ledger;

pub use config::MetricsConfig;
pub use dispatch::DispatchMetrics;
pub use error::MetricsError;
pub use ledger::LedgerMetrics;
use once_cell::sync::OnceCell;

static METRICS_INSTANCE: OnceCell<Metrics> = OnceCell::new();

#[derive(Debug)]
pub struct Metrics {
    pub dispatch: DispatchMetrics,
    pub ledger: LedgerMetrics,
}

impl Metrics {
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            dispatch: DispatchMetrics::new()?,
            ledger: LedgerMetrics::new()?,
        })
    }
}

/// Initialize the metrics system
///
/// Must be called once at startup before any metrics are recorded. A no-op
/// when metrics are disabled in `config`.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or if called twice.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        tracing::info!("Metrics collection is disabled");
        return Ok(());
    }

    tracing::info!(
        endpoint = %config.endpoint,
        "Initializing OpenTelemetry metrics with OTLP exporter"
    );

    let provider = exporter::init_otlp_exporter(&config.endpoint)?;
    opentelemetry::global::set_meter_provider(provider);

    METRICS_INSTANCE
        .set(Metrics::new()?)
        .map_err(|_| MetricsError::AlreadyInitialized)?;

    tracing::info!("Metrics collection initialized successfully");

    Ok(())
}

/// Initialize the metrics system on the meter provider already installed
///
/// For hosts that own the OpenTelemetry pipeline: no exporter is built, and
/// instruments report through whatever provider is global. The local
/// counters are live either way.
///
/// # Errors
///
/// Returns an error if metric instruments cannot be created or if called twice.
pub fn init_with_global_provider() -> Result<&'static Metrics, MetricsError> {
    METRICS_INSTANCE
        .try_insert(Metrics::new()?)
        .map_err(|_| MetricsError::AlreadyInitialized)
}

/// The global metrics instance, if initialised
#[must_use]
pub fn try_metrics() -> Option<&'static Metrics> {
    METRICS_INSTANCE.get()
}

/// Check if metrics are enabled
#[must_use]
pub fn is_enabled() -> bool {
    METRICS_INSTANCE.get().is_some()
}
