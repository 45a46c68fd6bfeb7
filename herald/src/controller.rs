use std::{
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
    time::Duration,
};

use herald_common::{ChannelInstance, Signal, Ticket, internal, logging};
use herald_dispatch::{
    BroadcastSink, DispatchConfig, Dispatcher, HttpTransport, HttpTransportConfig, Notification,
};
use herald_ledger::{MemoryDirectory, MemoryMessageStore};
use herald_metrics::MetricsConfig;
use herald_tracing::traced;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::command;

pub const CONFIG_ENV: &str = "HERALD_CONFIG";

const fn default_purge_interval() -> u64 {
    60
}

/// Runner configuration, read from RON
#[derive(Debug, Default, Deserialize)]
pub struct Herald {
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub transport: HttpTransportConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Tickets the in-memory directory starts with
    #[serde(default, alias = "ticket")]
    pub tickets: Vec<Ticket>,

    /// Channel instances the in-memory directory starts with
    #[serde(default, alias = "instance")]
    pub instances: Vec<ChannelInstance>,

    /// How often expired breaker and limiter state is dropped (in seconds)
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Locate the configuration file
///
/// Precedence: an explicit path, then `HERALD_CONFIG`, then
/// `./herald.config.ron`, then `/etc/herald/herald.config.ron`.
///
/// # Errors
///
/// When an explicitly named file does not exist, or no candidate does.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    let default_paths = [
        PathBuf::from("./herald.config.ron"),
        PathBuf::from("/etc/herald/herald.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

impl Herald {
    /// # Errors
    ///
    /// When the file cannot be read or is not valid configuration.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Self::from_ron(&content)
    }

    /// # Errors
    ///
    /// When `content` is not valid configuration.
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// The in-memory directory seeded from configuration
    #[must_use]
    pub fn directory(&self) -> MemoryDirectory {
        let directory = MemoryDirectory::new();
        for instance in &self.instances {
            directory.insert_instance(instance.clone());
        }
        for ticket in &self.tickets {
            directory.insert_ticket(ticket.clone());
        }
        directory
    }

    /// Run the dispatcher over stdin/stdout until EOF or a shutdown signal
    ///
    /// # Errors
    ///
    /// Invalid environment overrides, metrics or transport setup failures,
    /// or I/O failures on the command streams.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(mut self) -> anyhow::Result<()> {
        logging::init();

        self.dispatch.apply_env(|var| std::env::var(var).ok())?;
        herald_metrics::init_metrics(&self.metrics)?;

        let sink = Arc::new(BroadcastSink::default());
        let transport = Arc::new(HttpTransport::new(self.transport.clone())?);
        let dispatcher = Dispatcher::builder(
            Arc::new(MemoryMessageStore::new()),
            Arc::new(self.directory()),
            transport,
        )
        .config(self.dispatch.clone())
        .notifier(sink.clone())
        .build();

        internal!(
            level = INFO,
            tickets = self.tickets.len(),
            instances = self.instances.len(),
            broker = %self.transport.base_url,
            metrics = herald_metrics::is_enabled(),
            "Controller running"
        );

        let notifications = tokio::spawn(log_notifications(
            sink.subscribe(),
            SHUTDOWN_BROADCAST.subscribe(),
        ));
        let purger = tokio::spawn(purge_expired(
            dispatcher.clone(),
            Duration::from_secs(self.purge_interval_secs.max(1)),
            SHUTDOWN_BROADCAST.subscribe(),
        ));

        let reader = tokio::io::BufReader::new(tokio::io::stdin());
        let ret = tokio::select! {
            r = command::serve(&dispatcher, reader, tokio::io::stdout(), SHUTDOWN_BROADCAST.subscribe()) => {
                r.map(|handled| internal!(level = INFO, handled, "Command stream closed")).map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);
        let _ = notifications.await;
        let _ = purger.await;

        ret
    }
}

#[traced(instrument(level = tracing::Level::TRACE))]
async fn shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    internal!(level = INFO, "CTRL+C entered, shutting down");
    Ok(())
}

async fn log_notifications(
    mut notifications: broadcast::Receiver<Notification>,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    loop {
        tokio::select! {
            notification = notifications.recv() => match notification {
                Ok(notification) => match serde_json::to_string(&notification) {
                    Ok(encoded) => internal!(level = INFO, event = notification.name(), %encoded, "Notification"),
                    Err(err) => internal!(level = WARN, %err, "Failed to encode notification"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    internal!(level = WARN, skipped, "Notification log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

async fn purge_expired(
    dispatcher: Dispatcher,
    every: Duration,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let purged = dispatcher.purge_expired();
                if purged > 0 {
                    internal!(level = DEBUG, purged, "Purged expired dispatch state");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;

    use herald_common::{ConnectionState, InstanceId, TenantId, TicketId};
    use herald_dispatch::RateLimitAlgorithm;
    use herald_ledger::Directory;
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"(
        dispatch: (
            rate_limit: (
                default_tps: 8,
                instance_overrides: { "wa-1": 11 },
                algorithm: token_bucket,
            ),
            circuit_breaker: (
                failure_threshold: 3,
                cooldown_ms: 15000,
            ),
        ),
        transport: (
            base_url: "https://broker.internal/v1",
            token: Some("secret"),
        ),
        instances: [
            (id: "wa-1", tenant_id: "acme", state: connected),
        ],
        tickets: [
            (
                id: "t-1",
                tenant_id: "acme",
                contact: Some((name: Some("Ana"), phone: Some("5511999990000"))),
                channel: whatsapp,
                instance_id: Some("wa-1"),
                metadata: { "queue": "support" },
            ),
        ],
    )"#;

    #[test]
    fn test_parses_full_config() {
        let herald = Herald::from_ron(SAMPLE).unwrap();

        assert_eq!(herald.dispatch.rate_limit.default_tps, 8);
        assert_eq!(herald.dispatch.rate_limit.instance_overrides.get("wa-1"), Some(&11));
        assert_eq!(herald.dispatch.rate_limit.algorithm, RateLimitAlgorithm::TokenBucket);
        assert_eq!(herald.dispatch.circuit_breaker.failure_threshold, 3);
        assert_eq!(herald.dispatch.circuit_breaker.window_ms, 60_000);
        assert_eq!(herald.transport.token.as_deref(), Some("secret"));
        assert_eq!(herald.transport.timeout_ms, 10_000);
        assert!(!herald.metrics.enabled);
        assert_eq!(herald.purge_interval_secs, 60);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let herald = Herald::from_ron("()").unwrap();
        assert_eq!(herald.dispatch, DispatchConfig::default());
        assert!(herald.tickets.is_empty());
    }

    #[tokio::test]
    async fn test_directory_is_seeded() {
        let directory = Herald::from_ron(SAMPLE).unwrap().directory();

        let ticket = directory
            .find_ticket(&TenantId::from("acme"), &TicketId::from("t-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ticket.address(), Some("5511999990000"));

        let instance = directory
            .find_instance(&InstanceId::from("wa-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.state, ConnectionState::Connected);
        assert_eq!(instance.provider, "broker");
    }

    #[test]
    fn test_find_config_file_explicit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"()").unwrap();

        assert_eq!(find_config_file(Some(file.path())).unwrap(), file.path());
        assert!(Herald::load(file.path()).is_ok());

        assert!(find_config_file(Some(Path::new("/nonexistent/herald.ron"))).is_err());
    }
}
