//! Command-line interface for the stream metrics collector.
//!
//! Run `stream-collector` to start the HTTP collector with sensible defaults.

use crate::core::config::{ConfigBuilder, LoggingConfig};
use crate::core::{CollectorError, Config, ExpiryPolicy, Result};
use crate::metrics::MetricsCollector;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Collects stream application metrics and serves them as a stream hierarchy.
#[derive(Parser, Debug)]
#[command(name = "stream-collector")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// HTTP port
    #[arg(short, long, env = "COLLECTOR_PORT")]
    pub port: Option<u16>,

    /// Address to bind the HTTP listener to
    #[arg(long, env = "COLLECTOR_BIND")]
    pub bind: Option<IpAddr>,

    /// Seconds an instance survives without new samples
    #[arg(long, env = "COLLECTOR_EVICTION_TIMEOUT")]
    pub eviction_timeout: Option<u64>,

    /// Which operations keep an instance alive (after_write, after_access)
    #[arg(long, env = "COLLECTOR_EXPIRY", value_parser = parse_expiry)]
    pub expiry: Option<ExpiryPolicy>,

    /// Configuration file path (default: ~/.config/stream-collector/config.yaml)
    #[arg(short, long, env = "COLLECTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "COLLECTOR_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

fn parse_expiry(value: &str) -> std::result::Result<ExpiryPolicy, String> {
    match value {
        "after_write" | "after-write" => Ok(ExpiryPolicy::AfterWrite),
        "after_access" | "after-access" => Ok(ExpiryPolicy::AfterAccess),
        other => Err(format!("unknown expiry policy '{other}', expected after_write or after_access")),
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => Some(path.clone()),
            None => dirs::config_dir()
                .map(|d| d.join("stream-collector").join("config.yaml"))
                .filter(|path| path.exists()),
        };

        if let Some(path) = config_path {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    builder = builder.from_yaml(&content)?;
                },
                Err(e) => {
                    return Err(CollectorError::config(format!(
                        "Failed to read config file {}: {e}",
                        path.display()
                    )));
                },
            }
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(bind) = self.bind {
            builder = builder.bind_address(bind);
        }
        if let Some(secs) = self.eviction_timeout {
            builder = builder.eviction_timeout(Duration::from_secs(secs));
        }
        if let Some(policy) = self.expiry {
            builder = builder.expiry(policy);
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging.
    ///
    /// `RUST_LOG` wins, then `--debug`, then `COLLECTOR_LOG_LEVEL`, then the
    /// configured level.
    pub fn init_logging(&self, logging: &LoggingConfig) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level = std::env::var("COLLECTOR_LOG_LEVEL").ok();
        let log_level = if self.debug {
            "debug"
        } else {
            env_log_level.as_deref().unwrap_or(logging.level.as_str())
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let fmt_layer = if logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| CollectorError::config(format!("Failed to initialize logging: {e}")))?;

        Ok(())
    }
}

/// Execute the collector.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  Listen address: {}:{}", config.server.bind_address, config.server.port);
        println!("  Eviction timeout: {:?}", config.store.eviction_timeout);
        println!("  Expiry policy: {:?}", config.store.expiry);
        println!("  Cleanup interval: {:?}", config.store.cleanup_interval);
        return Ok(());
    }

    cli.init_logging(&config.logging)?;
    start_server(config).await
}

async fn start_server(config: Config) -> Result<()> {
    let collector = MetricsCollector::new(&config)?;

    tracing::info!("Stream collector starting");
    tracing::info!("  HTTP on {}:{}", config.server.bind_address, config.server.port);
    tracing::info!("  Eviction timeout {:?} ({:?})", config.store.eviction_timeout, config.store.expiry);

    let maintenance = tokio::spawn(run_maintenance(collector.clone(), config.store.cleanup_interval));

    let server = crate::api::start_server(collector, &config.server);
    let shutdown = tokio::signal::ctrl_c();

    let outcome = tokio::select! {
        result = server => {
            if let Err(e) = &result {
                tracing::error!("Server error: {}", e);
            }
            result
        }
        _ = shutdown => {
            tracing::info!("Received shutdown signal, stopping...");
            Ok(())
        }
    };

    maintenance.abort();
    match maintenance.await {
        Err(e) if !e.is_cancelled() => return Err(e.into()),
        _ => {},
    }

    outcome
}

/// Sweeps expired samples on a fixed interval.
async fn run_maintenance(collector: MetricsCollector, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let evicted = collector.run_pending_tasks();
        if evicted > 0 {
            tracing::debug!(evicted, "Swept expired samples");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("stream-collector").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_overrides() {
        let cli = cli(&["--port", "9090", "--eviction-timeout", "5", "--expiry", "after_write"]);
        let config = cli.build_config_from_args(ConfigBuilder::new()).unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.store.eviction_timeout, Duration::from_secs(5));
        assert_eq!(config.store.expiry, ExpiryPolicy::AfterWrite);
    }

    #[test]
    fn test_cli_rejects_unknown_policy() {
        assert!(Cli::try_parse_from(["stream-collector", "--expiry", "sometimes"]).is_err());
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let cli = cli(&["--eviction-timeout", "0"]);
        assert!(cli.build_config_from_args(ConfigBuilder::new()).is_err());
    }

    #[tokio::test]
    async fn test_missing_explicit_config_file() {
        let cli = cli(&["--config", "/nonexistent/stream-collector.yaml"]);
        assert!(matches!(cli.load_config().await, Err(CollectorError::Config(_))));
    }
}
