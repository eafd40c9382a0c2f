//! Prometheus exporter for Golem network and CoinMarketCap statistics.

use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use marketstats_exporter::config::{LogFormat, split_list};
use marketstats_exporter::{ExporterConfig, HttpServer, build_pipeline};

/// Prometheus exporter for Golem network and CoinMarketCap statistics.
#[derive(Parser, Debug)]
#[command(name = "marketstats-exporter")]
#[command(about = "Export Golem network and CoinMarketCap statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error). Defaults to the config value.
    #[arg(long)]
    log_level: Option<String>,

    /// CoinMarketCap API key. Enables the CoinMarketCap collector.
    #[arg(long, env = "CMC_API_KEY", hide_env_values = true)]
    cmc_api_key: Option<String>,

    /// Comma separated coin symbols to quote.
    #[arg(long, env = "CMC_SYMBOLS")]
    cmc_symbols: Option<String>,

    /// Comma separated currencies to convert into.
    #[arg(long, env = "CMC_CURRENCIES")]
    cmc_currencies: Option<String>,

    /// CoinMarketCap cache TTL in seconds.
    #[arg(long, env = "CMC_CACHE_TTL")]
    cmc_cache_ttl: Option<u64>,

    /// Golem stats cache TTL in seconds.
    #[arg(long, env = "GLM_CACHE_TTL")]
    glm_cache_ttl: Option<u64>,
}

impl Args {
    /// Apply command line and environment overrides on top of `config`.
    fn apply(&self, config: &mut ExporterConfig) {
        if let Some(listen) = &self.listen {
            config.prometheus.listen = listen.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }

        let cmc = &mut config.coinmarketcap;
        if let Some(key) = self.cmc_api_key.as_deref().filter(|k| !k.is_empty()) {
            cmc.api_key = key.to_string();
            cmc.enabled = true;
        }
        if let Some(symbols) = &self.cmc_symbols {
            cmc.symbols = split_list(symbols);
        }
        if let Some(currencies) = &self.cmc_currencies {
            cmc.currencies = split_list(currencies);
        }
        if let Some(ttl) = self.cmc_cache_ttl {
            cmc.cache_ttl_secs = ttl;
        }
        if let Some(ttl) = self.glm_cache_ttl {
            config.golem.cache_ttl_secs = ttl;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };
    args.apply(&mut config);
    config.validate()?;

    // Initialize logging
    let log_level = config.logging.level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("marketstats_exporter={}", log_level).parse()?)
        .add_directive(format!("reqwest={}", Level::WARN).parse()?)
        .add_directive(format!("hyper={}", Level::WARN).parse()?);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!(
        golem = config.golem.enabled,
        coinmarketcap = config.coinmarketcap.enabled,
        "Starting marketstats exporter"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = build_pipeline(&config)?;

    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let http_server = HttpServer::new(
        pipeline.exporter.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );

    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    // Print final stats
    let stats = pipeline.exporter.stats();
    info!(
        scrapes = stats.scrapes,
        failures = stats.failures,
        "Final statistics"
    );
    for (name, cache) in &pipeline.caches {
        let stats = cache.stats();
        info!(
            cache = %name,
            hits = stats.hits,
            misses = stats.misses,
            failures = stats.failures,
            evictions = stats.evictions,
            "Final cache statistics"
        );
    }

    info!("Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
