mod analysis;
mod bars;
mod cache;
mod chart;
mod comfy_table;
mod config;
mod error;
mod filter_utils;
mod find_tickers;
mod klines;
mod notifier;
mod pinbar;
mod signer;
mod storage_utils;

use crate::cache::ResponseCache;
use crate::chart::CandlestickRenderer;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::klines::ExchangeClient;
use crate::notifier::TelegramNotifier;
use crate::storage_utils::AsyncStorageManager;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Step 1: Configuration, before any network call
    let config = AppConfig::from_env().map_err(PipelineError::from)?;
    info!(interval = %config.klines.interval, window = config.klines.window, "configuration loaded");

    // Step 2: Shared clients
    let cache = open_cache(&config).await?;
    let client = ExchangeClient::new(&config, cache)?;
    let http = reqwest::Client::builder()
        .timeout(config.fetch.request_timeout)
        .build()
        .map_err(PipelineError::HttpClient)?;
    let notifier = TelegramNotifier::new(http, &config.telegram);
    let renderer = CandlestickRenderer::default();

    // Step 3: Screen every symbol
    let report = tokio::select! {
        result = analysis::run_analysis_pipeline(&config, &client, &renderer, &notifier) => result,
        _ = tokio::signal::ctrl_c() => Err(PipelineError::Cancelled),
    };
    let report = match report {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "run aborted");
            return Err(e.into());
        }
    };

    // Step 4: Summary
    info!(
        symbols = report.outcomes.len(),
        signals = report.signals().count(),
        skipped = report.skipped().count(),
        failed = report.failures().count(),
        "run complete"
    );
    println!(
        "\n{}\n{}",
        crate::comfy_table::summary_title(&report),
        crate::comfy_table::summary_table(&report)
    );

    Ok(())
}

async fn open_cache(config: &AppConfig) -> Result<Option<ResponseCache>, PipelineError> {
    if !config.cache.enabled {
        return Ok(None);
    }

    let storage = match &config.cache.dir {
        Some(dir) => AsyncStorageManager::new(dir.clone()).await,
        None => AsyncStorageManager::new_relative("storage/http_cache").await,
    }
    .map_err(|e| PipelineError::Cache(e.to_string()))?;

    let ttl = config.klines.interval.cache_ttl();
    info!(dir = ?storage.base_dir, ttl_secs = ttl.as_secs(), "response cache enabled");
    let cache = ResponseCache::new(storage, ttl);
    match cache.purge_expired().await {
        Ok(removed) => info!(removed, "expired cache entries removed"),
        Err(e) => warn!(error = %e, "cache sweep failed"),
    }
    Ok(Some(cache))
}
