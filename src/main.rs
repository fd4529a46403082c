use chrono::Utc;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod classifier;
mod config;
mod evaluator;
mod geocoding;
mod geometry;
mod refresh;
mod utils;
mod weather;

use classifier::ForestClassifier;
use config::Config;
use evaluator::RiskBatchEvaluator;
use geocoding::{CountyLookup, GeocoderChain};
use geometry::GeometryTable;
use refresh::StateRefresher;
use weather::{OpenMeteoClient, WeatherCache};

const ERROR_LOG_FILE: &str = "error_log.txt";

/// Console logging plus an ERROR-only copy in `{cache_dir}/error_log.txt`,
/// which collects the per-county failures of every run.
fn init_tracing(config: &Config) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(&config.cache_dir)?;
    let file_appender = tracing_appender::rolling::never(&config.cache_dir, ERROR_LOG_FILE);
    let (error_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wildfire_risk=info".into()),
        )
        .with(fmt::layer())
        .with(
            fmt::layer()
                .with_writer(error_writer)
                .with_ansi(false)
                .with_filter(LevelFilter::ERROR),
        )
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    let _log_guard = init_tracing(&config)?;

    tracing::info!(
        states = config.states.len(),
        workers = config.worker_count,
        "Wildfire risk refresh starting"
    );

    // Geometry and model are hard preconditions; nothing runs without them.
    let geometry = Arc::new(GeometryTable::load(&config.geometry_path)?);
    if geometry.is_empty() {
        anyhow::bail!("Geometry table {} has no counties", config.geometry_path.display());
    }
    let classifier = Arc::new(ForestClassifier::load(&config.model_path)?);

    let counties = Arc::new(CountyLookup::load(&config.county_lookup_path)?);
    if counties.is_empty() {
        tracing::warn!("County table is empty, every county will go to the network geocoders");
    }
    let geocoder = Arc::new(GeocoderChain::from_config(&config, counties.clone())?);
    let fetcher = Arc::new(OpenMeteoClient::new(&config)?);
    let cache = Arc::new(WeatherCache::new(config.weather_cache_path.clone(), fetcher));

    let evaluator = RiskBatchEvaluator::new(geocoder, cache.clone(), classifier, counties, geometry)
        .with_worker_count(config.worker_count);
    let refresher = StateRefresher::new(
        evaluator,
        config.state_cache_dir(),
        config.refresh_interval_days,
        config.states.clone(),
    );

    let summary = refresher.run(Utc::now().date_naive()).await?;

    tracing::info!(
        weather_entries = cache.entry_count().await?,
        weather_cache = %cache.path().display(),
        country_map = %refresher.country_file().display(),
        "Wildfire risk refresh finished"
    );
    if !summary.failed.is_empty() {
        tracing::warn!(states = ?summary.failed, "Some states could not be evaluated");
    }

    Ok(())
}
