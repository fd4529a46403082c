//! File-backed weather cache keyed by coordinate pair.
//!
//! The cache file is newline-delimited JSON. Every line is a mapping fragment
//! `{"<lat>_<lon>": [record, ...]}`; readers merge all lines and later lines
//! win for a repeated key. A miss fetches from the injected [`WeatherFetch`]
//! and rewrites the whole file through a uniquely named temp file and rename,
//! so a reader never observes a half-written cache.
//!
//! There is no cross-process lock. Two processes missing at the same time
//! both fetch and both succeed; the last rename wins and the other entry is
//! fetched again on its next miss.

use super::types::{CacheKey, Coordinates, WeatherSeries};
use super::{FetchError, WeatherFetch};
use crate::utils::write_atomic;
use moka::future::Cache;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Sources are behind `Arc` so the error is `Clone`: a failure shared by
/// coalesced callers reaches each of them with its original variant.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Cache file I/O failed: {0}")]
    Io(Arc<std::io::Error>),
    #[error("Cache serialization failed: {0}")]
    Serialize(Arc<serde_json::Error>),
    #[error("Weather fetch failed: {0}")]
    Fetch(Arc<FetchError>),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialize(Arc::new(e))
    }
}

impl From<FetchError> for CacheError {
    fn from(e: FetchError) -> Self {
        CacheError::Fetch(Arc::new(e))
    }
}

pub struct WeatherCache {
    path: PathBuf,
    fetcher: Arc<dyn WeatherFetch>,
    memo: Cache<CacheKey, WeatherSeries>,
    write_lock: Mutex<()>,
}

impl WeatherCache {
    pub fn new(path: impl Into<PathBuf>, fetcher: Arc<dyn WeatherFetch>) -> Self {
        Self {
            path: path.into(),
            fetcher,
            memo: Cache::builder().max_capacity(10_000).build(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the series for `coords`, fetching and persisting it on a miss.
    ///
    /// Concurrent callers asking for the same key share a single lookup, so a
    /// key is fetched at most once per process.
    pub async fn get(&self, coords: Coordinates) -> Result<WeatherSeries, CacheError> {
        let key = CacheKey::from(coords);

        self.memo
            .try_get_with(key.clone(), self.load_or_fetch(key, coords))
            .await
            .map_err(|e| CacheError::clone(&e))
    }

    /// Number of keys currently persisted.
    pub async fn entry_count(&self) -> Result<usize, CacheError> {
        Ok(self.load().await?.len())
    }

    /// Drop every cached series, on disk and in memory.
    pub async fn purge(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::info!(path = %self.path.display(), "Weather cache purged"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.memo.invalidate_all();

        Ok(())
    }

    async fn load_or_fetch(
        &self,
        key: CacheKey,
        coords: Coordinates,
    ) -> Result<WeatherSeries, CacheError> {
        if let Some(series) = self.load().await?.remove(&key) {
            tracing::debug!(%key, "Weather cache hit");
            return Ok(series);
        }

        tracing::info!(%key, "Weather cache miss, fetching");
        let series = self.fetcher.fetch(coords).await?;

        // Re-read under the lock so entries written by other tasks since the
        // first read are kept.
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(key, series.clone());
        self.persist(&entries).await?;

        Ok(series)
    }

    async fn load(&self) -> Result<BTreeMap<CacheKey, WeatherSeries>, CacheError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(parse_cache_lines(&contents))
    }

    async fn persist(&self, entries: &BTreeMap<CacheKey, WeatherSeries>) -> Result<(), CacheError> {
        let mut contents = String::new();
        for (key, series) in entries {
            let fragment: BTreeMap<&CacheKey, &WeatherSeries> = BTreeMap::from([(key, series)]);
            contents.push_str(&serde_json::to_string(&fragment)?);
            contents.push('\n');
        }

        write_atomic(&self.path, contents.as_bytes()).await?;
        tracing::debug!(entries = entries.len(), path = %self.path.display(), "Weather cache written");

        Ok(())
    }
}

fn parse_cache_lines(contents: &str) -> BTreeMap<CacheKey, WeatherSeries> {
    let mut entries = BTreeMap::new();

    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HashMap<CacheKey, WeatherSeries>>(line) {
            Ok(fragment) => entries.extend(fragment),
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "Skipping malformed weather cache line");
            }
        }
    }

    entries
}
