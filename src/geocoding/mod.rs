pub mod google;
pub mod lookup;
pub mod nominatim;
pub mod states;

use crate::config::Config;
use crate::weather::types::Coordinates;
use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use google::GoogleGeocoder;
pub use lookup::CountyLookup;
pub use nominatim::NominatimGeocoder;
pub use states::AreaContext;

#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Geocoding API error: {0}")]
    ApiError(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid county table: {0}")]
    Csv(#[from] csv::Error),
}

/// A county within a state, by normalized county name and state abbreviation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub area: String,
}

impl Region {
    pub fn new(name: impl Into<String>, area: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            area: area.into(),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.name, self.area)
    }
}

/// Resolves a region to coordinates. `None` means no source could place it.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn resolve(&self, region: &Region) -> Option<Coordinates>;
}

/// One link of a [`GeocoderChain`].
#[async_trait]
pub trait GeocodeSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn lookup(&self, region: &Region) -> Result<Option<Coordinates>, GeocodeError>;
}

/// Tries each source in order and memoizes successful resolutions.
pub struct GeocoderChain {
    sources: Vec<Arc<dyn GeocodeSource>>,
    resolved: Cache<Region, Coordinates>,
}

impl GeocoderChain {
    pub fn new(sources: Vec<Arc<dyn GeocodeSource>>) -> Self {
        Self {
            sources,
            resolved: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(24 * 60 * 60))
                .build(),
        }
    }

    /// County table first, then Google when a key is configured, then Nominatim.
    pub fn from_config(config: &Config, lookup: Arc<CountyLookup>) -> Result<Self, GeocodeError> {
        let mut sources: Vec<Arc<dyn GeocodeSource>> = Vec::new();
        sources.push(lookup);

        match &config.google_geocoding_api_key {
            Some(key) => sources.push(Arc::new(GoogleGeocoder::new(
                key.clone(),
                config.google_geocoding_url.clone(),
            )?)),
            None => tracing::info!("No Google geocoding key configured, skipping that source"),
        }
        sources.push(Arc::new(NominatimGeocoder::new(config.nominatim_url.clone())?));

        Ok(Self::new(sources))
    }
}

#[async_trait]
impl Geocoder for GeocoderChain {
    async fn resolve(&self, region: &Region) -> Option<Coordinates> {
        if let Some(coords) = self.resolved.get(region).await {
            return Some(coords);
        }

        for source in &self.sources {
            match source.lookup(region).await {
                Ok(Some(coords)) if coords.is_valid() => {
                    tracing::debug!(%region, source = source.name(), lat = coords.lat, lon = coords.lon, "Resolved region");
                    self.resolved.insert(region.clone(), coords).await;
                    return Some(coords);
                }
                Ok(Some(coords)) => {
                    tracing::warn!(%region, source = source.name(), lat = coords.lat, lon = coords.lon, "Geocoder returned out-of-range coordinates");
                }
                Ok(None) => {
                    tracing::debug!(%region, source = source.name(), "Region not found, trying next source");
                }
                Err(e) => {
                    tracing::warn!(%region, source = source.name(), error = %e, "Geocoding source failed, trying next source");
                }
            }
        }

        None
    }
}

/// Query string for network geocoders, e.g. `"Lake, Oregon"`.
pub(crate) fn query_for(region: &Region) -> String {
    let state = states::state_name(&region.area).unwrap_or(&region.area);
    format!("{}, {}", region.name, state)
}

const ADMIN_SUFFIXES: &[&str] = &[
    " County",
    " Parish",
    " Borough",
    " City",
    " Municipality",
    " Census Area",
    " Area",
    " and",
    "City",
    "city",
];

/// Strips administrative suffixes so county-table names and geometry names
/// compare equal (`"Los Angeles County"` and `"Los Angeles"` both become
/// `"Los Angeles"`).
pub fn standardize_county_name(name: &str) -> String {
    let mut name = name.to_string();
    for suffix in ADMIN_SUFFIXES {
        if name.contains(suffix) {
            name = name.replace(suffix, "").trim().replace("county", "");
        }
    }
    name
}
