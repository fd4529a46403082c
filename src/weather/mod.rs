pub mod cache;
#[cfg(test)]
pub mod mock;
pub mod openmeteo;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;
use types::{Coordinates, WeatherSeries};

pub use cache::{CacheError, WeatherCache};
pub use openmeteo::OpenMeteoClient;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    JsonParsing(#[from] serde_json::Error),
    #[error("Gave up after {attempts} attempts, last status {status}")]
    RetriesExhausted { attempts: u32, status: u16 },
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Invalid coordinates: {0}, {1}")]
    InvalidCoordinates(f64, f64),
}

/// Source of fresh weather series for a coordinate pair.
#[async_trait]
pub trait WeatherFetch: Send + Sync {
    async fn fetch(&self, coords: Coordinates) -> Result<WeatherSeries, FetchError>;
}
