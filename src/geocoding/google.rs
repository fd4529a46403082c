use super::{query_for, GeocodeError, GeocodeSource, Region};
use crate::weather::types::Coordinates;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

pub struct GoogleGeocoder {
    client: Client,
    api_key: String,
    url: String,
}

impl GoogleGeocoder {
    pub fn new(api_key: String, url: String) -> Result<Self, GeocodeError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, api_key, url })
    }
}

#[async_trait]
impl GeocodeSource for GoogleGeocoder {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn lookup(&self, region: &Region) -> Result<Option<Coordinates>, GeocodeError> {
        let address = query_for(region);
        let response = self
            .client
            .get(&self.url)
            .query(&[("address", address.as_str()), ("key", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GeocodeError::ApiError(format!(
                "Google geocoding HTTP {}",
                response.status()
            )));
        }

        let body: GeocodeResponse = response.json().await?;
        match body.status.as_str() {
            "OK" => Ok(body
                .results
                .first()
                .map(|r| Coordinates::new(r.geometry.location.lat, r.geometry.location.lng))),
            "ZERO_RESULTS" => Ok(None),
            other => Err(GeocodeError::ApiError(format!(
                "Google geocoding status {}: {}",
                other,
                body.error_message.unwrap_or_default()
            ))),
        }
    }
}
