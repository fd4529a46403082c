use super::{query_for, GeocodeError, GeocodeSource, Region};
use crate::weather::types::Coordinates;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

// Nominatim returns coordinates as strings.
#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

pub struct NominatimGeocoder {
    client: Client,
    url: String,
}

impl NominatimGeocoder {
    pub fn new(url: String) -> Result<Self, GeocodeError> {
        // The public instance rejects requests without an identifying agent.
        let client = Client::builder()
            .user_agent("WildfireRisk/0.1 (county geocoder)")
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl GeocodeSource for NominatimGeocoder {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    async fn lookup(&self, region: &Region) -> Result<Option<Coordinates>, GeocodeError> {
        let query = query_for(region);
        let response = self
            .client
            .get(&self.url)
            .query(&[("q", query.as_str()), ("format", "json"), ("limit", "1")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GeocodeError::ApiError(format!(
                "Nominatim HTTP {}",
                response.status()
            )));
        }

        let places: Vec<Place> = response.json().await?;
        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };

        let lat = place.lat.parse::<f64>();
        let lon = place.lon.parse::<f64>();
        match (lat, lon) {
            (Ok(lat), Ok(lon)) => Ok(Some(Coordinates::new(lat, lon))),
            _ => Err(GeocodeError::ApiError(format!(
                "Nominatim returned unparseable coordinates {:?}, {:?}",
                place.lat, place.lon
            ))),
        }
    }
}
