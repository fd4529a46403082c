use super::types::*;
use super::{FetchError, WeatherFetch};
use crate::config::Config;
use crate::utils::jitter;
use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;

const DAILY_VARIABLES: &str =
    "temperature_2m_max,temperature_2m_min,precipitation_sum,wind_speed_10m_max,wind_gusts_10m_max";
const CURRENT_VARIABLES: &str = "relative_humidity_2m,surface_pressure";
const HOURLY_VARIABLES: &str = "dew_point_2m";

pub struct OpenMeteoClient {
    client: Client,
    forecast_url: String,
    past_days: u32,
    dew_point_window: usize,
    max_retries: u32,
    backoff_factor: Duration,
    responses: Cache<CacheKey, WeatherSeries>,
}

impl OpenMeteoClient {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent("WildfireRisk/0.1")
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            forecast_url: format!(
                "{}{}",
                config.open_meteo_base_url, config.open_meteo_forecast_path
            ),
            past_days: config.open_meteo_past_days,
            dew_point_window: config.dew_point_window,
            max_retries: 5,
            backoff_factor: Duration::from_millis(200),
            // Request-level cache: repeated lookups within an hour never hit the API.
            responses: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(60 * 60))
                .build(),
        })
    }

    #[cfg(test)]
    fn with_backoff(mut self, backoff_factor: Duration) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    async fn get_forecast(&self, coords: Coordinates) -> Result<ForecastResponse, FetchError> {
        let lat = coords.lat.to_string();
        let lon = coords.lon.to_string();
        let past_days = self.past_days.to_string();

        let response = self
            .make_request_with_retry(&[
                ("latitude", &lat),
                ("longitude", &lon),
                ("current", CURRENT_VARIABLES),
                ("hourly", HOURLY_VARIABLES),
                ("daily", DAILY_VARIABLES),
                ("past_days", &past_days),
            ])
            .await?;

        let forecast: ForecastResponse = serde_json::from_value(response)?;
        Ok(forecast)
    }

    async fn make_request_with_retry(
        &self,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value, FetchError> {
        let mut retry_count = 0;

        loop {
            let delay = self.backoff_factor * 2u32.saturating_pow(retry_count);

            let response = match self.client.get(&self.forecast_url).query(params).send().await {
                Ok(response) => response,
                Err(e) if retry_count < self.max_retries && (e.is_timeout() || e.is_connect()) => {
                    tracing::warn!(error = %e, "Open-Meteo request failed, retrying in {}ms", delay.as_millis());
                    sleep(delay + jitter(delay)).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response.json().await?);
            }

            let retryable =
                status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if !retryable {
                let error_text = response.text().await.unwrap_or_default();
                return Err(FetchError::ApiError(format!("HTTP {}: {}", status, error_text)));
            }
            if retry_count >= self.max_retries {
                return Err(FetchError::RetriesExhausted {
                    attempts: retry_count + 1,
                    status: status.as_u16(),
                });
            }

            tracing::warn!(
                status = status.as_u16(),
                "Open-Meteo returned a retryable status, retrying in {}ms",
                delay.as_millis()
            );
            sleep(delay + jitter(delay)).await;
            retry_count += 1;
        }
    }
}

#[async_trait]
impl WeatherFetch for OpenMeteoClient {
    async fn fetch(&self, coords: Coordinates) -> Result<WeatherSeries, FetchError> {
        if !coords.is_valid() {
            return Err(FetchError::InvalidCoordinates(coords.lat, coords.lon));
        }

        let key = CacheKey::from(coords);
        if let Some(series) = self.responses.get(&key).await {
            tracing::debug!(%key, "Open-Meteo response served from request cache");
            return Ok(series);
        }

        let series = self
            .get_forecast(coords)
            .await?
            .into_series(self.dew_point_window);
        if series.is_empty() {
            return Err(FetchError::ApiError(format!(
                "Open-Meteo returned no daily values for {}",
                key
            )));
        }
        self.responses.insert(key, series.clone()).await;

        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> Config {
        Config {
            open_meteo_base_url: base_url.to_string(),
            ..Config::default()
        }
    }

    fn forecast_body() -> serde_json::Value {
        json!({
            "latitude": 10.0,
            "longitude": 20.0,
            "current": { "relative_humidity_2m": 35.0, "surface_pressure": 1005.5 },
            "hourly": { "time": ["t0", "t1"], "dew_point_2m": [4.0, 5.0] },
            "daily": {
                "time": ["2026-10-18", "2026-10-19"],
                "temperature_2m_max": [31.0, 29.0],
                "temperature_2m_min": [14.0, 12.0],
                "precipitation_sum": [0.0, 0.4],
                "wind_speed_10m_max": [20.0, 18.0],
                "wind_gusts_10m_max": [41.0, 35.0]
            }
        })
    }

    #[tokio::test]
    async fn test_fetch_builds_series() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("latitude", "10"))
            .and(query_param("past_days", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(&test_config(&server.uri())).unwrap();
        let series = client.fetch(Coordinates::new(10.0, 20.0)).await.unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.records()[0].temperature_2m_max, Some(31.0));
        assert_eq!(series.records()[1].relative_humidity_2m, Some(35.0));
        assert_eq!(series.records()[1].dew_point_2m, Some(5.0));
    }

    #[tokio::test]
    async fn test_fetch_uses_request_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(&test_config(&server.uri())).unwrap();
        let first = client.fetch(Coordinates::new(10.0, 20.0)).await.unwrap();
        let second = client.fetch(Coordinates::new(10.0, 20.0)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(503))
            .expect(6)
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(&test_config(&server.uri()))
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let result = client.fetch(Coordinates::new(10.0, 20.0)).await;

        assert!(matches!(
            result,
            Err(FetchError::RetriesExhausted { attempts: 6, status: 503 })
        ));
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_coordinates() {
        let client = OpenMeteoClient::new(&Config::default()).unwrap();
        let result = client.fetch(Coordinates::new(91.0, 0.0)).await;
        assert!(matches!(result, Err(FetchError::InvalidCoordinates(..))));
    }
}
