use super::types::*;
use super::{FetchError, WeatherFetch};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Deterministic stand-in for the weather API that counts its calls.
///
/// The generated series encodes the coordinates, so two different keys never
/// produce equal series.
pub struct MockWeatherFetch {
    calls: AtomicUsize,
    failing: HashSet<CacheKey>,
    delay: Option<Duration>,
}

impl MockWeatherFetch {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: HashSet::new(),
            delay: None,
        }
    }

    pub fn failing_on(mut self, coords: Coordinates) -> Self {
        self.failing.insert(CacheKey::from(coords));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherFetch for MockWeatherFetch {
    async fn fetch(&self, coords: Coordinates) -> Result<WeatherSeries, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&CacheKey::from(coords)) {
            return Err(FetchError::ApiError("HTTP 500: mock failure".to_string()));
        }

        Ok(generate_mock_series(coords, 14))
    }
}

/// A plausible two-week series whose values depend on the coordinates.
pub fn generate_mock_series(coords: Coordinates, days: usize) -> WeatherSeries {
    let records = (0..days)
        .map(|day| {
            let swing = (day as f64 * 0.45).sin();
            DailyRecord {
                temperature_2m_max: Some(25.0 + coords.lat / 10.0 + 4.0 * swing),
                temperature_2m_min: Some(10.0 + coords.lon / 100.0 + 2.0 * swing),
                precipitation_sum: Some(if day % 5 == 0 { 2.5 } else { 0.0 }),
                wind_speed_10m_max: Some(15.0 + swing.abs() * 5.0),
                wind_gusts_10m_max: Some(30.0 + swing.abs() * 10.0),
                surface_pressure: Some(1000.0 + coords.lat.abs() / 10.0),
                relative_humidity_2m: Some(40.0),
                dew_point_2m: Some(5.0 + swing),
                extra: Default::default(),
            }
        })
        .collect();

    WeatherSeries(records)
}
