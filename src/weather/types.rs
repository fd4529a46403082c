use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Cache key for a coordinate pair.
///
/// Floats are printed in shortest round-trip form with a trailing `.0` for
/// integral values, so `(10.0, 20.0)` becomes `10.0_20.0`. Nearby coordinates
/// are never folded together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Coordinates> for CacheKey {
    fn from(coords: Coordinates) -> Self {
        Self(format!("{:?}_{:?}", coords.lat, coords.lon))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One day of weather at a location. Missing values stay `None`; fields
/// this crate does not model are kept in `extra` so a cache rewrite carries
/// them through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_2m_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_2m_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precipitation_sum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed_10m_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_gusts_10m_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface_pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_humidity_2m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dew_point_2m: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeatherSeries(pub Vec<DailyRecord>);

impl WeatherSeries {
    pub fn records(&self) -> &[DailyRecord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Per-field mean across the series, skipping missing values.
    pub fn averages(&self) -> WeatherAverages {
        let mean = |field: fn(&DailyRecord) -> Option<f64>| {
            let values: Vec<f64> = self.records().iter().filter_map(field).collect();
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        };

        WeatherAverages {
            temperature_2m_max: mean(|r| r.temperature_2m_max),
            temperature_2m_min: mean(|r| r.temperature_2m_min),
            precipitation_sum: mean(|r| r.precipitation_sum),
            wind_speed_10m_max: mean(|r| r.wind_speed_10m_max),
            wind_gusts_10m_max: mean(|r| r.wind_gusts_10m_max),
            surface_pressure: mean(|r| r.surface_pressure),
            relative_humidity_2m: mean(|r| r.relative_humidity_2m),
            dew_point_2m: mean(|r| r.dew_point_2m),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherAverages {
    pub temperature_2m_max: Option<f64>,
    pub temperature_2m_min: Option<f64>,
    pub precipitation_sum: Option<f64>,
    pub wind_speed_10m_max: Option<f64>,
    pub wind_gusts_10m_max: Option<f64>,
    pub surface_pressure: Option<f64>,
    pub relative_humidity_2m: Option<f64>,
    pub dew_point_2m: Option<f64>,
}

// Open-Meteo forecast response, limited to the variables we request.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub current: ForecastCurrent,
    pub hourly: ForecastHourly,
    pub daily: ForecastDaily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastCurrent {
    pub relative_humidity_2m: Option<f64>,
    pub surface_pressure: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastHourly {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub dew_point_2m: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastDaily {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_speed_10m_max: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_gusts_10m_max: Vec<Option<f64>>,
}

impl ForecastResponse {
    /// Flatten the response into one record per day.
    ///
    /// Current humidity and pressure are copied onto every record; only the
    /// first `dew_point_window` hourly dew points are kept.
    pub fn into_series(self, dew_point_window: usize) -> WeatherSeries {
        fn at(values: &[Option<f64>], i: usize) -> Option<f64> {
            values.get(i).copied().flatten()
        }

        let daily = &self.daily;

        let records = (0..daily.time.len())
            .map(|i| DailyRecord {
                temperature_2m_max: at(&daily.temperature_2m_max, i),
                temperature_2m_min: at(&daily.temperature_2m_min, i),
                precipitation_sum: at(&daily.precipitation_sum, i),
                wind_speed_10m_max: at(&daily.wind_speed_10m_max, i),
                wind_gusts_10m_max: at(&daily.wind_gusts_10m_max, i),
                surface_pressure: self.current.surface_pressure,
                relative_humidity_2m: self.current.relative_humidity_2m,
                dew_point_2m: if i < dew_point_window {
                    at(&self.hourly.dew_point_2m, i)
                } else {
                    None
                },
                extra: Default::default(),
            })
            .collect();

        WeatherSeries(records)
    }
}
