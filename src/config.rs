use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::geocoding::states::CONTIGUOUS_STATES;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub weather_cache_path: PathBuf,
    pub open_meteo_base_url: String,
    pub open_meteo_forecast_path: String,
    pub open_meteo_past_days: u32,
    pub dew_point_window: usize,
    pub google_geocoding_api_key: Option<String>,
    pub google_geocoding_url: String,
    pub nominatim_url: String,
    pub county_lookup_path: PathBuf,
    pub geometry_path: PathBuf,
    pub model_path: PathBuf,
    pub cache_dir: PathBuf,
    pub worker_count: usize,
    pub refresh_interval_days: i64,
    pub states: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            weather_cache_path: PathBuf::from("cache/weather_cache/weather_cache.json"),
            open_meteo_base_url: "https://api.open-meteo.com".to_string(),
            open_meteo_forecast_path: "/v1/forecast".to_string(),
            open_meteo_past_days: 7,
            dew_point_window: 14,
            google_geocoding_api_key: None,
            google_geocoding_url: "https://maps.googleapis.com/maps/api/geocode/json".to_string(),
            nominatim_url: "https://nominatim.openstreetmap.org/search".to_string(),
            county_lookup_path: PathBuf::from("datasets/uscounties.csv"),
            geometry_path: PathBuf::from("map_data/cb_2018_us_county_5m.geojson"),
            model_path: PathBuf::from("models/trained_model.json"),
            cache_dir: PathBuf::from("cache"),
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            refresh_interval_days: 7,
            states: CONTIGUOUS_STATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();

        Ok(Config {
            weather_cache_path: env::var("WEATHER_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.weather_cache_path),
            open_meteo_base_url: env::var("OPEN_METEO_BASE_URL")
                .unwrap_or(defaults.open_meteo_base_url),
            open_meteo_forecast_path: env::var("OPEN_METEO_FORECAST_PATH")
                .unwrap_or(defaults.open_meteo_forecast_path),
            open_meteo_past_days: parse_var("OPEN_METEO_PAST_DAYS", defaults.open_meteo_past_days)?,
            dew_point_window: parse_var("DEW_POINT_WINDOW", defaults.dew_point_window)?,
            google_geocoding_api_key: env::var("GOOGLE_GEOCODING_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            google_geocoding_url: env::var("GOOGLE_GEOCODING_URL")
                .unwrap_or(defaults.google_geocoding_url),
            nominatim_url: env::var("NOMINATIM_URL").unwrap_or(defaults.nominatim_url),
            county_lookup_path: env::var("COUNTY_LOOKUP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.county_lookup_path),
            geometry_path: env::var("GEOMETRY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.geometry_path),
            model_path: env::var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            cache_dir: env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            worker_count: parse_var("WORKER_COUNT", defaults.worker_count)?.max(1),
            refresh_interval_days: parse_var("REFRESH_INTERVAL_DAYS", defaults.refresh_interval_days)?,
            states: env::var("STATES")
                .map(|list| parse_state_list(&list))
                .unwrap_or(defaults.states),
        })
    }

    pub fn state_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("state_data_cache")
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is not valid: {}", name, e)),
        Err(_) => Ok(default),
    }
}

fn parse_state_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
