use crate::geocoding::standardize_county_name;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("Geometry table not found at {0}")]
    Missing(String),
    #[error("Failed to read geometry table: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid GeoJSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Expected a FeatureCollection, found {0}")]
    NotFeatureCollection(String),
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskTag {
    HighRisk,
    LowRisk,
    #[default]
    Unassessed,
    /// Coordinates for the county could not be determined.
    Unresolved,
    /// Evaluation errored after the county was resolved.
    Failed,
    /// The county name matches several geometry rows, so no outcome was applied.
    Ambiguous,
}

impl RiskTag {
    pub fn color(&self) -> &'static str {
        match self {
            RiskTag::HighRisk => "red",
            RiskTag::LowRisk => "blue",
            RiskTag::Unassessed => "white",
            RiskTag::Unresolved => "grey",
            RiskTag::Failed => "black",
            RiskTag::Ambiguous => "orange",
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, RiskTag::Unresolved | RiskTag::Failed)
    }

    pub fn from_label(high_risk: bool) -> Self {
        if high_risk {
            RiskTag::HighRisk
        } else {
            RiskTag::LowRisk
        }
    }
}

/// One county polygon. `geometry` is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryRow {
    pub statefp: String,
    pub countyfp: String,
    pub geoid: String,
    pub name: String,
    pub normalized_name: String,
    pub geometry: Value,
    #[serde(default)]
    pub tag: RiskTag,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    properties: CountyProperties,
    #[serde(default)]
    geometry: Value,
}

#[derive(Debug, Deserialize)]
struct CountyProperties {
    #[serde(rename = "STATEFP")]
    statefp: String,
    #[serde(rename = "COUNTYFP")]
    countyfp: String,
    #[serde(rename = "GEOID")]
    geoid: String,
    #[serde(rename = "NAME")]
    name: String,
}

/// County geometry for the whole country, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct GeometryTable {
    rows: Vec<GeometryRow>,
}

impl GeometryTable {
    pub fn load(path: &Path) -> Result<Self, GeometryError> {
        if !path.exists() {
            return Err(GeometryError::Missing(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let table = Self::from_geojson(&raw)?;
        tracing::info!(path = %path.display(), counties = table.len(), "Loaded county geometry");
        Ok(table)
    }

    pub fn from_geojson(raw: &str) -> Result<Self, GeometryError> {
        let collection: FeatureCollection = serde_json::from_str(raw)?;
        if collection.kind != "FeatureCollection" {
            return Err(GeometryError::NotFeatureCollection(collection.kind));
        }

        let rows = collection
            .features
            .into_iter()
            .map(|feature| {
                let props = feature.properties;
                GeometryRow {
                    normalized_name: standardize_county_name(&props.name),
                    statefp: props.statefp,
                    countyfp: props.countyfp,
                    geoid: props.geoid,
                    name: props.name,
                    geometry: feature.geometry,
                    tag: RiskTag::Unassessed,
                }
            })
            .collect();

        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fresh, unassessed rows for one state.
    pub fn rows_for(&self, fips: &str) -> Vec<GeometryRow> {
        self.rows
            .iter()
            .filter(|row| row.statefp == fips)
            .cloned()
            .collect()
    }
}

/// Exact `normalized_name -> row indices` index over one state's rows.
#[derive(Debug, Default)]
pub struct NameIndex {
    by_name: BTreeMap<String, Vec<usize>>,
}

impl NameIndex {
    pub fn build(rows: &[GeometryRow]) -> Self {
        let mut by_name: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, row) in rows.iter().enumerate() {
            by_name.entry(row.normalized_name.clone()).or_default().push(i);
        }
        Self { by_name }
    }

    /// Indices of rows whose normalized name equals `name`; empty when none do.
    pub fn lookup(&self, name: &str) -> &[usize] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Country-wide GeoJSON with `risk_tag` and `risk_color` on every feature.
pub fn to_feature_collection<'a>(rows: impl IntoIterator<Item = &'a GeometryRow>) -> Value {
    let features: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            json!({
                "type": "Feature",
                "properties": {
                    "STATEFP": row.statefp,
                    "COUNTYFP": row.countyfp,
                    "GEOID": row.geoid,
                    "NAME": row.name,
                    "risk_tag": row.tag,
                    "risk_color": row.tag.color(),
                },
                "geometry": row.geometry,
            })
        })
        .collect();

    json!({ "type": "FeatureCollection", "features": features })
}
