use crate::weather::types::WeatherAverages;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Column order the model was trained on.
pub const FEATURE_NAMES: [&str; 13] = [
    "T2M",
    "T2M_MAX",
    "T2M_MIN",
    "T2M_RANGE",
    "T2MDEW",
    "WS10M",
    "WS10M_MAX",
    "WS10M_RANGE",
    "QV2M",
    "PRECTOT",
    "PS",
    "MONTH",
    "DAY_OF_YEAR",
];

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Failed to read model {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid model JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Model features {found:?} do not match expected {expected:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error("Weather averages have no value for {0}")]
    MissingFeature(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub high_risk: bool,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub t2m: f64,
    pub t2m_max: f64,
    pub t2m_min: f64,
    pub t2m_range: f64,
    pub t2mdew: f64,
    pub ws10m: f64,
    pub ws10m_max: f64,
    pub ws10m_range: f64,
    pub qv2m: f64,
    pub prectot: f64,
    pub ps: f64,
    pub month: f64,
    pub day_of_year: f64,
}

impl FeatureVector {
    pub fn from_averages(avg: &WeatherAverages, as_of: NaiveDate) -> Result<Self, ClassifierError> {
        fn need(value: Option<f64>, name: &'static str) -> Result<f64, ClassifierError> {
            value
                .filter(|v| v.is_finite())
                .ok_or(ClassifierError::MissingFeature(name))
        }

        let t_max = need(avg.temperature_2m_max, "temperature_2m_max")?;
        let t_min = need(avg.temperature_2m_min, "temperature_2m_min")?;
        let wind = need(avg.wind_speed_10m_max, "wind_speed_10m_max")?;
        let gusts = need(avg.wind_gusts_10m_max, "wind_gusts_10m_max")?;

        Ok(Self {
            t2m: (t_max + t_min) / 2.0,
            t2m_max: t_max,
            t2m_min: t_min,
            t2m_range: t_max - t_min,
            t2mdew: need(avg.dew_point_2m, "dew_point_2m")?,
            ws10m: wind,
            ws10m_max: wind,
            ws10m_range: gusts - wind,
            qv2m: need(avg.relative_humidity_2m, "relative_humidity_2m")?,
            prectot: need(avg.precipitation_sum, "precipitation_sum")?,
            ps: need(avg.surface_pressure, "surface_pressure")?,
            month: as_of.month() as f64,
            day_of_year: as_of.ordinal() as f64,
        })
    }

    /// Values in [`FEATURE_NAMES`] order.
    pub fn as_array(&self) -> [f64; 13] {
        [
            self.t2m,
            self.t2m_max,
            self.t2m_min,
            self.t2m_range,
            self.t2mdew,
            self.ws10m,
            self.ws10m_max,
            self.ws10m_range,
            self.qv2m,
            self.prectot,
            self.ps,
            self.month,
            self.day_of_year,
        ]
    }
}

pub trait Classifier: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction, ClassifierError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        /// Per-class sample counts (or fractions) at the leaf: `[no_fire, fire]`.
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Fraction of the fire class at the leaf reached by `x`.
    /// A split sends `x[feature] <= threshold` left.
    fn fire_fraction(&self, x: &[f64; 13]) -> Result<f64, ClassifierError> {
        let mut index = 0;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..self.nodes.len() {
            match &self.nodes[index] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[*feature] <= *threshold { *left } else { *right };
                }
                TreeNode::Leaf { value } => {
                    let total: f64 = value.iter().sum();
                    return Ok(value[1] / total);
                }
            }
        }
        Err(ClassifierError::InvalidModel("tree contains a cycle".to_string()))
    }

    fn validate(&self, tree: usize) -> Result<(), ClassifierError> {
        let invalid = |msg: String| ClassifierError::InvalidModel(format!("tree {}: {}", tree, msg));

        if self.nodes.is_empty() {
            return Err(invalid("no nodes".to_string()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= FEATURE_NAMES.len() {
                        return Err(invalid(format!("node {} splits on feature {}", i, feature)));
                    }
                    if *left >= self.nodes.len() || *right >= self.nodes.len() {
                        return Err(invalid(format!("node {} points outside the tree", i)));
                    }
                }
                TreeNode::Leaf { value } => {
                    let total: f64 = value.iter().sum();
                    if value.len() != 2 || total.is_nan() || total <= 0.0 {
                        return Err(invalid(format!("leaf {} has unusable class values", i)));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    pub feature_names: Vec<String>,
    pub trees: Vec<DecisionTree>,
}

/// Random forest exported to JSON. Probability is the mean fire fraction
/// over all trees; the label is `probability > 0.5`.
#[derive(Debug, Clone)]
pub struct ForestClassifier {
    model: ForestModel,
}

impl ForestClassifier {
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ClassifierError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let model: ForestModel = serde_json::from_str(&raw)?;
        let classifier = Self::from_model(model)?;
        tracing::info!(
            path = %path.display(),
            trees = classifier.model.trees.len(),
            "Loaded wildfire risk model"
        );
        Ok(classifier)
    }

    pub fn from_model(model: ForestModel) -> Result<Self, ClassifierError> {
        if model.feature_names.iter().map(String::as_str).ne(FEATURE_NAMES) {
            return Err(ClassifierError::FeatureMismatch {
                expected: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                found: model.feature_names,
            });
        }
        if model.trees.is_empty() {
            return Err(ClassifierError::InvalidModel("forest has no trees".to_string()));
        }
        for (i, tree) in model.trees.iter().enumerate() {
            tree.validate(i)?;
        }

        Ok(Self { model })
    }
}

impl Classifier for ForestClassifier {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction, ClassifierError> {
        let x = features.as_array();
        let mut sum = 0.0;
        for tree in &self.model.trees {
            sum += tree.fire_fraction(&x)?;
        }
        let probability = sum / self.model.trees.len() as f64;

        Ok(Prediction {
            high_risk: probability > 0.5,
            probability,
        })
    }
}
