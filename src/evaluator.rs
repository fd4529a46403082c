use crate::classifier::{Classifier, ClassifierError, FeatureVector, Prediction};
use crate::geocoding::{standardize_county_name, AreaContext, CountyLookup, Geocoder, Region};
use crate::geometry::{GeometryRow, GeometryTable, NameIndex, RiskTag};
use crate::weather::types::Coordinates;
use crate::weather::{CacheError, WeatherCache};
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum EvaluateError {
    #[error("Unknown state: {0}")]
    UnknownArea(String),
    #[error("No county geometry for {0}")]
    NoGeometry(String),
    #[error("Weather lookup failed: {0}")]
    Weather(#[from] CacheError),
    #[error("Prediction failed: {0}")]
    Classifier(#[from] ClassifierError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegionOutcome {
    Assessed { tag: RiskTag, probability: f64 },
    Unresolved,
    Failed { reason: String },
}

impl RegionOutcome {
    pub fn tag(&self) -> RiskTag {
        match self {
            RegionOutcome::Assessed { tag, .. } => *tag,
            RegionOutcome::Unresolved => RiskTag::Unresolved,
            RegionOutcome::Failed { .. } => RiskTag::Failed,
        }
    }
}

/// How a region's outcome landed on the geometry rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    Rows(usize),
    NotFound,
    /// Several rows share the name; they are tagged `Ambiguous` instead of
    /// receiving the outcome.
    Ambiguous(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionReport {
    pub region: Region,
    pub pass: u8,
    pub outcome: RegionOutcome,
    pub matched: MatchResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedResult {
    pub area: AreaContext,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<GeometryRow>,
    pub regions: Vec<RegionReport>,
}

impl ConsolidatedResult {
    pub fn tag_counts(&self) -> BTreeMap<RiskTag, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.tag).or_insert(0) += 1;
        }
        counts
    }

    pub fn unassessed(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter(|row| row.tag == RiskTag::Unassessed)
            .map(|row| row.name.as_str())
            .collect()
    }
}

/// Evaluates every county of a state concurrently and merges the outcomes
/// onto the state's geometry rows.
pub struct RiskBatchEvaluator {
    geocoder: Arc<dyn Geocoder>,
    cache: Arc<WeatherCache>,
    classifier: Arc<dyn Classifier>,
    counties: Arc<CountyLookup>,
    geometry: Arc<GeometryTable>,
    worker_count: usize,
    as_of: Option<NaiveDate>,
}

impl RiskBatchEvaluator {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        cache: Arc<WeatherCache>,
        classifier: Arc<dyn Classifier>,
        counties: Arc<CountyLookup>,
        geometry: Arc<GeometryTable>,
    ) -> Self {
        Self {
            geocoder,
            cache,
            classifier,
            counties,
            geometry,
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            as_of: None,
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    /// Pin the date used for the calendar features. Defaults to today (UTC).
    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn cache(&self) -> &Arc<WeatherCache> {
        &self.cache
    }

    /// Evaluate every county the county table lists for `state`.
    pub async fn for_area(&self, state: &str) -> Result<ConsolidatedResult, EvaluateError> {
        let area = AreaContext::lookup(state)
            .ok_or_else(|| EvaluateError::UnknownArea(state.to_string()))?;

        let rows = self.geometry.rows_for(&area.fips);
        if rows.is_empty() {
            return Err(EvaluateError::NoGeometry(area.abbrev));
        }

        let names: BTreeSet<String> = self
            .counties
            .counties_in(&area.abbrev)
            .iter()
            .map(|county| standardize_county_name(county))
            .filter(|name| !name.is_empty())
            .collect();
        let regions = names
            .into_iter()
            .map(|name| Region::new(name, area.abbrev.clone()))
            .collect();

        Ok(self.evaluate_batch(regions, &area, rows).await)
    }

    /// Never fails: every region ends up with a report, and errors become
    /// sentinel tags on that region's rows only.
    pub async fn evaluate_batch(
        &self,
        regions: Vec<Region>,
        area: &AreaContext,
        mut rows: Vec<GeometryRow>,
    ) -> ConsolidatedResult {
        let as_of = self.as_of.unwrap_or_else(|| Utc::now().date_naive());
        let index = NameIndex::build(&rows);

        info!(
            area = %area.abbrev,
            regions = regions.len(),
            rows = rows.len(),
            workers = self.worker_count,
            "Evaluating counties"
        );

        let first = self.evaluate_all(regions, as_of).await;
        let mut reports = consolidate(&mut rows, &index, first, 1);

        let retry = retry_candidates(&rows, &index, &area.abbrev);
        if !retry.is_empty() {
            info!(area = %area.abbrev, count = retry.len(), "Retrying unassessed counties");
            let second = self.evaluate_all(retry, as_of).await;
            reports.extend(consolidate(&mut rows, &index, second, 2));
        }

        ConsolidatedResult {
            area: area.clone(),
            generated_at: Utc::now(),
            rows,
            regions: reports,
        }
    }

    async fn evaluate_all(
        &self,
        regions: Vec<Region>,
        as_of: NaiveDate,
    ) -> Vec<(Region, RegionOutcome)> {
        stream::iter(regions)
            .map(|region| async move {
                let outcome = self.evaluate_region(&region, as_of).await;
                (region, outcome)
            })
            .buffer_unordered(self.worker_count)
            .collect()
            .await
    }

    async fn evaluate_region(&self, region: &Region, as_of: NaiveDate) -> RegionOutcome {
        let Some(coords) = self.geocoder.resolve(region).await else {
            warn!(region = %region.name, area = %region.area, "Could not resolve county coordinates");
            return RegionOutcome::Unresolved;
        };

        match self.assess(coords, as_of).await {
            Ok(prediction) => {
                debug!(
                    region = %region.name,
                    area = %region.area,
                    probability = prediction.probability,
                    high_risk = prediction.high_risk,
                    "County assessed"
                );
                RegionOutcome::Assessed {
                    tag: RiskTag::from_label(prediction.high_risk),
                    probability: prediction.probability,
                }
            }
            Err(e) => {
                error!(region = %region.name, area = %region.area, error = %e, "County evaluation failed");
                RegionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn assess(&self, coords: Coordinates, as_of: NaiveDate) -> Result<Prediction, EvaluateError> {
        let series = self.cache.get(coords).await?;
        debug!(lat = coords.lat, lon = coords.lon, days = series.len(), "Weather series loaded");
        let features = FeatureVector::from_averages(&series.averages(), as_of)?;
        Ok(self.classifier.predict(&features)?)
    }
}

/// Apply outcomes to rows in region order, so the result does not depend on
/// the order tasks finished in.
fn consolidate(
    rows: &mut [GeometryRow],
    index: &NameIndex,
    mut evaluations: Vec<(Region, RegionOutcome)>,
    pass: u8,
) -> Vec<RegionReport> {
    evaluations.sort_by(|a, b| a.0.cmp(&b.0));

    evaluations
        .into_iter()
        .map(|(region, outcome)| {
            let matched = match index.lookup(&region.name) {
                [] => {
                    debug!(region = %region.name, area = %region.area, pass, "No geometry row for county");
                    MatchResult::NotFound
                }
                [i] => {
                    rows[*i].tag = outcome.tag();
                    MatchResult::Rows(1)
                }
                many => {
                    warn!(
                        region = %region.name,
                        area = %region.area,
                        rows = many.len(),
                        "County name matches several geometry rows, flagging them ambiguous"
                    );
                    for &i in many {
                        rows[i].tag = RiskTag::Ambiguous;
                    }
                    MatchResult::Ambiguous(many.len())
                }
            };

            RegionReport {
                region,
                pass,
                outcome,
                matched,
            }
        })
        .collect()
}

/// Names of rows nothing was applied to, excluding names that can never
/// match a single row.
fn retry_candidates(rows: &[GeometryRow], index: &NameIndex, area: &str) -> Vec<Region> {
    let names: BTreeSet<&str> = rows
        .iter()
        .filter(|row| row.tag == RiskTag::Unassessed && !row.normalized_name.is_empty())
        .map(|row| row.normalized_name.as_str())
        .filter(|name| index.lookup(name).len() == 1)
        .collect();

    names
        .into_iter()
        .map(|name| Region::new(name, area))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tests::{feature, table};
    use crate::weather::mock::MockWeatherFetch;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct MapGeocoder {
        known: HashMap<String, Coordinates>,
    }

    #[async_trait]
    impl Geocoder for MapGeocoder {
        async fn resolve(&self, region: &Region) -> Option<Coordinates> {
            self.known.get(&region.name).copied()
        }
    }

    /// High risk when the mean daily maximum exceeds 30 degrees, which the
    /// mock weather produces for latitudes above 50.
    struct ThresholdClassifier {
        fail_above_t2m_min: f64,
    }

    impl Classifier for ThresholdClassifier {
        fn predict(&self, features: &FeatureVector) -> Result<Prediction, ClassifierError> {
            if features.t2m_min > self.fail_above_t2m_min {
                return Err(ClassifierError::InvalidModel("injected failure".to_string()));
            }
            let high_risk = features.t2m_max > 30.0;
            Ok(Prediction {
                high_risk,
                probability: if high_risk { 0.9 } else { 0.1 },
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        evaluator: RiskBatchEvaluator,
        fetcher: Arc<MockWeatherFetch>,
    }

    fn known() -> HashMap<String, Coordinates> {
        [
            ("Lake", Coordinates::new(60.0, -120.0)),
            ("Marin", Coordinates::new(20.0, -120.0)),
            ("Modoc", Coordinates::new(70.0, -120.0)),
            ("Saint Lucie", Coordinates::new(20.0, -80.0)),
            ("Fairfax", Coordinates::new(20.0, -77.0)),
            // Mock weather gives a mean daily minimum near 11 for this longitude.
            ("Inyo", Coordinates::new(20.0, 100.0)),
        ]
        .into_iter()
        .map(|(name, coords)| (name.to_string(), coords))
        .collect()
    }

    fn fixture(fetcher: MockWeatherFetch) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(fetcher);
        let cache = Arc::new(WeatherCache::new(
            dir.path().join("weather.json"),
            fetcher.clone(),
        ));
        let evaluator = RiskBatchEvaluator::new(
            Arc::new(MapGeocoder { known: known() }),
            cache,
            Arc::new(ThresholdClassifier {
                fail_above_t2m_min: 10.5,
            }),
            Arc::new(CountyLookup::default()),
            Arc::new(GeometryTable::default()),
        )
        .with_worker_count(3)
        .with_as_of(NaiveDate::from_ymd_opt(2026, 8, 15).unwrap());

        Fixture {
            _dir: dir,
            evaluator,
            fetcher,
        }
    }

    fn ca() -> AreaContext {
        AreaContext::lookup("CA").unwrap()
    }

    fn ca_rows(names: &[&str]) -> Vec<GeometryRow> {
        let features = names
            .iter()
            .enumerate()
            .map(|(i, name)| feature("06", &format!("{:03}", i + 1), name))
            .collect();
        table(features).rows_for("06")
    }

    fn regions(names: &[&str]) -> Vec<Region> {
        names.iter().map(|name| Region::new(*name, "CA")).collect()
    }

    fn tag_of(result: &ConsolidatedResult, name: &str) -> RiskTag {
        result
            .rows
            .iter()
            .find(|row| row.name == name)
            .map(|row| row.tag)
            .unwrap()
    }

    #[tokio::test]
    async fn test_batch_tags_every_region() {
        let f = fixture(MockWeatherFetch::new());
        let rows = ca_rows(&["Lake", "Marin", "Unknown"]);

        let result = f
            .evaluator
            .evaluate_batch(regions(&["Lake", "Marin", "Unknown", "Lake"]), &ca(), rows)
            .await;

        let first_pass: Vec<_> = result.regions.iter().filter(|r| r.pass == 1).collect();
        assert_eq!(first_pass.len(), 4);
        assert_eq!(tag_of(&result, "Lake"), RiskTag::HighRisk);
        assert_eq!(tag_of(&result, "Marin"), RiskTag::LowRisk);
        assert_eq!(tag_of(&result, "Unknown"), RiskTag::Unresolved);
        // Duplicate input regions share one fetch through the cache.
        assert_eq!(f.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_only_affects_its_region() {
        let f = fixture(MockWeatherFetch::new().failing_on(Coordinates::new(60.0, -120.0)));
        let rows = ca_rows(&["Lake", "Marin", "Modoc"]);

        let result = f
            .evaluator
            .evaluate_batch(regions(&["Lake", "Marin", "Modoc"]), &ca(), rows)
            .await;

        assert_eq!(tag_of(&result, "Lake"), RiskTag::Failed);
        assert_eq!(tag_of(&result, "Marin"), RiskTag::LowRisk);
        assert_eq!(tag_of(&result, "Modoc"), RiskTag::HighRisk);

        let lake = result
            .regions
            .iter()
            .find(|r| r.region.name == "Lake" && r.pass == 1)
            .unwrap();
        assert!(matches!(&lake.outcome, RegionOutcome::Failed { reason } if reason.contains("mock failure")));
    }

    #[tokio::test]
    async fn test_classifier_failure_is_sentinel() {
        let f = fixture(MockWeatherFetch::new());
        let rows = ca_rows(&["Inyo", "Marin"]);

        let result = f
            .evaluator
            .evaluate_batch(regions(&["Inyo", "Marin"]), &ca(), rows)
            .await;

        assert_eq!(tag_of(&result, "Inyo"), RiskTag::Failed);
        assert_eq!(tag_of(&result, "Marin"), RiskTag::LowRisk);
    }

    #[tokio::test]
    async fn test_input_order_does_not_change_result() {
        let names = ["Lake", "Marin", "Modoc", "Unknown"];
        let mut reversed = names;
        reversed.reverse();

        let f = fixture(MockWeatherFetch::new());
        let forward = f
            .evaluator
            .evaluate_batch(regions(&names), &ca(), ca_rows(&names))
            .await;
        let backward = f
            .evaluator
            .evaluate_batch(regions(&reversed), &ca(), ca_rows(&names))
            .await;

        assert_eq!(forward.rows, backward.rows);
        assert_eq!(forward.regions, backward.regions);
    }

    #[tokio::test]
    async fn test_retry_pass_tags_unmatched_rows() {
        let f = fixture(MockWeatherFetch::new());
        // The county table spells it "St. Lucie"; the geometry says "Saint Lucie".
        let rows = ca_rows(&["Lake", "Saint Lucie", "Nowhere"]);

        let result = f
            .evaluator
            .evaluate_batch(regions(&["Lake", "St. Lucie"]), &ca(), rows)
            .await;

        assert_eq!(tag_of(&result, "Saint Lucie"), RiskTag::LowRisk);
        // Retried, but no source can place it.
        assert_eq!(tag_of(&result, "Nowhere"), RiskTag::Unresolved);

        let st_lucie = result
            .regions
            .iter()
            .find(|r| r.region.name == "St. Lucie")
            .unwrap();
        assert_eq!(st_lucie.matched, MatchResult::NotFound);

        let retried: Vec<&str> = result
            .regions
            .iter()
            .filter(|r| r.pass == 2)
            .map(|r| r.region.name.as_str())
            .collect();
        assert_eq!(retried, vec!["Nowhere", "Saint Lucie"]);
    }

    #[tokio::test]
    async fn test_ambiguous_names_are_flagged_not_applied() {
        let f = fixture(MockWeatherFetch::new());
        let rows = ca_rows(&["Fairfax", "Fairfax city", "Marin"]);

        let result = f
            .evaluator
            .evaluate_batch(regions(&["Fairfax", "Marin"]), &ca(), rows)
            .await;

        assert_eq!(tag_of(&result, "Fairfax"), RiskTag::Ambiguous);
        assert_eq!(tag_of(&result, "Fairfax city"), RiskTag::Ambiguous);
        assert!(!matches!(
            tag_of(&result, "Marin"),
            RiskTag::Ambiguous | RiskTag::Unassessed
        ));
        assert!(result.unassessed().is_empty());
        assert_eq!(result.tag_counts().get(&RiskTag::Ambiguous), Some(&2));

        let fairfax = result
            .regions
            .iter()
            .find(|r| r.region.name == "Fairfax")
            .unwrap();
        assert_eq!(fairfax.matched, MatchResult::Ambiguous(2));
        assert!(result.regions.iter().all(|r| r.pass == 1));
    }

    #[tokio::test]
    async fn test_for_area_enumerates_counties() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockWeatherFetch::new());
        let counties = CountyLookup::from_reader(
            "county,state_id,lat,lng\nLake County,CA,60.0,-120.0\nMarin,CA,20.0,-120.0\nLake,OR,42.8,-120.4\n"
                .as_bytes(),
        )
        .unwrap();
        let geometry = table(vec![
            feature("06", "033", "Lake"),
            feature("06", "041", "Marin"),
            feature("41", "037", "Lake"),
        ]);

        let evaluator = RiskBatchEvaluator::new(
            Arc::new(MapGeocoder { known: known() }),
            Arc::new(WeatherCache::new(dir.path().join("weather.json"), fetcher)),
            Arc::new(ThresholdClassifier {
                fail_above_t2m_min: f64::INFINITY,
            }),
            Arc::new(counties),
            Arc::new(geometry),
        );

        let result = evaluator.for_area("California").await.unwrap();
        assert_eq!(result.area.fips, "06");
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.regions.len(), 2);

        let counts = result.tag_counts();
        assert_eq!(counts.get(&RiskTag::HighRisk), Some(&1));
        assert_eq!(counts.get(&RiskTag::LowRisk), Some(&1));

        assert!(matches!(
            evaluator.for_area("Atlantis").await,
            Err(EvaluateError::UnknownArea(_))
        ));
        assert!(matches!(
            evaluator.for_area("TX").await,
            Err(EvaluateError::NoGeometry(_))
        ));
    }
}
