use crate::evaluator::{ConsolidatedResult, RiskBatchEvaluator};
use crate::geometry::{to_feature_collection, RiskTag};
use crate::utils::write_atomic;
use crate::weather::CacheError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

const LAST_RUN_FILE: &str = "last_run.json";
const COUNTRY_FILE: &str = "us_map_data.geojson";

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("State cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("State cache serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Weather cache error: {0}")]
    Cache(#[from] CacheError),
}

#[derive(Debug, Serialize, Deserialize)]
struct LastRun {
    date: NaiveDate,
}

#[derive(Debug, Default)]
pub struct RefreshSummary {
    pub full: bool,
    pub evaluated: Vec<String>,
    pub reused: Vec<String>,
    pub failed: Vec<String>,
    pub counts: BTreeMap<RiskTag, usize>,
    /// `"County, ST"` for every row left without a tag.
    pub unassessed: Vec<String>,
}

/// A full refresh is due when there is no record of one or the last one is
/// at least `interval_days` old.
pub fn is_stale(last_run: Option<NaiveDate>, today: NaiveDate, interval_days: i64) -> bool {
    match last_run {
        Some(last) => (today - last).num_days() >= interval_days,
        None => true,
    }
}

/// Keeps the per-state result files and the country map up to date.
pub struct StateRefresher {
    evaluator: RiskBatchEvaluator,
    state_dir: PathBuf,
    interval_days: i64,
    states: Vec<String>,
}

impl StateRefresher {
    pub fn new(
        evaluator: RiskBatchEvaluator,
        state_dir: impl Into<PathBuf>,
        interval_days: i64,
        states: Vec<String>,
    ) -> Self {
        Self {
            evaluator,
            state_dir: state_dir.into(),
            interval_days,
            states,
        }
    }

    pub fn state_file(&self, abbrev: &str) -> PathBuf {
        self.state_dir.join(format!("{}_map_data.json", abbrev))
    }

    pub fn country_file(&self) -> PathBuf {
        self.state_dir.join(COUNTRY_FILE)
    }

    /// Re-evaluates everything when the last full refresh is stale, otherwise
    /// only the states without a result file. A failing state is logged and
    /// skipped; it is picked up again by the next run.
    pub async fn run(&self, today: NaiveDate) -> Result<RefreshSummary, RefreshError> {
        let last_run = self.read_last_run().await?;
        let full = is_stale(last_run, today, self.interval_days);
        let mut summary = RefreshSummary {
            full,
            ..Default::default()
        };

        if full {
            info!(?last_run, %today, "Starting full refresh");
            self.evaluator.cache().purge().await?;
        } else {
            info!(?last_run, %today, "State data is fresh, evaluating missing states only");
        }

        let mut results = Vec::with_capacity(self.states.len());
        for state in &self.states {
            let path = self.state_file(state);

            if !full {
                if let Some(result) = load_state_file(&path).await {
                    summary.reused.push(state.clone());
                    results.push(result);
                    continue;
                }
            }

            match self.evaluator.for_area(state).await {
                Ok(result) => {
                    write_atomic(&path, &serde_json::to_vec(&result)?).await?;
                    info!(state = %state, path = %path.display(), "State map data written");
                    summary.evaluated.push(state.clone());
                    results.push(result);
                }
                Err(e) => {
                    error!(state = %state, error = %e, "State evaluation failed");
                    summary.failed.push(state.clone());
                }
            }
        }

        let country = to_feature_collection(results.iter().flat_map(|r| r.rows.iter()));
        write_atomic(&self.country_file(), &serde_json::to_vec(&country)?).await?;

        if full {
            self.write_last_run(today).await?;
        }

        for result in &results {
            for (tag, count) in result.tag_counts() {
                *summary.counts.entry(tag).or_insert(0) += count;
            }
            summary.unassessed.extend(
                result
                    .unassessed()
                    .into_iter()
                    .map(|name| format!("{}, {}", name, result.area.abbrev)),
            );
        }

        let sentinels: usize = summary
            .counts
            .iter()
            .filter(|(tag, _)| tag.is_sentinel())
            .map(|(_, count)| count)
            .sum();

        info!(
            full,
            sentinels,
            evaluated = summary.evaluated.len(),
            reused = summary.reused.len(),
            failed = summary.failed.len(),
            counts = ?summary.counts,
            "Refresh complete"
        );
        if !summary.unassessed.is_empty() {
            warn!(
                count = summary.unassessed.len(),
                counties = ?summary.unassessed,
                "Counties left unassessed"
            );
        }

        Ok(summary)
    }

    async fn read_last_run(&self) -> Result<Option<NaiveDate>, RefreshError> {
        let path = self.state_dir.join(LAST_RUN_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<LastRun>(&raw) {
            Ok(last) => Ok(Some(last.date)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable last-run record");
                Ok(None)
            }
        }
    }

    async fn write_last_run(&self, today: NaiveDate) -> Result<(), RefreshError> {
        let path = self.state_dir.join(LAST_RUN_FILE);
        write_atomic(&path, &serde_json::to_vec(&LastRun { date: today })?).await?;
        Ok(())
    }
}

async fn load_state_file(path: &Path) -> Option<ConsolidatedResult> {
    let raw = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&raw) {
        Ok(result) => Some(result),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Discarding unreadable state map data");
            None
        }
    }
}
