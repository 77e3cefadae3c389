//! Analysis configuration
//!
//! Defaults mirror the study tooling: `time_seconds`/`heart_rate`/`breathing_rate`
//! log columns, a `filtered` output directory, DBSCAN with radius 1.0 and 500
//! minimum points, and a k-means++ search over 2..=9 clusters scored by
//! silhouette.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{AnalysisError, Result};

/// Default features for clustering
pub const DEFAULT_FEATURES: [&str; 3] = ["speed", "heart_rate", "breathing_rate"];

/// Column names and output placement of session logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFormat {
    pub time_column: String,
    pub heart_rate_column: String,
    pub breathing_rate_column: String,
    /// Subdirectory (next to the raw log) that receives filtered logs
    pub filtered_dir: String,
    /// Suffix appended to the file stem of a filtered log
    pub filtered_suffix: String,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self {
            time_column: "time_seconds".to_string(),
            heart_rate_column: "heart_rate".to_string(),
            breathing_rate_column: "breathing_rate".to_string(),
            filtered_dir: "filtered".to_string(),
            filtered_suffix: "_filtered".to_string(),
        }
    }
}

impl LogFormat {
    /// Columns where an exact zero means "sensor dropped out"
    pub fn sentinel_columns(&self) -> [&str; 2] {
        [self.heart_rate_column.as_str(), self.breathing_rate_column.as_str()]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Replace bounded zero-sentinel runs with interpolated values
    pub interpolate: bool,
    /// Largest per-field difference still treated as a repeated tick
    pub duplicate_tolerance: f64,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            interpolate: false,
            duplicate_tolerance: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbscanParams {
    /// Neighbourhood radius (Euclidean)
    pub radius: f64,
    /// Minimum neighbourhood size, the point itself included
    pub min_points: usize,
    /// Fail when every row ends up as noise
    pub require_cluster: bool,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self {
            radius: 1.0,
            min_points: 500,
            require_cluster: false,
        }
    }
}

impl DbscanParams {
    pub fn validate(&self) -> Result<()> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(AnalysisError::Config(format!(
                "radius must be a positive finite number, got {}",
                self.radius
            )));
        }
        if self.min_points == 0 {
            return Err(AnalysisError::Config(
                "min_points must be at least 1, got 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Internal validity metric used to rank candidate cluster counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityMetric {
    Silhouette,
    CalinskiHarabasz,
}

impl ValidityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidityMetric::Silhouette => "silhouette",
            ValidityMetric::CalinskiHarabasz => "calinski_harabasz",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KSearchParams {
    pub k_min: usize,
    pub k_max: usize,
    pub seed: u64,
    /// k-means++ restarts per candidate
    pub n_init: usize,
    pub max_iter: usize,
    /// Stop once no centroid moves further than this
    pub tolerance: f64,
    pub metric: ValidityMetric,
    pub parallel: bool,
    /// Worker threads for the parallel search
    pub workers: usize,
}

impl Default for KSearchParams {
    fn default() -> Self {
        Self {
            k_min: 2,
            k_max: 9,
            seed: 0,
            n_init: 4,
            max_iter: 300,
            tolerance: 1e-6,
            metric: ValidityMetric::Silhouette,
            parallel: false,
            workers: default_workers(),
        }
    }
}

impl KSearchParams {
    pub fn validate(&self) -> Result<()> {
        if self.k_min < 2 {
            return Err(AnalysisError::Config(format!(
                "k range must start at 2 or more, got {}",
                self.k_min
            )));
        }
        if self.k_max < self.k_min {
            return Err(AnalysisError::Config(format!(
                "k range is empty: {}..={}",
                self.k_min, self.k_max
            )));
        }
        if self.n_init == 0 || self.max_iter == 0 {
            return Err(AnalysisError::Config(
                "n_init and max_iter must be at least 1".to_string(),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(AnalysisError::Config(format!(
                "tolerance must be a non-negative finite number, got {}",
                self.tolerance
            )));
        }
        if self.parallel && self.workers == 0 {
            return Err(AnalysisError::Config(
                "parallel search needs at least one worker".to_string(),
            ));
        }
        Ok(())
    }

    /// Candidate cluster counts, capped at `n_rows` (no k above it can fit)
    pub fn candidates(&self, n_rows: usize) -> Vec<usize> {
        if self.k_min > n_rows {
            return Vec::new();
        }
        (self.k_min..=self.k_max.min(n_rows)).collect()
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Top-level configuration for one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub log_format: LogFormat,
    pub cleaner: CleanerConfig,
    pub features: Vec<String>,
    /// Z-score features before reduction and clustering
    pub standardize: bool,
    /// Principal components to keep; `None` skips reduction
    pub pca_components: Option<usize>,
    pub dbscan: DbscanParams,
    pub kmeans: KSearchParams,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            cleaner: CleanerConfig::default(),
            features: DEFAULT_FEATURES.iter().map(|f| f.to_string()).collect(),
            standardize: true,
            pca_components: None,
            dbscan: DbscanParams::default(),
            kmeans: KSearchParams::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check parameters that do not depend on the data
    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(AnalysisError::Config(
                "at least one feature column is required".to_string(),
            ));
        }
        if self.cleaner.duplicate_tolerance < 0.0 || !self.cleaner.duplicate_tolerance.is_finite() {
            return Err(AnalysisError::Config(format!(
                "duplicate tolerance must be a non-negative finite number, got {}",
                self.cleaner.duplicate_tolerance
            )));
        }
        if let Some(c) = self.pca_components {
            if c == 0 || c > self.features.len() {
                return Err(AnalysisError::Config(format!(
                    "PCA components must be in [1, {}], got {c}",
                    self.features.len()
                )));
            }
        }
        self.dbscan.validate()?;
        self.kmeans.validate()
    }
}
