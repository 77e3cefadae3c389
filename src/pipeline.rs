//! Pipeline orchestration
//!
//! Two entry points:
//! - cleaning: raw log → [`Cleaner`] → filtered log on disk
//! - clustering: filtered sessions → [`FeatureMatrixBuilder`] → standardize
//!   (optional) → [`Pca`] (optional) → [`ClusterEngine`] → [`Reporter`]
//!
//! Session selection happens before either entry point: callers pass the
//! resolved file paths or sessions explicitly.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::cleaner::Cleaner;
use crate::cluster::{Algorithm, ClusterEngine};
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::features::FeatureMatrixBuilder;
use crate::reducer::Pca;
use crate::report::{ClusterReport, Reporter};
use crate::store::LogStore;
use crate::types::{ClusterAssignment, FeatureMatrix, FilteredSession, ReducedMatrix};

/// A cleaned log and where it was written
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub source: PathBuf,
    pub output: PathBuf,
    pub filtered: FilteredSession,
}

fn clean_in_memory(path: &Path, config: &AnalysisConfig) -> Result<CleanOutcome> {
    let session = LogStore::load(path, &config.log_format)?;
    let filtered = Cleaner::clean_with(&session, &config.cleaner, &config.log_format)?;
    Ok(CleanOutcome {
        source: path.to_path_buf(),
        output: LogStore::filtered_path(path, &config.log_format),
        filtered,
    })
}

/// Load, clean and write one raw log into the filtered location.
///
/// # Example
/// ```ignore
/// let outcome = clean_log(Path::new("logs/data_log_ana_night_05-14_1032.csv"), &config)?;
/// println!("{} rows -> {}", outcome.filtered.len(), outcome.output.display());
/// ```
pub fn clean_log(path: &Path, config: &AnalysisConfig) -> Result<CleanOutcome> {
    let outcome = clean_in_memory(path, config)?;
    LogStore::write_filtered(&outcome.filtered.session, &config.log_format, &outcome.source)?;
    info!(
        source = %outcome.source.display(),
        output = %outcome.output.display(),
        kept = outcome.filtered.len(),
        dropped = outcome.filtered.summary.dropped_duplicates,
        "cleaned log"
    );
    Ok(outcome)
}

/// Clean many logs. Every log is cleaned before anything is written, so a
/// failure on any input leaves no new output behind.
pub fn clean_logs(paths: &[PathBuf], config: &AnalysisConfig) -> Result<Vec<CleanOutcome>> {
    let outcomes = paths
        .iter()
        .map(|p| clean_in_memory(p, config))
        .collect::<Result<Vec<_>>>()?;
    for outcome in &outcomes {
        LogStore::write_filtered(&outcome.filtered.session, &config.log_format, &outcome.source)?;
    }
    info!(logs = outcomes.len(), "cleaned logs");
    Ok(outcomes)
}

/// Load already-filtered logs for clustering.
///
/// Cleaning is idempotent, so passing them through the cleaner again (without
/// interpolation) only restores the filtered-session invariants.
pub fn load_filtered(paths: &[PathBuf], config: &AnalysisConfig) -> Result<Vec<FilteredSession>> {
    let cleaner = crate::config::CleanerConfig {
        interpolate: false,
        ..config.cleaner.clone()
    };
    paths
        .iter()
        .map(|p| {
            let session = LogStore::load(p, &config.log_format)?;
            Cleaner::clean_with(&session, &cleaner, &config.log_format)
        })
        .collect()
}

/// Everything a clustering run produced
#[derive(Debug, Clone)]
pub struct ClusterRun {
    /// Matrix as built from the sessions
    pub features: FeatureMatrix,
    /// Matrix the algorithm actually saw (standardized and/or reduced)
    pub clustered: FeatureMatrix,
    pub reduced: Option<ReducedMatrix>,
    pub assignment: ClusterAssignment,
    pub report: ClusterReport,
}

/// Feature selection, preprocessing, clustering and reporting for one run
pub struct ClusterPipeline {
    config: AnalysisConfig,
    algorithm: Algorithm,
    reporter: Reporter,
}

impl ClusterPipeline {
    /// Create a pipeline; configuration is validated up front
    pub fn new(config: AnalysisConfig, algorithm: Algorithm) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            algorithm,
            reporter: Reporter::new(),
        })
    }

    /// Use a specific reporter (and therefore run id)
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    /// Cluster the given sessions
    pub fn run(&self, sessions: &[FilteredSession]) -> Result<ClusterRun> {
        let features = FeatureMatrixBuilder::build(sessions, &self.config.features)?;

        let prepared = if self.config.standardize {
            features.standardize()
        } else {
            features.clone()
        };

        let (clustered, reduced) = match self.config.pca_components {
            Some(c) => {
                let reduced = Pca::reduce(&prepared, c)?;
                (reduced.matrix.clone(), Some(reduced))
            }
            None => (prepared, None),
        };

        let assignment = ClusterEngine::cluster(&clustered, &self.algorithm)?;
        let mut report = self.reporter.report(&features, &assignment)?;
        report.parameters = Some(self.algorithm.describe());

        info!(
            run_id = %report.run_id,
            sessions = sessions.len(),
            rows = features.n_rows(),
            clusters = assignment.n_clusters,
            "cluster run finished"
        );

        Ok(ClusterRun {
            features,
            clustered,
            reduced,
            assignment,
            report,
        })
    }
}
