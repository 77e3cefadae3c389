//! Core types for the drivestate pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw sessions, filtered sessions, feature matrices, and cluster
//! assignments.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::path::PathBuf;

use crate::error::{AnalysisError, Result};

/// Scenario names used by the driving study
pub const KNOWN_SCENARIOS: [&str; 5] = ["default", "night", "overspeeding", "distracted", "congestion"];

/// Identity of one logged drive, derived from its file name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Full file stem (e.g. `data_log_ana_night_05-14_1032_filtered`)
    pub name: String,
    pub participant: Option<String>,
    pub scenario: Option<String>,
    /// Recording label, `MM-DD_HHMM` in the simulator's naming scheme
    pub run: Option<String>,
}

impl SessionKey {
    /// Parse a session key from a log file stem
    pub fn from_stem(stem: &str) -> Self {
        let body = stem.strip_prefix("data_log_").unwrap_or(stem);
        let body = body.strip_suffix("_filtered").unwrap_or(body);
        let mut tokens: Vec<&str> = body.split('_').filter(|t| !t.is_empty()).collect();

        let mut run = None;
        if tokens.len() >= 2 {
            let date = tokens[tokens.len() - 2];
            let time = tokens[tokens.len() - 1];
            if is_month_day(date) && is_hour_minute(time) {
                run = Some(format!("{date}_{time}"));
                tokens.truncate(tokens.len() - 2);
            }
        }

        let mut scenario = None;
        if let Some(pos) = tokens
            .iter()
            .position(|t| KNOWN_SCENARIOS.contains(&t.to_ascii_lowercase().as_str()))
        {
            scenario = Some(tokens.remove(pos).to_ascii_lowercase());
        }

        let participant = if tokens.is_empty() {
            None
        } else {
            Some(tokens.join("_"))
        };

        Self {
            name: stem.to_string(),
            participant,
            scenario,
            run,
        }
    }

    /// Substring match against the file name, as used for session selection
    pub fn matches(&self, pattern: &str) -> bool {
        self.name.contains(pattern)
    }
}

fn is_month_day(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() == 5
        && bytes[2] == b'-'
        && bytes[..2].iter().all(u8::is_ascii_digit)
        && bytes[3..].iter().all(u8::is_ascii_digit)
}

fn is_hour_minute(token: &str) -> bool {
    token.len() == 4 && token.bytes().all(|b| b.is_ascii_digit())
}

/// One timestamped observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Elapsed time (seconds)
    pub time: f64,
    /// Numeric field values, in `Session::fields` order
    pub values: Vec<f64>,
    /// Text columns (e.g. wall-clock time strings), in `Session::annotation_columns` order
    pub annotations: Vec<String>,
}

/// Position of a column in the on-disk header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnSlot {
    Time,
    Field(usize),
    Annotation(usize),
}

/// An ordered, immutable sequence of records from one log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    /// File the session was read from, if any
    pub source: Option<PathBuf>,
    pub time_column: String,
    /// Numeric field names (time column excluded)
    pub fields: Vec<String>,
    pub annotation_columns: Vec<String>,
    /// Header order for writing the session back out
    pub layout: Vec<ColumnSlot>,
    pub records: Vec<LogRecord>,
}

impl Session {
    /// Build an in-memory session with numeric fields only.
    ///
    /// Fails with a data error when a record's width does not match `fields`
    /// or timestamps decrease.
    pub fn new(
        key: SessionKey,
        time_column: &str,
        fields: Vec<String>,
        records: Vec<LogRecord>,
    ) -> Result<Self> {
        let mut layout = vec![ColumnSlot::Time];
        layout.extend((0..fields.len()).map(ColumnSlot::Field));

        for (i, record) in records.iter().enumerate() {
            if record.values.len() != fields.len() || !record.annotations.is_empty() {
                return Err(AnalysisError::Data(format!(
                    "record {i} of '{}' has {} values, expected {}",
                    key.name,
                    record.values.len(),
                    fields.len()
                )));
            }
        }
        check_monotonic(&key.name, &records)?;

        Ok(Self {
            key,
            source: None,
            time_column: time_column.to_string(),
            fields,
            annotation_columns: Vec::new(),
            layout,
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    /// Whether a column (numeric field or time column) can be selected as a feature
    pub fn has_column(&self, name: &str) -> bool {
        name == self.time_column || self.field_index(name).is_some()
    }

    /// Values of one numeric column, including the time column
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        if name == self.time_column {
            return Some(self.records.iter().map(|r| r.time).collect());
        }
        let idx = self.field_index(name)?;
        Some(self.records.iter().map(|r| r.values[idx]).collect())
    }

    /// Copy of this session with a new record list and the same schema
    pub(crate) fn with_records(&self, records: Vec<LogRecord>) -> Self {
        Self {
            key: self.key.clone(),
            source: self.source.clone(),
            time_column: self.time_column.clone(),
            fields: self.fields.clone(),
            annotation_columns: self.annotation_columns.clone(),
            layout: self.layout.clone(),
            records,
        }
    }
}

pub(crate) fn check_monotonic(name: &str, records: &[LogRecord]) -> Result<()> {
    for (i, pair) in records.windows(2).enumerate() {
        if pair[1].time < pair[0].time {
            return Err(AnalysisError::Data(format!(
                "timestamps in '{name}' decrease at record {} ({} after {})",
                i + 1,
                pair[1].time,
                pair[0].time
            )));
        }
    }
    Ok(())
}

/// Which session boundary an uncorrected zero-sentinel run touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapEdge {
    Leading,
    Trailing,
    /// The column is zero for the entire session
    Entire,
    /// Bounded on a side by a missing (NaN) value
    MissingNeighbor,
}

/// A zero-sentinel run that was left unmodified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelGap {
    pub column: String,
    pub start_time: f64,
    pub end_time: f64,
    pub samples: usize,
    pub edge: GapEdge,
}

/// What the cleaner did to a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningSummary {
    pub source_rows: usize,
    pub dropped_duplicates: usize,
    pub interpolated_runs: usize,
    pub interpolated_values: usize,
    pub uncorrected_gaps: Vec<SentinelGap>,
}

/// A session after duplicate elimination and optional sentinel interpolation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredSession {
    pub session: Session,
    pub summary: CleaningSummary,
}

impl FilteredSession {
    pub fn key(&self) -> &SessionKey {
        &self.session.key
    }

    pub fn len(&self) -> usize {
        self.session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_empty()
    }
}

/// Where a feature-matrix row came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RowProvenance {
    /// Index into `FeatureMatrix::sessions`
    pub session: usize,
    /// Record index within the filtered session
    pub record: usize,
    /// Original elapsed time of the record
    pub time: f64,
}

/// Dense row-major matrix of selected features pooled across sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    /// Session names, indexed by `RowProvenance::session`
    pub sessions: Vec<String>,
    pub provenance: Vec<RowProvenance>,
    /// Rows dropped because a selected value was missing
    pub skipped_rows: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    /// Assemble a matrix from row-major data.
    pub fn from_parts(
        columns: Vec<String>,
        sessions: Vec<String>,
        data: Vec<f64>,
        provenance: Vec<RowProvenance>,
    ) -> Result<Self> {
        if columns.is_empty() {
            return Err(AnalysisError::Config(
                "a feature matrix needs at least one column".to_string(),
            ));
        }
        if data.len() != provenance.len() * columns.len() {
            return Err(AnalysisError::Data(format!(
                "matrix data has {} values, expected {} rows x {} columns",
                data.len(),
                provenance.len(),
                columns.len()
            )));
        }
        Ok(Self {
            columns,
            sessions,
            provenance,
            skipped_rows: 0,
            data,
        })
    }

    /// Build an anonymous matrix from rows, mostly useful for synthetic data.
    pub fn from_rows(columns: &[&str], rows: &[Vec<f64>]) -> Result<Self> {
        let width = columns.len();
        let mut data = Vec::with_capacity(rows.len() * width);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(AnalysisError::Data(format!(
                    "row {i} has {} values, expected {width}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        let provenance = (0..rows.len())
            .map(|i| RowProvenance {
                session: 0,
                record: i,
                time: i as f64,
            })
            .collect();
        Self::from_parts(
            columns.iter().map(|c| c.to_string()).collect(),
            vec!["synthetic".to_string()],
            data,
            provenance,
        )
    }

    pub fn n_rows(&self) -> usize {
        self.provenance.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.provenance.is_empty()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let w = self.columns.len();
        &self.data[i * w..(i + 1) * w]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.columns.len())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Session name a row came from
    pub fn session_of(&self, row: usize) -> &str {
        &self.sessions[self.provenance[row].session]
    }

    /// Per-column means
    pub fn column_means(&self) -> Vec<f64> {
        let mut means = vec![0.0; self.n_cols()];
        if self.is_empty() {
            return means;
        }
        for row in self.rows() {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        let n = self.n_rows() as f64;
        means.iter_mut().for_each(|m| *m /= n);
        means
    }

    /// Z-scored copy (population standard deviation).
    ///
    /// Columns with zero variance are only centred.
    pub fn standardize(&self) -> FeatureMatrix {
        let means = self.column_means();
        let n = self.n_rows().max(1) as f64;
        let mut stds = vec![0.0; self.n_cols()];
        for row in self.rows() {
            for (j, v) in row.iter().enumerate() {
                stds[j] += (v - means[j]).powi(2);
            }
        }
        for s in stds.iter_mut() {
            *s = (*s / n).sqrt();
        }

        let data = self
            .rows()
            .flat_map(|row| {
                row.iter().enumerate().map(|(j, v)| {
                    let centred = v - means[j];
                    if stds[j] > f64::EPSILON {
                        centred / stds[j]
                    } else {
                        centred
                    }
                })
            })
            .collect();

        FeatureMatrix {
            columns: self.columns.clone(),
            sessions: self.sessions.clone(),
            provenance: self.provenance.clone(),
            skipped_rows: self.skipped_rows,
            data,
        }
    }
}

/// Principal-component projection of a feature matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedMatrix {
    /// Projected rows; columns are named `pc1..pcC`
    pub matrix: FeatureMatrix,
    /// Feature names of the source matrix
    pub source_columns: Vec<String>,
    /// Column means subtracted before projecting
    pub means: Vec<f64>,
    /// Unit-length loadings, one per component, each of source width
    pub components: Vec<Vec<f64>>,
    pub explained_variance: Vec<f64>,
    pub explained_variance_ratio: Vec<f64>,
}

/// Cluster label of one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Label {
    /// Not reachable from any dense core point
    Noise,
    Cluster(usize),
}

impl Label {
    pub fn is_noise(&self) -> bool {
        matches!(self, Label::Noise)
    }

    pub fn cluster(&self) -> Option<usize> {
        match self {
            Label::Noise => None,
            Label::Cluster(c) => Some(*c),
        }
    }
}

impl From<Label> for i64 {
    fn from(label: Label) -> Self {
        match label {
            Label::Noise => -1,
            Label::Cluster(c) => c as i64,
        }
    }
}

impl TryFrom<i64> for Label {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            -1 => Ok(Label::Noise),
            v if v >= 0 => Ok(Label::Cluster(v as usize)),
            v => Err(format!("invalid cluster label {v}")),
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Noise => write!(f, "noise"),
            Label::Cluster(c) => write!(f, "{c}"),
        }
    }
}

/// Score (or failure) of one candidate cluster count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub k: usize,
    pub score: Option<f64>,
    pub error: Option<String>,
}

/// Outcome of an automatic cluster-count search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KSelection {
    pub chosen_k: usize,
    pub metric: String,
    pub candidates: Vec<CandidateScore>,
}

/// Mapping from row index to cluster label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub algorithm: String,
    pub labels: Vec<Label>,
    /// Number of non-noise clusters
    pub n_clusters: usize,
    /// Density-based methods only: whether each row is a core point
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_points: Option<Vec<bool>>,
    /// Centroid-based methods only: sum of squared distances to centroids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inertia: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<KSelection>,
}

impl ClusterAssignment {
    /// Build an assignment, renumbering clusters by order of first appearance.
    pub fn canonical(algorithm: &str, labels: Vec<Label>) -> Self {
        let mut mapping: HashMap<usize, usize> = HashMap::new();
        let labels: Vec<Label> = labels
            .into_iter()
            .map(|label| match label {
                Label::Noise => Label::Noise,
                Label::Cluster(c) => {
                    let next = mapping.len();
                    Label::Cluster(*mapping.entry(c).or_insert(next))
                }
            })
            .collect();

        Self {
            algorithm: algorithm.to_string(),
            n_clusters: mapping.len(),
            labels,
            core_points: None,
            inertia: None,
            selection: None,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_noise()).count()
    }

    /// Row count per cluster, indexed by cluster number
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for c in self.labels.iter().filter_map(Label::cluster) {
            sizes[c] += 1;
        }
        sizes
    }
}
