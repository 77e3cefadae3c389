//! Result reporting
//!
//! Summarizes a cluster assignment over the matrix it was computed from and
//! produces the point lists and series that external plotters consume. No
//! function here mutates its inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use uuid::Uuid;

use crate::error::{AnalysisError, Result};
use crate::types::{ClusterAssignment, FeatureMatrix, FilteredSession, KSelection, Label};
use crate::DRIVESTATE_VERSION;

/// Aggregate statistics of one label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub label: Label,
    pub count: usize,
    /// Fraction of all rows carrying this label
    pub share: f64,
    pub mean: Vec<f64>,
    /// Sample variance per feature; absent for a single row
    pub variance: Option<Vec<f64>>,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: Label,
    pub count: usize,
}

/// Label counts of the rows contributed by one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBreakdown {
    pub session: String,
    pub rows: usize,
    pub labels: Vec<LabelCount>,
}

/// Summary of one clustering run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub producer_version: String,
    pub algorithm: String,
    /// Parameter summary, when the caller supplies one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
    pub columns: Vec<String>,
    pub rows: usize,
    pub skipped_rows: usize,
    pub n_clusters: usize,
    pub noise: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inertia: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<KSelection>,
    /// Non-noise clusters in label order, then noise if present
    pub clusters: Vec<ClusterStats>,
    pub sessions: Vec<SessionBreakdown>,
}

impl ClusterReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One row of a scatter plot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScatterPoint {
    pub session: String,
    pub time: f64,
    pub coordinates: Vec<f64>,
    pub label: Label,
}

/// Five-number summary of one column within one scenario group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub group: String,
    pub column: String,
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

/// Time-indexed values of selected columns of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub session: String,
    pub time_column: String,
    pub columns: Vec<String>,
    pub points: Vec<(f64, Vec<f64>)>,
}

impl TimeSeries {
    /// Write the series as CSV (time column first)
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        let mut header = vec![self.time_column.as_str()];
        header.extend(self.columns.iter().map(String::as_str));
        out.write_record(&header)?;
        for (time, values) in &self.points {
            let mut record = vec![format_value(*time)];
            record.extend(values.iter().map(|v| format_value(*v)));
            out.write_record(&record)?;
        }
        out.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

/// Builds cluster reports; one reporter stamps every report with its run id
pub struct Reporter {
    run_id: String,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_run_id(run_id: String) -> Self {
        Self { run_id }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Per-label statistics and per-session label counts
    pub fn report(&self, matrix: &FeatureMatrix, assignment: &ClusterAssignment) -> Result<ClusterReport> {
        check_lengths(matrix, assignment)?;

        let mut labels: Vec<Label> = (0..assignment.n_clusters).map(Label::Cluster).collect();
        if assignment.noise_count() > 0 {
            labels.push(Label::Noise);
        }
        let clusters = labels
            .iter()
            .map(|&label| label_stats(matrix, assignment, label))
            .collect();

        Ok(ClusterReport {
            run_id: self.run_id.clone(),
            generated_at: Utc::now(),
            producer_version: DRIVESTATE_VERSION.to_string(),
            algorithm: assignment.algorithm.clone(),
            parameters: None,
            columns: matrix.columns.clone(),
            rows: matrix.n_rows(),
            skipped_rows: matrix.skipped_rows,
            n_clusters: assignment.n_clusters,
            noise: assignment.noise_count(),
            inertia: assignment.inertia,
            selection: assignment.selection.clone(),
            clusters,
            sessions: session_breakdown(matrix, assignment),
        })
    }
}

fn check_lengths(matrix: &FeatureMatrix, assignment: &ClusterAssignment) -> Result<()> {
    if assignment.len() != matrix.n_rows() {
        return Err(AnalysisError::Data(format!(
            "assignment has {} labels but the matrix has {} rows",
            assignment.len(),
            matrix.n_rows()
        )));
    }
    Ok(())
}

fn label_stats(matrix: &FeatureMatrix, assignment: &ClusterAssignment, label: Label) -> ClusterStats {
    let width = matrix.n_cols();
    let rows: Vec<&[f64]> = matrix
        .rows()
        .zip(&assignment.labels)
        .filter(|(_, l)| **l == label)
        .map(|(r, _)| r)
        .collect();
    let count = rows.len();

    let mut mean = vec![0.0; width];
    let mut min = vec![f64::INFINITY; width];
    let mut max = vec![f64::NEG_INFINITY; width];
    for row in &rows {
        for j in 0..width {
            mean[j] += row[j];
            min[j] = min[j].min(row[j]);
            max[j] = max[j].max(row[j]);
        }
    }
    mean.iter_mut().for_each(|m| *m /= count.max(1) as f64);

    let variance = (count > 1).then(|| {
        let mut var = vec![0.0; width];
        for row in &rows {
            for j in 0..width {
                var[j] += (row[j] - mean[j]).powi(2);
            }
        }
        var.iter_mut().for_each(|v| *v /= (count - 1) as f64);
        var
    });

    ClusterStats {
        label,
        count,
        share: count as f64 / matrix.n_rows().max(1) as f64,
        mean,
        variance,
        min,
        max,
    }
}

fn session_breakdown(matrix: &FeatureMatrix, assignment: &ClusterAssignment) -> Vec<SessionBreakdown> {
    let mut counts: Vec<BTreeMap<Label, usize>> = vec![BTreeMap::new(); matrix.sessions.len()];
    for (p, label) in matrix.provenance.iter().zip(&assignment.labels) {
        *counts[p.session].entry(*label).or_insert(0) += 1;
    }
    matrix
        .sessions
        .iter()
        .zip(counts)
        .filter(|(_, c)| !c.is_empty())
        .map(|(name, c)| SessionBreakdown {
            session: name.clone(),
            rows: c.values().sum(),
            // clusters first, noise last
            labels: {
                let mut labels: Vec<LabelCount> = c
                    .into_iter()
                    .map(|(label, count)| LabelCount { label, count })
                    .collect();
                labels.sort_by_key(|l| (l.label.is_noise(), l.label));
                labels
            },
        })
        .collect()
}

/// Point/label tuples for a 2-D or 3-D scatter plot over the given columns
pub fn scatter_points(
    matrix: &FeatureMatrix,
    assignment: &ClusterAssignment,
    axes: &[usize],
) -> Result<Vec<ScatterPoint>> {
    if !(2..=3).contains(&axes.len()) {
        return Err(AnalysisError::Config(format!(
            "scatter plots need 2 or 3 axes, got {}",
            axes.len()
        )));
    }
    if let Some(bad) = axes.iter().find(|&&a| a >= matrix.n_cols()) {
        return Err(AnalysisError::Config(format!(
            "axis {bad} out of range for {} columns",
            matrix.n_cols()
        )));
    }
    check_lengths(matrix, assignment)?;

    Ok(matrix
        .rows()
        .enumerate()
        .map(|(i, row)| ScatterPoint {
            session: matrix.session_of(i).to_string(),
            time: matrix.provenance[i].time,
            coordinates: axes.iter().map(|&a| row[a]).collect(),
            label: assignment.labels[i],
        })
        .collect())
}

/// Write scatter points as CSV with one column per axis
pub fn write_scatter<W: Write>(writer: W, axis_names: &[&str], points: &[ScatterPoint]) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    let mut header = vec!["session", "time"];
    header.extend_from_slice(axis_names);
    header.push("label");
    out.write_record(&header)?;
    for point in points {
        let mut record = vec![point.session.clone(), point.time.to_string()];
        record.extend(point.coordinates.iter().map(|c| c.to_string()));
        record.push(i64::from(point.label).to_string());
        out.write_record(&record)?;
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Linear-interpolated quantile of sorted values
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Distribution of `column` per scenario, for box plots.
///
/// Sessions without a recognised scenario are grouped under their participant
/// (or `unknown`). Missing values are ignored; groups with no values are
/// omitted. Groups come back in name order.
pub fn distribution_summary(sessions: &[FilteredSession], column: &str) -> Result<Vec<DistributionSummary>> {
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for filtered in sessions {
        let values = filtered
            .session
            .column(column)
            .ok_or_else(|| AnalysisError::schema(column, &filtered.key().name))?;
        let key = filtered.key();
        let group = key
            .scenario
            .clone()
            .or_else(|| key.participant.clone())
            .unwrap_or_else(|| "unknown".to_string());
        groups
            .entry(group)
            .or_default()
            .extend(values.into_iter().filter(|v| !v.is_nan()));
    }

    Ok(groups
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(group, mut values)| {
            values.sort_by(f64::total_cmp);
            let count = values.len();
            DistributionSummary {
                group,
                column: column.to_string(),
                count,
                mean: values.iter().sum::<f64>() / count as f64,
                min: values[0],
                q1: quantile(&values, 0.25),
                median: quantile(&values, 0.5),
                q3: quantile(&values, 0.75),
                max: values[count - 1],
            }
        })
        .collect())
}

/// Values of `columns` against elapsed time, for line plots
pub fn time_series<S: AsRef<str>>(session: &FilteredSession, columns: &[S]) -> Result<TimeSeries> {
    if columns.is_empty() {
        return Err(AnalysisError::Config(
            "at least one column is required for a time series".to_string(),
        ));
    }
    let data: Vec<Vec<f64>> = columns
        .iter()
        .map(|c| {
            session
                .session
                .column(c.as_ref())
                .ok_or_else(|| AnalysisError::schema(c.as_ref(), &session.key().name))
        })
        .collect::<Result<_>>()?;

    let points = session
        .session
        .records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.time, data.iter().map(|col| col[i]).collect()))
        .collect();

    Ok(TimeSeries {
        session: session.key().name.clone(),
        time_column: session.session.time_column.clone(),
        columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
        points,
    })
}

/// Plain-text rendering for terminal output
pub fn render_text(report: &ClusterReport) -> String {
    report.to_string()
}

impl fmt::Display for ClusterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {} ({})", self.run_id, self.generated_at.to_rfc3339())?;
        writeln!(f, "algorithm: {}", self.parameters.as_deref().unwrap_or(&self.algorithm))?;
        writeln!(
            f,
            "rows: {} (skipped {}), clusters: {}, noise: {}",
            self.rows, self.skipped_rows, self.n_clusters, self.noise
        )?;
        if let Some(inertia) = self.inertia {
            writeln!(f, "inertia: {inertia:.4}")?;
        }
        if let Some(selection) = &self.selection {
            writeln!(f, "chosen k: {} by {}", selection.chosen_k, selection.metric)?;
            for c in &selection.candidates {
                match (c.score, &c.error) {
                    (Some(score), _) => writeln!(f, "  k={:<3} {score:.4}", c.k)?,
                    (None, Some(error)) => writeln!(f, "  k={:<3} failed: {error}", c.k)?,
                    (None, None) => {}
                }
            }
        }

        writeln!(
            f,
            "\n{:<8} {:>8} {:>7}  mean [{}]",
            "label",
            "count",
            "share",
            self.columns.join(", ")
        )?;
        for stats in &self.clusters {
            let mean: Vec<String> = stats.mean.iter().map(|m| format!("{m:.3}")).collect();
            writeln!(
                f,
                "{:<8} {:>8} {:>6.1}%  [{}]",
                stats.label.to_string(),
                stats.count,
                stats.share * 100.0,
                mean.join(", ")
            )?;
        }

        if !self.sessions.is_empty() {
            writeln!(f, "\nsessions:")?;
            for s in &self.sessions {
                let counts: Vec<String> = s
                    .labels
                    .iter()
                    .map(|l| format!("{}={}", l.label, l.count))
                    .collect();
                writeln!(f, "  {} ({} rows): {}", s.session, s.rows, counts.join(" "))?;
            }
        }
        Ok(())
    }
}
