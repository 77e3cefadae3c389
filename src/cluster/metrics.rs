//! Internal cluster validity metrics
//!
//! Both metrics take per-row cluster indices in `0..k` (no noise). Sums run
//! sequentially in row order so a score never depends on thread scheduling.

use super::{distance, squared_distance};
use crate::config::ValidityMetric;
use crate::error::{AnalysisError, Result};
use crate::types::FeatureMatrix;

/// Score a labelling with the selected metric; higher is better for both
pub fn score(metric: ValidityMetric, matrix: &FeatureMatrix, labels: &[usize], k: usize) -> Result<f64> {
    match metric {
        ValidityMetric::Silhouette => silhouette(matrix, labels, k),
        ValidityMetric::CalinskiHarabasz => calinski_harabasz(matrix, labels, k),
    }
}

/// Count rows per cluster and check the labelling is scoreable
fn cluster_counts(matrix: &FeatureMatrix, labels: &[usize], k: usize) -> Result<Vec<usize>> {
    let n = matrix.n_rows();
    if labels.len() != n {
        return Err(AnalysisError::Data(format!(
            "{} labels for {n} rows",
            labels.len()
        )));
    }
    let mut counts = vec![0usize; k];
    for &c in labels {
        if c >= k {
            return Err(AnalysisError::Data(format!(
                "label {c} out of range for k={k}"
            )));
        }
        counts[c] += 1;
    }
    let used = counts.iter().filter(|&&c| c > 0).count();
    if used < 2 || used >= n {
        return Err(AnalysisError::Data(format!(
            "validity metrics need between 2 and {} non-empty clusters, got {used}",
            n.saturating_sub(1)
        )));
    }
    Ok(counts)
}

/// Mean silhouette coefficient over all rows, in [-1, 1].
///
/// Rows in singleton clusters contribute 0.
pub fn silhouette(matrix: &FeatureMatrix, labels: &[usize], k: usize) -> Result<f64> {
    let counts = cluster_counts(matrix, labels, k)?;
    let n = matrix.n_rows();

    let mut total = 0.0;
    let mut sums = vec![0.0; k];
    for i in 0..n {
        sums.iter_mut().for_each(|s| *s = 0.0);
        let row = matrix.row(i);
        for j in 0..n {
            if i != j {
                sums[labels[j]] += distance(row, matrix.row(j));
            }
        }

        let own = labels[i];
        if counts[own] == 1 {
            continue;
        }
        let a = sums[own] / (counts[own] - 1) as f64;
        let b = (0..k)
            .filter(|&c| c != own && counts[c] > 0)
            .map(|c| sums[c] / counts[c] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }
    Ok(total / n as f64)
}

/// Calinski-Harabasz variance ratio.
///
/// Returns 1.0 when every row sits exactly on its cluster centroid.
pub fn calinski_harabasz(matrix: &FeatureMatrix, labels: &[usize], k: usize) -> Result<f64> {
    let counts = cluster_counts(matrix, labels, k)?;
    let n = matrix.n_rows();
    let width = matrix.n_cols();
    let used = counts.iter().filter(|&&c| c > 0).count();

    let mean = matrix.column_means();
    let mut centroids = vec![vec![0.0; width]; k];
    for (row, &c) in matrix.rows().zip(labels) {
        for (s, v) in centroids[c].iter_mut().zip(row) {
            *s += v;
        }
    }
    for (centroid, &count) in centroids.iter_mut().zip(&counts) {
        if count > 0 {
            centroid.iter_mut().for_each(|s| *s /= count as f64);
        }
    }

    let between: f64 = centroids
        .iter()
        .zip(&counts)
        .map(|(centroid, &count)| count as f64 * squared_distance(centroid, &mean))
        .sum();
    let within: f64 = matrix
        .rows()
        .zip(labels)
        .map(|(row, &c)| squared_distance(row, &centroids[c]))
        .sum();

    if within == 0.0 {
        return Ok(1.0);
    }
    Ok((between / (used - 1) as f64) / (within / (n - used) as f64))
}
