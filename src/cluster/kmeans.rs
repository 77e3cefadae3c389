//! Centroid-based clustering (k-means with k-means++ seeding)

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{squared_distance, Clusterer};
use crate::config::KSearchParams;
use crate::error::{AnalysisError, Result};
use crate::types::{ClusterAssignment, FeatureMatrix, Label};

/// Result of fitting k-means once (best of `n_init` restarts)
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub k: usize,
    /// Cluster index per row, in `0..k`
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances to the assigned centroid
    pub inertia: f64,
    pub iterations: usize,
}

impl KMeansFit {
    pub fn into_assignment(self, name: &str) -> ClusterAssignment {
        let inertia = self.inertia;
        let labels = self.labels.into_iter().map(Label::Cluster).collect();
        let mut assignment = ClusterAssignment::canonical(name, labels);
        assignment.inertia = Some(inertia);
        assignment
    }
}

/// Seed for one candidate count, so every k draws from its own stream
pub fn candidate_seed(seed: u64, k: usize) -> u64 {
    seed ^ (k as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Number of distinct rows (bitwise comparison, `-0.0 == 0.0`)
pub fn distinct_rows(matrix: &FeatureMatrix) -> usize {
    let mut keys: Vec<Vec<u64>> = matrix
        .rows()
        .map(|row| row.iter().map(|v| (v + 0.0).to_bits()).collect())
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys.len()
}

/// Fit k-means with `k` clusters, keeping the lowest-inertia restart
pub fn fit(matrix: &FeatureMatrix, k: usize, params: &KSearchParams, seed: u64) -> Result<KMeansFit> {
    if k == 0 {
        return Err(AnalysisError::Config("k must be at least 1".to_string()));
    }
    if matrix.is_empty() {
        return Err(AnalysisError::Data(
            "cannot cluster an empty feature matrix".to_string(),
        ));
    }
    let distinct = distinct_rows(matrix);
    if k > distinct {
        return Err(AnalysisError::Data(format!(
            "k={k} exceeds the {distinct} distinct rows in the matrix"
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut best: Option<KMeansFit> = None;
    for _ in 0..params.n_init.max(1) {
        let centroids = plus_plus_init(matrix, k, &mut rng);
        let candidate = lloyd(matrix, centroids, params);
        let better = best
            .as_ref()
            .map(|b| candidate.inertia < b.inertia)
            .unwrap_or(true);
        if better {
            best = Some(candidate);
        }
    }
    best.ok_or_else(|| AnalysisError::Data("k-means produced no fit".to_string()))
}

/// k-means++ seeding: each new centroid is drawn with probability
/// proportional to its squared distance from the nearest chosen one
fn plus_plus_init(matrix: &FeatureMatrix, k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let n = matrix.n_rows();
    let first = rng.gen_range(0..n);
    let mut centroids = vec![matrix.row(first).to_vec()];
    let mut nearest: Vec<f64> = matrix
        .rows()
        .map(|row| squared_distance(row, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = nearest.iter().sum();
        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut pick = None;
            for (i, d) in nearest.iter().enumerate() {
                cumulative += d;
                if *d > 0.0 && cumulative > target {
                    pick = Some(i);
                    break;
                }
            }
            // rounding can leave the target just past the final sum
            pick.or_else(|| nearest.iter().rposition(|d| *d > 0.0))
                .unwrap_or(0)
        } else {
            rng.gen_range(0..n)
        };

        let centroid = matrix.row(next).to_vec();
        for (i, row) in matrix.rows().enumerate() {
            let d = squared_distance(row, &centroid);
            if d < nearest[i] {
                nearest[i] = d;
            }
        }
        centroids.push(centroid);
    }
    centroids
}

fn nearest_centroid(row: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.iter().enumerate() {
        let d = squared_distance(row, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// Lloyd iterations from the given centroids
fn lloyd(matrix: &FeatureMatrix, mut centroids: Vec<Vec<f64>>, params: &KSearchParams) -> KMeansFit {
    let k = centroids.len();
    let width = matrix.n_cols();
    let mut labels = vec![0usize; matrix.n_rows()];
    let mut iterations = 0;

    for _ in 0..params.max_iter {
        iterations += 1;
        let mut distances = Vec::with_capacity(matrix.n_rows());
        for (i, row) in matrix.rows().enumerate() {
            let (c, d) = nearest_centroid(row, &centroids);
            labels[i] = c;
            distances.push(d);
        }

        let mut sums = vec![vec![0.0; width]; k];
        let mut counts = vec![0usize; k];
        for (row, &c) in matrix.rows().zip(&labels) {
            counts[c] += 1;
            for (s, v) in sums[c].iter_mut().zip(row) {
                *s += v;
            }
        }

        let mut shift: f64 = 0.0;
        for c in 0..k {
            let updated = if counts[c] > 0 {
                sums[c].iter().map(|s| s / counts[c] as f64).collect()
            } else {
                // empty cluster: restart it on the worst-served row
                let far = distances
                    .iter()
                    .enumerate()
                    .fold(0, |best, (i, d)| if *d > distances[best] { i } else { best });
                distances[far] = 0.0;
                matrix.row(far).to_vec()
            };
            shift = shift.max(squared_distance(&centroids[c], &updated).sqrt());
            centroids[c] = updated;
        }

        if shift <= params.tolerance {
            break;
        }
    }

    let mut inertia = 0.0;
    for (i, row) in matrix.rows().enumerate() {
        let (c, d) = nearest_centroid(row, &centroids);
        labels[i] = c;
        inertia += d;
    }

    KMeansFit {
        k,
        labels,
        centroids,
        inertia,
        iterations,
    }
}

/// k-means++ with a fixed cluster count
pub struct KMeans<'a> {
    k: usize,
    params: &'a KSearchParams,
}

impl<'a> KMeans<'a> {
    pub fn new(k: usize, params: &'a KSearchParams) -> Self {
        Self { k, params }
    }
}

impl Clusterer for KMeans<'_> {
    fn name(&self) -> &'static str {
        "kmeans++"
    }

    fn label(&self, matrix: &FeatureMatrix) -> Result<ClusterAssignment> {
        let fitted = fit(
            matrix,
            self.k,
            self.params,
            candidate_seed(self.params.seed, self.k),
        )?;
        Ok(fitted.into_assignment(self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn blobs() -> FeatureMatrix {
        FeatureMatrix::from_rows(
            &["x", "y"],
            &[
                vec![0.0, 0.0],
                vec![0.2, 0.1],
                vec![0.1, 0.3],
                vec![8.0, 8.0],
                vec![8.2, 7.9],
                vec![7.9, 8.1],
                vec![0.0, 9.0],
                vec![0.1, 9.2],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_recovers_three_groups() {
        let params = KSearchParams::default();
        let fitted = fit(&blobs(), 3, &params, 7).unwrap();
        let a = fitted.labels[0];
        let b = fitted.labels[3];
        let c = fitted.labels[6];
        assert!(a != b && b != c && a != c);
        assert_eq!(&fitted.labels[..3], &[a, a, a]);
        assert_eq!(&fitted.labels[3..6], &[b, b, b]);
        assert_eq!(&fitted.labels[6..], &[c, c]);
        assert!(fitted.inertia < 1.0);
    }

    #[test]
    fn test_same_seed_same_fit() {
        let params = KSearchParams::default();
        let first = fit(&blobs(), 2, &params, 42).unwrap();
        let second = fit(&blobs(), 2, &params, 42).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_k_above_distinct_rows_fails() {
        let m = FeatureMatrix::from_rows(
            &["x"],
            &[vec![1.0], vec![1.0], vec![2.0], vec![2.0]],
        )
        .unwrap();
        assert_eq!(distinct_rows(&m), 2);
        let err = fit(&m, 3, &KSearchParams::default(), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(fit(&m, 2, &KSearchParams::default(), 0).is_ok());
    }

    #[test]
    fn test_single_cluster_centroid_is_mean() {
        let m = FeatureMatrix::from_rows(&["x"], &[vec![1.0], vec![2.0], vec![6.0]]).unwrap();
        let fitted = fit(&m, 1, &KSearchParams::default(), 0).unwrap();
        assert_eq!(fitted.centroids, vec![vec![3.0]]);
        assert!((fitted.inertia - 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_k_assignment_is_canonical() {
        let params = KSearchParams::default();
        let assignment = KMeans::new(3, &params).label(&blobs()).unwrap();
        assert_eq!(assignment.labels[0], Label::Cluster(0));
        assert_eq!(assignment.labels[3], Label::Cluster(1));
        assert_eq!(assignment.labels[6], Label::Cluster(2));
        assert_eq!(assignment.n_clusters, 3);
        assert!(assignment.inertia.is_some());
    }
}
