//! Cluster engine
//!
//! Partitions a feature matrix into behavioral regimes. Every algorithm sits
//! behind the [`Clusterer`] trait; [`ClusterEngine`] picks one from an
//! [`Algorithm`] description.
//!
//! Distances are Euclidean over the supplied columns. The engine never
//! rescales its input; standardize or reduce the matrix beforehand.

pub mod dbscan;
pub mod kmeans;
pub mod metrics;
pub mod search;

pub use dbscan::Dbscan;
pub use kmeans::{KMeans, KMeansFit};
pub use search::KSearch;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{DbscanParams, KSearchParams};
use crate::error::Result;
use crate::types::{ClusterAssignment, FeatureMatrix};

/// Anything that can label the rows of a feature matrix
pub trait Clusterer {
    /// Short algorithm name used in reports
    fn name(&self) -> &'static str;

    /// Assign exactly one label to every row
    fn label(&self, matrix: &FeatureMatrix) -> Result<ClusterAssignment>;
}

/// Algorithm selection with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Algorithm {
    /// Density-based clustering
    Dbscan(DbscanParams),
    /// k-means++ with a fixed cluster count
    KMeans { k: usize, params: KSearchParams },
    /// k-means++ with the cluster count chosen by a validity metric
    KMeansAuto(KSearchParams),
}

impl Algorithm {
    /// Human-readable summary of the algorithm and its parameters
    pub fn describe(&self) -> String {
        match self {
            Algorithm::Dbscan(p) => {
                format!("dbscan(radius={}, min_points={})", p.radius, p.min_points)
            }
            Algorithm::KMeans { k, params } => {
                format!("kmeans++(k={k}, seed={})", params.seed)
            }
            Algorithm::KMeansAuto(p) => format!(
                "kmeans++(k={}..={}, metric={}, seed={}, parallel={})",
                p.k_min,
                p.k_max,
                p.metric.as_str(),
                p.seed,
                p.parallel
            ),
        }
    }

    fn clusterer(&self) -> Box<dyn Clusterer + '_> {
        match self {
            Algorithm::Dbscan(p) => Box::new(Dbscan::new(p)),
            Algorithm::KMeans { k, params } => Box::new(KMeans::new(*k, params)),
            Algorithm::KMeansAuto(p) => Box::new(KSearch::new(p)),
        }
    }
}

/// Entry point for clustering a matrix
pub struct ClusterEngine;

impl ClusterEngine {
    /// Cluster `matrix` with the selected algorithm
    pub fn cluster(matrix: &FeatureMatrix, algorithm: &Algorithm) -> Result<ClusterAssignment> {
        let clusterer = algorithm.clusterer();
        let assignment = clusterer.label(matrix)?;
        info!(
            algorithm = clusterer.name(),
            rows = matrix.n_rows(),
            clusters = assignment.n_clusters,
            noise = assignment.noise_count(),
            "clustered feature matrix"
        );
        Ok(assignment)
    }
}

pub(crate) fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub(crate) fn distance(a: &[f64], b: &[f64]) -> f64 {
    squared_distance(a, b).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::Label;

    fn two_groups() -> FeatureMatrix {
        FeatureMatrix::from_rows(
            &["x", "y"],
            &[
                vec![0.0, 0.0],
                vec![0.1, 0.0],
                vec![0.0, 0.1],
                vec![10.0, 10.0],
                vec![10.1, 10.0],
                vec![10.0, 10.1],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_engine_dispatches_every_algorithm() {
        let m = two_groups();
        let dbscan = Algorithm::Dbscan(DbscanParams {
            radius: 0.5,
            min_points: 2,
            require_cluster: true,
        });
        let fixed = Algorithm::KMeans {
            k: 2,
            params: KSearchParams::default(),
        };
        let auto = Algorithm::KMeansAuto(KSearchParams {
            k_max: 4,
            ..KSearchParams::default()
        });

        for algorithm in [dbscan, fixed, auto] {
            let assignment = ClusterEngine::cluster(&m, &algorithm).unwrap();
            assert_eq!(assignment.n_clusters, 2, "{}", algorithm.describe());
            assert_eq!(&assignment.labels[..3], &[Label::Cluster(0); 3]);
            assert_eq!(&assignment.labels[3..], &[Label::Cluster(1); 3]);
        }
    }

    #[test]
    fn test_empty_matrix_is_data_error() {
        let m = FeatureMatrix::from_rows(&["x"], &[]).unwrap();
        let algorithm = Algorithm::Dbscan(DbscanParams {
            radius: 1.0,
            min_points: 1,
            require_cluster: false,
        });
        let err = ClusterEngine::cluster(&m, &algorithm).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);

        let err = ClusterEngine::cluster(&m, &Algorithm::KMeansAuto(KSearchParams::default()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn test_algorithm_serde() {
        let algorithm = Algorithm::Dbscan(DbscanParams::default());
        let json = serde_json::to_value(&algorithm).unwrap();
        assert_eq!(json["algorithm"], "dbscan");
        assert_eq!(json["min_points"], 500);
    }
}
