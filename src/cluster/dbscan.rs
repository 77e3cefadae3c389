//! Density-based clustering (DBSCAN)
//!
//! Rows are visited in order. A row with at least `min_points` neighbours
//! within `radius` (itself included) is a core point and seeds a cluster
//! that grows through neighbouring core points. Border rows join the first
//! cluster that reaches them; everything else is noise. For a fixed row order
//! the result is fully deterministic.

use std::collections::VecDeque;

use tracing::debug;

use super::{squared_distance, Clusterer};
use crate::config::DbscanParams;
use crate::error::{AnalysisError, Result};
use crate::types::{ClusterAssignment, FeatureMatrix, Label};

pub struct Dbscan<'a> {
    params: &'a DbscanParams,
}

impl<'a> Dbscan<'a> {
    pub fn new(params: &'a DbscanParams) -> Self {
        Self { params }
    }

    fn neighbours(&self, matrix: &FeatureMatrix, i: usize) -> Vec<usize> {
        let eps2 = self.params.radius * self.params.radius;
        let point = matrix.row(i);
        (0..matrix.n_rows())
            .filter(|&j| squared_distance(point, matrix.row(j)) <= eps2)
            .collect()
    }

    /// Grow `cluster` outward from a core row's neighbourhood. A row is
    /// claimed when it is queued, so each row enters the queue at most once.
    /// Returns the number of rows queued.
    fn expand(
        &self,
        matrix: &FeatureMatrix,
        seeds: Vec<usize>,
        cluster: Label,
        labels: &mut [Option<Label>],
        core: &mut [bool],
    ) -> usize {
        let mut queue = VecDeque::new();
        let mut queued = 0;
        let mut claim = |j: usize, labels: &mut [Option<Label>], queue: &mut VecDeque<usize>| {
            match labels[j] {
                // reachable but not dense: border point, never expanded
                Some(Label::Noise) => labels[j] = Some(cluster),
                Some(Label::Cluster(_)) => {}
                None => {
                    labels[j] = Some(cluster);
                    queue.push_back(j);
                    queued += 1;
                }
            }
        };

        for j in seeds {
            claim(j, labels, &mut queue);
        }
        while let Some(j) = queue.pop_front() {
            let reach = self.neighbours(matrix, j);
            if reach.len() >= self.params.min_points {
                core[j] = true;
                for r in reach {
                    claim(r, labels, &mut queue);
                }
            }
        }
        queued
    }
}

impl Clusterer for Dbscan<'_> {
    fn name(&self) -> &'static str {
        "dbscan"
    }

    fn label(&self, matrix: &FeatureMatrix) -> Result<ClusterAssignment> {
        self.params.validate()?;
        let n = matrix.n_rows();
        if n == 0 {
            return Err(AnalysisError::Data(
                "cannot cluster an empty feature matrix".to_string(),
            ));
        }
        if n < self.params.min_points {
            return Err(AnalysisError::Data(format!(
                "dbscan needs at least min_points={} rows, got {n}",
                self.params.min_points
            )));
        }

        let mut labels: Vec<Option<Label>> = vec![None; n];
        let mut core = vec![false; n];
        let mut next_cluster = 0;

        for i in 0..n {
            if labels[i].is_some() {
                continue;
            }
            let seeds = self.neighbours(matrix, i);
            if seeds.len() < self.params.min_points {
                labels[i] = Some(Label::Noise);
                continue;
            }

            let cluster = Label::Cluster(next_cluster);
            next_cluster += 1;
            labels[i] = Some(cluster);
            core[i] = true;
            self.expand(matrix, seeds, cluster, &mut labels, &mut core);
        }

        let labels: Vec<Label> = labels
            .into_iter()
            .map(|l| l.unwrap_or(Label::Noise))
            .collect();

        let mut assignment = ClusterAssignment::canonical(self.name(), labels);
        assignment.core_points = Some(core);

        debug!(
            clusters = assignment.n_clusters,
            noise = assignment.noise_count(),
            "dbscan finished"
        );

        if self.params.require_cluster && assignment.n_clusters == 0 {
            return Err(AnalysisError::Data(format!(
                "dbscan labelled all {n} rows as noise (radius={}, min_points={})",
                self.params.radius, self.params.min_points
            )));
        }
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn params(radius: f64, min_points: usize) -> DbscanParams {
        DbscanParams {
            radius,
            min_points,
            require_cluster: false,
        }
    }

    fn line(points: &[f64]) -> FeatureMatrix {
        let rows: Vec<Vec<f64>> = points.iter().map(|p| vec![*p]).collect();
        FeatureMatrix::from_rows(&["x"], &rows).unwrap()
    }

    #[test]
    fn test_core_border_and_noise() {
        // 0,1,2 dense; 3 is a border of that group; 10 is isolated
        let m = line(&[0.0, 1.0, 2.0, 3.0, 10.0]);
        let p = params(1.0, 3);
        let assignment = Dbscan::new(&p).label(&m).unwrap();
        assert_eq!(
            assignment.labels,
            vec![
                Label::Cluster(0),
                Label::Cluster(0),
                Label::Cluster(0),
                Label::Cluster(0),
                Label::Noise
            ]
        );
        assert_eq!(
            assignment.core_points,
            Some(vec![false, true, true, false, false])
        );
    }

    #[test]
    fn test_noise_later_claimed_as_border() {
        // row 0 is visited first and looks like noise, then joins the cluster
        let m = line(&[0.0, 1.0, 1.5, 2.0]);
        let p = params(1.0, 3);
        let assignment = Dbscan::new(&p).label(&m).unwrap();
        assert_eq!(assignment.noise_count(), 0);
        assert_eq!(assignment.n_clusters, 1);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let m = line(&[0.0, 0.5, 0.7, 5.0, 5.2, 5.4, 9.0, 20.0]);
        let p = params(0.6, 2);
        let first = Dbscan::new(&p).label(&m).unwrap();
        for _ in 0..5 {
            assert_eq!(Dbscan::new(&p).label(&m).unwrap(), first);
        }
        assert_eq!(first.n_clusters, 2);
    }

    #[test]
    fn test_dense_blob_queues_each_row_once() {
        let n = 400;
        let m = line(&vec![1.0; n]);
        let p = params(1.0, 5);
        let dbscan = Dbscan::new(&p);

        let mut labels = vec![None; n];
        let mut core = vec![false; n];
        labels[0] = Some(Label::Cluster(0));
        core[0] = true;
        let seeds = dbscan.neighbours(&m, 0);
        let queued = dbscan.expand(&m, seeds, Label::Cluster(0), &mut labels, &mut core);
        assert_eq!(queued, n - 1);
        assert!(core.iter().all(|c| *c));

        let assignment = dbscan.label(&m).unwrap();
        assert_eq!(assignment.n_clusters, 1);
        assert_eq!(assignment.noise_count(), 0);
    }

    #[test]
    fn test_all_noise() {
        let m = line(&[0.0, 10.0, 20.0]);
        let mut p = params(1.0, 2);
        let assignment = Dbscan::new(&p).label(&m).unwrap();
        assert_eq!(assignment.noise_count(), 3);
        assert_eq!(assignment.n_clusters, 0);

        p.require_cluster = true;
        let err = Dbscan::new(&p).label(&m).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn test_invalid_parameters() {
        let m = line(&[0.0, 1.0]);
        assert_eq!(
            Dbscan::new(&params(0.0, 2)).label(&m).unwrap_err().kind(),
            ErrorKind::Config
        );
        assert_eq!(
            Dbscan::new(&params(-1.0, 2)).label(&m).unwrap_err().kind(),
            ErrorKind::Config
        );
        assert_eq!(
            Dbscan::new(&params(1.0, 5)).label(&m).unwrap_err().kind(),
            ErrorKind::Data
        );
    }
}
