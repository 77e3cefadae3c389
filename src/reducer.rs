//! Dimensionality reduction
//!
//! Principal component analysis fitted on the matrix being reduced. Each axis
//! is signed so that its largest-magnitude loading is positive, and axes are
//! ordered by descending explained variance; equal variances are ordered by
//! their signed loadings, lexicographically descending. Both conventions make
//! repeated runs on the same input produce identical projections.

use std::cmp::Ordering;

use nalgebra::DMatrix;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::types::{FeatureMatrix, ReducedMatrix};

/// PCA reducer
pub struct Pca;

impl Pca {
    /// Project `matrix` onto its first `components` principal axes
    pub fn reduce(matrix: &FeatureMatrix, components: usize) -> Result<ReducedMatrix> {
        let p = matrix.n_cols();
        if components == 0 || components > p {
            return Err(AnalysisError::Config(format!(
                "component count must be in [1, {p}], got {components}"
            )));
        }
        if matrix.is_empty() {
            return Err(AnalysisError::Data(
                "cannot reduce an empty feature matrix".to_string(),
            ));
        }

        let n = matrix.n_rows();
        let means = matrix.column_means();
        let centred = DMatrix::from_row_iterator(
            n,
            p,
            matrix
                .rows()
                .flat_map(|row| row.iter().zip(&means).map(|(v, m)| v - m)),
        );
        let dof = if n > 1 { (n - 1) as f64 } else { 1.0 };
        let covariance = (centred.transpose() * &centred) / dof;

        let total_variance: f64 = covariance.trace();
        let eigen = covariance.symmetric_eigen();
        let mut axes: Vec<(f64, Vec<f64>)> = (0..p)
            .map(|axis| {
                let mut v: Vec<f64> = eigen.eigenvectors.column(axis).iter().copied().collect();
                orient(&mut v);
                (eigen.eigenvalues[axis], v)
            })
            .collect();
        axes.sort_by(|(ea, va), (eb, vb)| {
            eb.partial_cmp(ea)
                .unwrap_or(Ordering::Equal)
                .then_with(|| vb.partial_cmp(va).unwrap_or(Ordering::Equal))
        });
        axes.truncate(components);

        let explained_variance: Vec<f64> = axes.iter().map(|(ev, _)| ev.max(0.0)).collect();
        let loadings: Vec<Vec<f64>> = axes.into_iter().map(|(_, v)| v).collect();
        let explained_variance_ratio = explained_variance
            .iter()
            .map(|ev| {
                if total_variance > 0.0 {
                    ev / total_variance
                } else {
                    0.0
                }
            })
            .collect();

        let mut data = Vec::with_capacity(n * components);
        for i in 0..n {
            let row = centred.row(i);
            for v in &loadings {
                data.push(row.iter().zip(v).map(|(x, w)| x * w).sum::<f64>());
            }
        }

        let names = (1..=components).map(|c| format!("pc{c}")).collect();
        let mut projected = FeatureMatrix::from_parts(
            names,
            matrix.sessions.clone(),
            data,
            matrix.provenance.clone(),
        )?;
        projected.skipped_rows = matrix.skipped_rows;

        debug!(
            components,
            explained = ?explained_variance,
            "reduced feature matrix"
        );

        Ok(ReducedMatrix {
            matrix: projected,
            source_columns: matrix.columns.clone(),
            means,
            components: loadings,
            explained_variance,
            explained_variance_ratio,
        })
    }
}

/// Flip an axis so its largest-magnitude loading (first on ties) is positive
fn orient(v: &mut [f64]) {
    let mut pivot = 0;
    for (i, x) in v.iter().enumerate() {
        if x.abs() > v[pivot].abs() {
            pivot = i;
        }
    }
    if v[pivot] < 0.0 {
        v.iter_mut().for_each(|x| *x = -*x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample_variances(m: &FeatureMatrix) -> Vec<f64> {
        let means = m.column_means();
        let n = m.n_rows() as f64;
        let mut vars = vec![0.0; m.n_cols()];
        for row in m.rows() {
            for (j, v) in row.iter().enumerate() {
                vars[j] += (v - means[j]).powi(2);
            }
        }
        vars.iter().map(|v| v / (n - 1.0)).collect()
    }

    fn sample_matrix() -> FeatureMatrix {
        FeatureMatrix::from_rows(
            &["speed", "heart_rate", "breathing_rate"],
            &[
                vec![10.0, 72.0, 15.0],
                vec![12.0, 75.0, 16.0],
                vec![30.0, 90.0, 19.0],
                vec![28.0, 88.0, 18.5],
                vec![5.0, 70.0, 14.0],
                vec![45.0, 101.0, 21.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_shape_for_every_valid_component_count() {
        let m = sample_matrix();
        for c in 1..=3 {
            let reduced = Pca::reduce(&m, c).unwrap();
            assert_eq!(reduced.matrix.n_cols(), c);
            assert_eq!(reduced.matrix.n_rows(), m.n_rows());
            assert_eq!(reduced.matrix.provenance, m.provenance);
        }
    }

    #[test]
    fn test_full_rank_preserves_total_variance() {
        let m = sample_matrix();
        let reduced = Pca::reduce(&m, 3).unwrap();
        let before: f64 = sample_variances(&m).iter().sum();
        let after: f64 = sample_variances(&reduced.matrix).iter().sum();
        assert!((before - after).abs() < 1e-8 * before.max(1.0));
        let ratio_sum: f64 = reduced.explained_variance_ratio.iter().sum();
        assert!((ratio_sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_axes_ordered_by_variance() {
        let reduced = Pca::reduce(&sample_matrix(), 3).unwrap();
        let ev = &reduced.explained_variance;
        assert!(ev[0] >= ev[1] && ev[1] >= ev[2]);
        let projected = sample_variances(&reduced.matrix);
        assert!((projected[0] - ev[0]).abs() < 1e-8 * ev[0].max(1.0));
    }

    #[test]
    fn test_correlated_data_collapses_to_one_axis() {
        let m = FeatureMatrix::from_rows(
            &["a", "b"],
            &[vec![1.0, 2.0], vec![2.0, 4.0], vec![3.0, 6.0], vec![4.0, 8.0]],
        )
        .unwrap();
        let reduced = Pca::reduce(&m, 1).unwrap();
        assert!((reduced.explained_variance_ratio[0] - 1.0).abs() < 1e-9);
        // largest loading is positive
        let axis = &reduced.components[0];
        assert!(axis[1] > 0.0);
        assert!(axis[0] > 0.0);
        // projection increases along the data
        let first = reduced.matrix.row(0)[0];
        let last = reduced.matrix.row(3)[0];
        assert!(last > first);
    }

    #[test]
    fn test_equal_variances_order_by_loadings() {
        let m = FeatureMatrix::from_rows(
            &["a", "b"],
            &[vec![1.0, 0.0], vec![-1.0, 0.0], vec![0.0, 1.0], vec![0.0, -1.0]],
        )
        .unwrap();
        let reduced = Pca::reduce(&m, 2).unwrap();
        assert_eq!(reduced.explained_variance[0], reduced.explained_variance[1]);
        let expected = [[1.0, 0.0], [0.0, 1.0]];
        for (axis, want) in reduced.components.iter().zip(expected) {
            assert!(axis.iter().zip(want).all(|(x, w)| (x - w).abs() < 1e-12), "{axis:?}");
        }
        // first component follows column a
        assert!((reduced.matrix.row(0)[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_reduce_is_deterministic() {
        let m = sample_matrix();
        let a = Pca::reduce(&m, 2).unwrap();
        let b = Pca::reduce(&m, 2).unwrap();
        assert_eq!(a.matrix.as_slice(), b.matrix.as_slice());
    }

    #[test]
    fn test_invalid_component_counts() {
        let m = sample_matrix();
        assert_eq!(Pca::reduce(&m, 0).unwrap_err().kind(), ErrorKind::Config);
        assert_eq!(Pca::reduce(&m, 4).unwrap_err().kind(), ErrorKind::Config);
    }
}
