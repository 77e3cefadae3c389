//! Feature matrix assembly
//!
//! Pools the selected columns of one or more filtered sessions into a single
//! [`FeatureMatrix`]. Rows keep session order, then record order, and every
//! row remembers which session and timestamp it came from.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{AnalysisError, Result};
use crate::types::{FeatureMatrix, FilteredSession, RowProvenance};

/// Builder for pooled feature matrices
pub struct FeatureMatrixBuilder;

impl FeatureMatrixBuilder {
    /// Build a matrix from `columns` of every session, in the order given.
    ///
    /// Fails with a schema error naming the first session that lacks a
    /// requested column. Rows with a missing (NaN) value in any selected
    /// column are skipped and counted in `skipped_rows`.
    pub fn build<S: AsRef<str>>(
        sessions: &[FilteredSession],
        columns: &[S],
    ) -> Result<FeatureMatrix> {
        let columns: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
        validate_selection(&columns)?;
        if sessions.is_empty() {
            return Err(AnalysisError::Data(
                "no sessions selected for the feature matrix".to_string(),
            ));
        }

        for filtered in sessions {
            if let Some(missing) = columns.iter().find(|c| !filtered.session.has_column(c)) {
                return Err(AnalysisError::schema(missing, &filtered.key().name));
            }
        }

        let total: usize = sessions.iter().map(FilteredSession::len).sum();
        let mut data = Vec::with_capacity(total * columns.len());
        let mut provenance = Vec::with_capacity(total);
        let mut skipped = 0;

        for (s, filtered) in sessions.iter().enumerate() {
            let session = &filtered.session;
            let selectors: Vec<Option<usize>> =
                columns.iter().map(|c| session.field_index(c)).collect();

            for (r, record) in session.records.iter().enumerate() {
                let row: Vec<f64> = selectors
                    .iter()
                    .map(|sel| match sel {
                        Some(idx) => record.values[*idx],
                        None => record.time,
                    })
                    .collect();
                if row.iter().any(|v| v.is_nan()) {
                    skipped += 1;
                    continue;
                }
                data.extend(row);
                provenance.push(RowProvenance {
                    session: s,
                    record: r,
                    time: record.time,
                });
            }
        }

        if skipped > 0 {
            warn!(skipped, "skipped rows with missing feature values");
        }
        debug!(
            rows = provenance.len(),
            columns = ?columns,
            sessions = sessions.len(),
            "built feature matrix"
        );

        let names = sessions.iter().map(|f| f.key().name.clone()).collect();
        let mut matrix = FeatureMatrix::from_parts(columns, names, data, provenance)?;
        matrix.skipped_rows = skipped;
        Ok(matrix)
    }
}

fn validate_selection(columns: &[String]) -> Result<()> {
    if columns.is_empty() {
        return Err(AnalysisError::Config(
            "at least one feature column is required".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for c in columns {
        if !seen.insert(c.as_str()) {
            return Err(AnalysisError::Config(format!(
                "column '{c}' selected more than once"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::Cleaner;
    use crate::error::ErrorKind;
    use crate::types::{LogRecord, Session, SessionKey};
    use pretty_assertions::assert_eq;

    fn filtered(name: &str, fields: &[&str], rows: &[(f64, Vec<f64>)]) -> FilteredSession {
        let records = rows
            .iter()
            .map(|(t, v)| LogRecord {
                time: *t,
                values: v.clone(),
                annotations: vec![],
            })
            .collect();
        let session = Session::new(
            SessionKey::from_stem(name),
            "time_seconds",
            fields.iter().map(|f| f.to_string()).collect(),
            records,
        )
        .unwrap();
        Cleaner::clean(&session, false).unwrap()
    }

    #[test]
    fn test_rows_pool_in_session_order() {
        let a = filtered(
            "a_night",
            &["speed", "heart_rate", "breathing_rate"],
            &[(0.0, vec![1.0, 70.0, 15.0]), (1.0, vec![2.0, 71.0, 15.0])],
        );
        let b = filtered(
            "b_night",
            &["heart_rate", "speed", "breathing_rate", "brake"],
            &[(5.0, vec![90.0, 30.0, 18.0, 0.0])],
        );
        let matrix = FeatureMatrixBuilder::build(&[a, b], &["speed", "heart_rate"]).unwrap();

        assert_eq!(matrix.n_rows(), 3);
        assert_eq!(matrix.n_cols(), 2);
        assert_eq!(matrix.row(0), &[1.0, 70.0]);
        assert_eq!(matrix.row(2), &[30.0, 90.0]);
        assert_eq!(matrix.session_of(2), "b_night");
        assert_eq!(matrix.provenance[2].time, 5.0);
    }

    #[test]
    fn test_row_count_matches_filtered_sessions() {
        let a = filtered(
            "a",
            &["speed"],
            &[(0.0, vec![1.0]), (1.0, vec![1.0]), (2.0, vec![3.0])],
        );
        let b = filtered("b", &["speed"], &[(0.0, vec![4.0]), (1.0, vec![5.0])]);
        let expected = a.len() + b.len();
        let matrix = FeatureMatrixBuilder::build(&[a, b], &["speed"]).unwrap();
        assert_eq!(matrix.n_rows(), expected);
        assert_eq!(expected, 4);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let a = filtered("a", &["speed", "heart_rate"], &[(0.0, vec![1.0, 70.0])]);
        let b = filtered("b", &["speed"], &[(0.0, vec![1.0])]);
        let err = FeatureMatrixBuilder::build(&[a, b], &["speed", "heart_rate"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_time_column_is_selectable() {
        let a = filtered("a", &["speed"], &[(0.5, vec![1.0]), (1.5, vec![2.0])]);
        let matrix = FeatureMatrixBuilder::build(&[a], &["time_seconds", "speed"]).unwrap();
        assert_eq!(matrix.row(1), &[1.5, 2.0]);
    }

    #[test]
    fn test_missing_values_are_skipped() {
        let a = filtered(
            "a",
            &["speed", "heart_rate"],
            &[(0.0, vec![1.0, f64::NAN]), (1.0, vec![2.0, 70.0])],
        );
        let matrix = FeatureMatrixBuilder::build(&[a], &["speed", "heart_rate"]).unwrap();
        assert_eq!(matrix.n_rows(), 1);
        assert_eq!(matrix.skipped_rows, 1);
        assert_eq!(matrix.provenance[0].record, 1);
    }

    #[test]
    fn test_invalid_selection() {
        let a = filtered("a", &["speed"], &[(0.0, vec![1.0])]);
        let empty: [&str; 0] = [];
        assert_eq!(
            FeatureMatrixBuilder::build(&[a.clone()], &empty).unwrap_err().kind(),
            ErrorKind::Config
        );
        assert_eq!(
            FeatureMatrixBuilder::build(&[a], &["speed", "speed"]).unwrap_err().kind(),
            ErrorKind::Config
        );
        assert_eq!(
            FeatureMatrixBuilder::build(&[], &["speed"]).unwrap_err().kind(),
            ErrorKind::Data
        );
    }
}
