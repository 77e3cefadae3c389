//! Session cleaning
//!
//! Turns a raw [`Session`] into a [`FilteredSession`]:
//! - zero-sentinel heart-rate / breathing-rate runs bounded by real readings
//!   are linearly interpolated (opt-in)
//! - repeated simulator ticks are dropped, keeping the first of each run
//!
//! Interpolation runs first. Filling a dropout can make neighbouring rows
//! identical, and removing those afterwards keeps `clean` idempotent.

use tracing::{debug, warn};

use crate::config::{CleanerConfig, LogFormat};
use crate::error::{AnalysisError, Result};
use crate::types::{CleaningSummary, FilteredSession, GapEdge, LogRecord, SentinelGap, Session};

/// Cleaner for deduplicating sessions and repairing sensor dropouts
pub struct Cleaner;

impl Cleaner {
    /// Clean a session with the default log format and exact duplicate matching
    pub fn clean(session: &Session, interpolate: bool) -> Result<FilteredSession> {
        let config = CleanerConfig {
            interpolate,
            ..CleanerConfig::default()
        };
        Self::clean_with(session, &config, &LogFormat::default())
    }

    /// Clean a session
    pub fn clean_with(
        session: &Session,
        config: &CleanerConfig,
        format: &LogFormat,
    ) -> Result<FilteredSession> {
        let mut summary = CleaningSummary {
            source_rows: session.len(),
            ..CleaningSummary::default()
        };

        let mut records = session.records.clone();

        if config.interpolate {
            for column in format.sentinel_columns() {
                let idx = session
                    .field_index(column)
                    .ok_or_else(|| AnalysisError::schema(column, &session.key.name))?;
                interpolate_column(&mut records, idx, column, &mut summary);
            }
        }

        let records = drop_repeated_ticks(records, config.duplicate_tolerance);
        summary.dropped_duplicates = session.len() - records.len();

        for gap in &summary.uncorrected_gaps {
            warn!(
                session = %session.key.name,
                column = %gap.column,
                start = gap.start_time,
                end = gap.end_time,
                samples = gap.samples,
                edge = ?gap.edge,
                "zero-sentinel gap left uncorrected"
            );
        }
        debug!(
            session = %session.key.name,
            kept = records.len(),
            dropped = summary.dropped_duplicates,
            interpolated = summary.interpolated_values,
            "cleaned session"
        );

        Ok(FilteredSession {
            session: session.with_records(records),
            summary,
        })
    }
}

/// Keep a record only when some numeric field differs from the last kept record
fn drop_repeated_ticks(records: Vec<LogRecord>, tolerance: f64) -> Vec<LogRecord> {
    let mut kept: Vec<LogRecord> = Vec::with_capacity(records.len());
    for record in records {
        let redundant = kept
            .last()
            .map(|prev| same_fields(&prev.values, &record.values, tolerance))
            .unwrap_or(false);
        if !redundant {
            kept.push(record);
        }
    }
    kept
}

fn same_fields(a: &[f64], b: &[f64], tolerance: f64) -> bool {
    a.iter().zip(b).all(|(x, y)| {
        if x.is_nan() || y.is_nan() {
            x.is_nan() && y.is_nan()
        } else {
            (x - y).abs() <= tolerance
        }
    })
}

/// Fill zero runs of one column that sit strictly between two real readings
fn interpolate_column(
    records: &mut [LogRecord],
    idx: usize,
    column: &str,
    summary: &mut CleaningSummary,
) {
    let n = records.len();
    let mut i = 0;
    while i < n {
        if records[i].values[idx] != 0.0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && records[i].values[idx] == 0.0 {
            i += 1;
        }
        let end = i;

        let edge = if start == 0 && end == n {
            Some(GapEdge::Entire)
        } else if start == 0 {
            Some(GapEdge::Leading)
        } else if end == n {
            Some(GapEdge::Trailing)
        } else if records[start - 1].values[idx].is_nan() || records[end].values[idx].is_nan() {
            Some(GapEdge::MissingNeighbor)
        } else {
            None
        };

        match edge {
            Some(edge) => summary.uncorrected_gaps.push(SentinelGap {
                column: column.to_string(),
                start_time: records[start].time,
                end_time: records[end - 1].time,
                samples: end - start,
                edge,
            }),
            None => {
                fill_run(records, idx, start - 1, end);
                summary.interpolated_runs += 1;
                summary.interpolated_values += end - start;
            }
        }
    }
}

/// Linear fill of `(lo, hi)` exclusive, anchored on the values at `lo` and `hi`.
///
/// Weights follow elapsed time when timestamps strictly increase across the
/// span, and sample position otherwise.
fn fill_run(records: &mut [LogRecord], idx: usize, lo: usize, hi: usize) {
    let a = records[lo].values[idx];
    let b = records[hi].values[idx];
    let t0 = records[lo].time;
    let t1 = records[hi].time;
    let strictly_timed = records[lo..=hi].windows(2).all(|w| w[1].time > w[0].time);

    for k in lo + 1..hi {
        let frac = if strictly_timed {
            (records[k].time - t0) / (t1 - t0)
        } else {
            (k - lo) as f64 / (hi - lo) as f64
        };
        records[k].values[idx] = a + (b - a) * frac;
    }
}
