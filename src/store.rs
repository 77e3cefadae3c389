//! Session log storage
//!
//! Reads per-session CSV logs into immutable [`Session`]s and writes filtered
//! logs next to them. Numeric columns become fields; any column holding a
//! non-numeric cell (the simulator's wall-clock `time` string, for instance)
//! is carried through untouched as a text annotation.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::LogFormat;
use crate::error::{AnalysisError, Result};
use crate::types::{ColumnSlot, LogRecord, Session, SessionKey};

/// Loader and writer for session logs
pub struct LogStore;

impl LogStore {
    /// Load one session log from disk
    pub fn load(path: &Path, format: &LogFormat) -> Result<Session> {
        let file = File::open(path).map_err(|e| AnalysisError::io(path, e))?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut session = Self::read(file, SessionKey::from_stem(&stem), format, path)?;
        session.source = Some(path.to_path_buf());
        info!(
            session = %session.key.name,
            rows = session.len(),
            fields = session.fields.len(),
            "loaded session log"
        );
        Ok(session)
    }

    /// Load every path in order
    pub fn load_all(paths: &[PathBuf], format: &LogFormat) -> Result<Vec<Session>> {
        paths.iter().map(|p| Self::load(p, format)).collect()
    }

    /// Parse a session from any CSV reader; `origin` is only used in error messages
    pub fn read<R: Read>(
        reader: R,
        key: SessionKey,
        format: &LogFormat,
        origin: &Path,
    ) -> Result<Session> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let malformed = |line: u64, reason: String| AnalysisError::Malformed {
            path: origin.to_path_buf(),
            line,
            reason,
        };

        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(malformed(1, "empty header row".to_string()));
        }
        let mut seen = HashSet::new();
        for h in &headers {
            if !seen.insert(h.as_str()) {
                return Err(malformed(1, format!("duplicate column '{h}'")));
            }
        }
        let time_idx = headers
            .iter()
            .position(|h| *h == format.time_column)
            .ok_or_else(|| malformed(1, format!("missing time column '{}'", format.time_column)))?;

        let mut rows = Vec::new();
        for result in csv_reader.records() {
            rows.push(result?);
        }

        // A column is numeric when every non-empty cell parses
        let numeric: Vec<bool> = (0..headers.len())
            .map(|j| {
                rows.iter().all(|row| {
                    let cell = row.get(j).unwrap_or("");
                    cell.is_empty() || cell.parse::<f64>().is_ok()
                })
            })
            .collect();

        let mut fields = Vec::new();
        let mut annotation_columns = Vec::new();
        let mut layout = Vec::with_capacity(headers.len());
        for (j, name) in headers.iter().enumerate() {
            if j == time_idx {
                layout.push(ColumnSlot::Time);
            } else if numeric[j] {
                layout.push(ColumnSlot::Field(fields.len()));
                fields.push(name.clone());
            } else {
                layout.push(ColumnSlot::Annotation(annotation_columns.len()));
                annotation_columns.push(name.clone());
            }
        }
        debug!(?fields, ?annotation_columns, "classified log columns");

        let mut records: Vec<LogRecord> = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            // header is line 1
            let line = i as u64 + 2;
            let mut record = LogRecord {
                time: 0.0,
                values: Vec::with_capacity(fields.len()),
                annotations: Vec::with_capacity(annotation_columns.len()),
            };
            for (j, slot) in layout.iter().enumerate() {
                let cell = row.get(j).unwrap_or("");
                match slot {
                    ColumnSlot::Time => {
                        record.time = cell.parse::<f64>().map_err(|_| {
                            malformed(line, format!("invalid time value '{cell}'"))
                        })?;
                    }
                    ColumnSlot::Field(_) => {
                        let value = if cell.is_empty() {
                            f64::NAN
                        } else {
                            cell.parse::<f64>().unwrap_or(f64::NAN)
                        };
                        record.values.push(value);
                    }
                    ColumnSlot::Annotation(_) => record.annotations.push(cell.to_string()),
                }
            }
            if let Some(prev) = records.last() {
                if record.time < prev.time {
                    return Err(malformed(
                        line,
                        format!("time goes backwards ({} after {})", record.time, prev.time),
                    ));
                }
            }
            records.push(record);
        }

        Ok(Session {
            key,
            source: None,
            time_column: format.time_column.clone(),
            fields,
            annotation_columns,
            layout,
            records,
        })
    }

    /// Where the filtered version of a raw log is written
    pub fn filtered_path(raw_path: &Path, format: &LogFormat) -> PathBuf {
        let dir = raw_path.parent().unwrap_or_else(|| Path::new("."));
        let stem = raw_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = if stem.ends_with(&format.filtered_suffix) {
            format!("{stem}.csv")
        } else {
            format!("{stem}{}.csv", format.filtered_suffix)
        };
        dir.join(&format.filtered_dir).join(name)
    }

    /// Write a filtered session to its place next to `raw_path`, returning that path
    pub fn write_filtered(session: &Session, format: &LogFormat, raw_path: &Path) -> Result<PathBuf> {
        let path = Self::filtered_path(raw_path, format);
        Self::write(session, &path)?;
        Ok(path)
    }

    /// Write a session as CSV to `path`.
    ///
    /// The file is written to a hidden sibling first and renamed into place,
    /// so an interrupted write never leaves a truncated log behind.
    pub fn write(session: &Session, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| AnalysisError::io(dir, e))?;

        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{file_name}.tmp"));

        let written = Self::write_csv(session, &tmp);
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, path).map_err(|e| AnalysisError::io(path, e))?;
        debug!(path = %path.display(), rows = session.len(), "wrote session log");
        Ok(())
    }

    fn write_csv(session: &Session, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| AnalysisError::io(path, e))?;
        let mut writer = csv::Writer::from_writer(file);

        let header: Vec<&str> = session
            .layout
            .iter()
            .map(|slot| match slot {
                ColumnSlot::Time => session.time_column.as_str(),
                ColumnSlot::Field(i) => session.fields[*i].as_str(),
                ColumnSlot::Annotation(i) => session.annotation_columns[*i].as_str(),
            })
            .collect();
        writer.write_record(&header)?;

        for record in &session.records {
            let row: Vec<String> = session
                .layout
                .iter()
                .map(|slot| match slot {
                    ColumnSlot::Time => format_value(record.time),
                    ColumnSlot::Field(i) => format_value(record.values[*i]),
                    ColumnSlot::Annotation(i) => record.annotations[*i].clone(),
                })
                .collect();
            writer.write_record(&row)?;
        }
        writer
            .flush()
            .map_err(|e| AnalysisError::io(path, e))?;
        Ok(())
    }
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// List `*.csv` logs in `dir` whose file name contains `pattern`, sorted by name
pub fn discover_logs(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| AnalysisError::io(dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| AnalysisError::io(dir, e))?.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        let name_matches = path
            .file_name()
            .map(|n| n.to_string_lossy().contains(pattern))
            .unwrap_or(false);
        if path.is_file() && is_csv && name_matches {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const SAMPLE: &str = "time_seconds,time,speed,throttle,brake,steer,heart_rate,breathing_rate\n\
        0,0:00:00,0.00,0.00,0.00,0.00,0.0,0.0\n\
        1,0:00:01,12.50,0.40,0.00,0.01,81.0,17.5\n\
        1,0:00:01.5,12.50,0.40,0.00,0.01,81.0,17.5\n\
        2,0:00:02,14.00,0.55,0.00,-0.02,,18.0\n";

    fn read_sample(text: &str) -> Result<Session> {
        LogStore::read(
            text.as_bytes(),
            SessionKey::from_stem("data_log_ana_night_05-14_1032"),
            &LogFormat::default(),
            Path::new("sample.csv"),
        )
    }

    #[test]
    fn test_read_classifies_columns() {
        let session = read_sample(SAMPLE).unwrap();
        assert_eq!(session.len(), 4);
        assert_eq!(
            session.fields,
            vec!["speed", "throttle", "brake", "steer", "heart_rate", "breathing_rate"]
        );
        assert_eq!(session.annotation_columns, vec!["time"]);
        assert_eq!(session.records[1].values[0], 12.5);
        assert_eq!(session.records[2].annotations[0], "0:00:01.5");
        assert!(session.records[3].values[4].is_nan());
    }

    #[test]
    fn test_missing_time_column_is_malformed() {
        let err = read_sample("speed,heart_rate\n1,2\n").unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed { line: 1, .. }));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_backwards_time_is_malformed() {
        let err = read_sample("time_seconds,speed\n0,1\n2,1\n1,1\n").unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed { line: 4, .. }));
    }

    #[test]
    fn test_duplicate_header_is_malformed() {
        let err = read_sample("time_seconds,speed,speed\n0,1,1\n").unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed { .. }));
    }

    #[test]
    fn test_write_then_load_preserves_layout() {
        let dir = TempDir::new().unwrap();
        let session = read_sample(SAMPLE).unwrap();
        let raw = dir.path().join("data_log_ana_night_05-14_1032.csv");
        let out = LogStore::filtered_path(&raw, &LogFormat::default());
        assert_eq!(
            out,
            dir.path()
                .join("filtered")
                .join("data_log_ana_night_05-14_1032_filtered.csv")
        );

        LogStore::write(&session, &out).unwrap();
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.starts_with(
            "time_seconds,time,speed,throttle,brake,steer,heart_rate,breathing_rate\n"
        ));

        let loaded = LogStore::load(&out, &LogFormat::default()).unwrap();
        assert_eq!(loaded.len(), session.len());
        assert_eq!(loaded.fields, session.fields);
        assert_eq!(loaded.records[1], session.records[1]);
        assert!(loaded.records[3].values[4].is_nan());
        assert_eq!(loaded.key.scenario.as_deref(), Some("night"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = LogStore::load(Path::new("/nonexistent/log.csv"), &LogFormat::default())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Io { .. }));
    }

    #[test]
    fn test_discover_logs_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in [
            "data_log_b_night_01-01_1000.csv",
            "data_log_a_night_01-01_0900.csv",
            "data_log_a_default_01-01_0800.csv",
            "notes_night.txt",
        ] {
            fs::write(dir.path().join(name), "time_seconds\n0\n").unwrap();
        }
        let found = discover_logs(dir.path(), "night").unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "data_log_a_night_01-01_0900.csv",
                "data_log_b_night_01-01_1000.csv"
            ]
        );
    }
}
