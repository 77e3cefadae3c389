//! End-to-end scenarios over the public API

use std::fs;
use std::path::PathBuf;

use drivestate::cluster::Algorithm;
use drivestate::config::{AnalysisConfig, DbscanParams, KSearchParams};
use drivestate::types::{FeatureMatrix, Label, LogRecord, Session, SessionKey};
use drivestate::{
    clean_log, discover_logs, Cleaner, ClusterEngine, ClusterPipeline, ErrorKind, LogStore, Pca,
};
use pretty_assertions::assert_eq;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tempfile::TempDir;

fn blobs() -> FeatureMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let noise = Normal::new(0.0, 0.5).unwrap();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for center in [[0.0, 80.0, 20.0], [5.0, 95.0, 15.0]] {
        for _ in 0..50 {
            rows.push(center.iter().map(|c| c + noise.sample(&mut rng)).collect());
        }
    }
    FeatureMatrix::from_rows(&["speed", "heart_rate", "breathing_rate"], &rows).unwrap()
}

#[test]
fn two_blobs_split_cleanly_with_dbscan() {
    let matrix = blobs();
    let algorithm = Algorithm::Dbscan(DbscanParams {
        radius: 3.0,
        min_points: 5,
        require_cluster: true,
    });
    let assignment = ClusterEngine::cluster(&matrix, &algorithm).unwrap();

    assert_eq!(assignment.n_clusters, 2);
    assert_eq!(assignment.noise_count(), 0);
    assert!(assignment.labels[..50].iter().all(|l| *l == Label::Cluster(0)));
    assert!(assignment.labels[50..].iter().all(|l| *l == Label::Cluster(1)));
}

#[test]
fn auto_k_agrees_between_parallel_and_sequential() {
    let matrix = blobs().standardize();
    let sequential = KSearchParams {
        k_max: 5,
        seed: 3,
        ..KSearchParams::default()
    };
    let parallel = KSearchParams {
        parallel: true,
        workers: 4,
        ..sequential.clone()
    };

    let a = ClusterEngine::cluster(&matrix, &Algorithm::KMeansAuto(sequential)).unwrap();
    let b = ClusterEngine::cluster(&matrix, &Algorithm::KMeansAuto(parallel)).unwrap();
    assert_eq!(a.selection.as_ref().map(|s| s.chosen_k), Some(2));
    assert_eq!(a.labels, b.labels);
    assert_eq!(a.selection, b.selection);
}

#[test]
fn repeated_ticks_collapse_to_two_rows() {
    let mut records: Vec<LogRecord> = (0..10)
        .map(|i| LogRecord {
            time: i as f64 * 0.1,
            values: vec![12.0, 75.0, 16.0],
            annotations: vec![],
        })
        .collect();
    records.push(LogRecord {
        time: 1.0,
        values: vec![13.0, 76.0, 16.0],
        annotations: vec![],
    });
    let session = Session::new(
        SessionKey::from_stem("data_log_ana_default_05-14_1032"),
        "time_seconds",
        vec![
            "speed".to_string(),
            "heart_rate".to_string(),
            "breathing_rate".to_string(),
        ],
        records,
    )
    .unwrap();

    let cleaned = Cleaner::clean(&session, false).unwrap();
    assert_eq!(cleaned.len(), 2);
    assert_eq!(cleaned.summary.dropped_duplicates, 9);

    let again = Cleaner::clean(&cleaned.session, false).unwrap();
    assert_eq!(again.session, cleaned.session);
}

#[test]
fn pca_component_count_is_validated() {
    let matrix = blobs();
    assert_eq!(Pca::reduce(&matrix, 0).unwrap_err().kind(), ErrorKind::Config);
    assert_eq!(Pca::reduce(&matrix, 4).unwrap_err().kind(), ErrorKind::Config);
    assert_eq!(Pca::reduce(&matrix, 3).unwrap().matrix.n_cols(), 3);
}

fn write_log(dir: &std::path::Path, name: &str, rows: &[(f64, f64, f64, f64)]) -> PathBuf {
    let mut body = String::from("time_seconds,time,speed,heart_rate,breathing_rate\n");
    for (t, speed, hr, br) in rows {
        body.push_str(&format!("{t},12:00:00,{speed},{hr},{br}\n"));
    }
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn clean_then_cluster_from_disk() {
    let dir = TempDir::new().unwrap();
    let calm: Vec<_> = (0..20)
        .map(|i| (i as f64, 10.0 + (i % 3) as f64 * 0.1, 70.0 + (i % 2) as f64, 14.0))
        .collect();
    let busy: Vec<_> = (0..20)
        .map(|i| (i as f64, 40.0 + (i % 3) as f64 * 0.1, 100.0 + (i % 2) as f64, 22.0))
        .collect();
    let a = write_log(dir.path(), "data_log_ana_default_05-14_1032.csv", &calm);
    let b = write_log(dir.path(), "data_log_ana_congestion_05-14_1100.csv", &busy);

    let config = AnalysisConfig::default();
    clean_log(&a, &config).unwrap();
    clean_log(&b, &config).unwrap();

    let filtered = discover_logs(&dir.path().join("filtered"), "ana").unwrap();
    assert_eq!(filtered.len(), 2);
    let sessions = drivestate::pipeline::load_filtered(&filtered, &config).unwrap();
    let total: usize = sessions.iter().map(|s| s.len()).sum();

    let algorithm = Algorithm::KMeans {
        k: 2,
        params: KSearchParams::default(),
    };
    let run = ClusterPipeline::new(config, algorithm)
        .unwrap()
        .run(&sessions)
        .unwrap();

    assert_eq!(run.features.n_rows(), total);
    assert_eq!(run.report.n_clusters, 2);
    // every session falls entirely into one cluster
    for breakdown in &run.report.sessions {
        assert_eq!(breakdown.labels.len(), 1, "{}", breakdown.session);
    }

    // filtered output round-trips through the store
    let reloaded = LogStore::load(&filtered[0], &AnalysisConfig::default().log_format).unwrap();
    assert_eq!(reloaded.annotation_columns, vec!["time".to_string()]);
}

#[test]
fn missing_feature_column_is_schema_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data_log_bo_night_05-14_1032.csv");
    fs::write(&path, "time_seconds,speed,heart_rate\n0,1,70\n1,2,71\n").unwrap();

    let config = AnalysisConfig::default();
    let sessions = drivestate::pipeline::load_filtered(&[path], &config).unwrap();
    let err = ClusterPipeline::new(config, Algorithm::Dbscan(DbscanParams::default()))
        .unwrap()
        .run(&sessions)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert!(err.to_string().contains("breathing_rate"));
}
