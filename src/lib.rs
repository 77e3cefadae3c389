//! Drivestate - offline analysis of driving-simulator sessions
//!
//! Drivestate turns per-session telemetry and biometric logs into behavioral
//! regimes through a deterministic pipeline: log loading → cleaning → feature
//! matrix assembly → optional PCA → clustering → reporting.
//!
//! ## Modules
//!
//! - **Cleaning**: drop repeated simulator ticks and repair zero-sentinel
//!   sensor dropouts ([`Cleaner`], [`pipeline::clean_log`])
//! - **Clustering**: DBSCAN and k-means++ with automatic cluster-count search
//!   ([`ClusterEngine`], [`ClusterPipeline`])

pub mod cleaner;
pub mod cluster;
pub mod config;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod reducer;
pub mod report;
pub mod store;
pub mod types;

pub use cleaner::Cleaner;
pub use cluster::{Algorithm, ClusterEngine, Clusterer};
pub use config::AnalysisConfig;
pub use error::{AnalysisError, ErrorKind};
pub use features::FeatureMatrixBuilder;
pub use pipeline::{clean_log, clean_logs, ClusterPipeline, ClusterRun};
pub use reducer::Pca;
pub use report::{ClusterReport, Reporter};
pub use store::{discover_logs, LogStore};

/// Drivestate version recorded in every report
pub const DRIVESTATE_VERSION: &str = env!("CARGO_PKG_VERSION");
