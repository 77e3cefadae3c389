//! Drivestate CLI - command-line interface for drivestate
//!
//! Commands:
//! - clean: Drop repeated ticks (and optionally repair sensor dropouts) in raw logs
//! - plot: Export time series of selected columns for an external plotter
//! - cluster: Cluster filtered sessions with DBSCAN or k-means++
//! - summary: Per-scenario distribution summaries of selected columns

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use drivestate::cluster::Algorithm;
use drivestate::config::{AnalysisConfig, ValidityMetric};
use drivestate::pipeline::{self, CleanOutcome, ClusterPipeline};
use drivestate::report::{self, distribution_summary, render_text, scatter_points, time_series};
use drivestate::{discover_logs, AnalysisError, DRIVESTATE_VERSION};

/// Drivestate - behavioral clustering of driving-simulator sessions
#[derive(Parser)]
#[command(name = "drivestate")]
#[command(version = DRIVESTATE_VERSION)]
#[command(about = "Clean and cluster driving-simulator telemetry logs", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the raw session logs
    #[arg(long, global = true, default_value = "logs")]
    logs_dir: PathBuf,

    /// JSON configuration file (flags override its values)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write filtered copies of raw logs
    Clean {
        /// Directory to scan for raw logs (defaults to --logs-dir)
        #[arg(long, conflicts_with = "file")]
        dir: Option<PathBuf>,

        /// Clean a single log file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Only clean logs whose file name contains this text
        #[arg(long, default_value = "")]
        pattern: String,

        /// Interpolate zero-sentinel heart/breathing-rate dropouts
        #[arg(long)]
        interpolate: bool,

        /// Largest per-field difference still treated as a repeated tick
        #[arg(long)]
        tolerance: Option<f64>,

        /// Print cleaning summaries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export selected columns of a log against time as CSV
    Plot {
        /// Log file to plot
        file: PathBuf,

        /// Columns to export
        #[arg(long, num_args = 1.., required = true)]
        columns: Vec<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Cluster filtered sessions matching one or more patterns
    Cluster(ClusterArgs),

    /// Per-scenario distribution of columns across matching sessions
    Summary {
        /// File name patterns selecting filtered sessions
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Columns to summarize
        #[arg(long, num_args = 1.., required = true)]
        columns: Vec<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ClusterArgs {
    /// File name patterns selecting filtered sessions
    #[arg(required = true)]
    patterns: Vec<String>,

    #[arg(long, value_enum, default_value = "dbscan")]
    algorithm: AlgorithmChoice,

    /// Feature columns (defaults to speed, heart_rate, breathing_rate)
    #[arg(long, num_args = 1..)]
    columns: Option<Vec<String>>,

    /// Reduce to this many principal components before clustering
    #[arg(long)]
    pca: Option<usize>,

    /// Cluster raw feature values instead of z-scores
    #[arg(long)]
    no_standardize: bool,

    /// DBSCAN neighbourhood radius
    #[arg(long)]
    radius: Option<f64>,

    /// DBSCAN minimum neighbourhood size
    #[arg(long)]
    min_points: Option<usize>,

    /// Fail if DBSCAN labels every row as noise
    #[arg(long)]
    require_cluster: bool,

    /// Fixed cluster count for k-means (skips the search)
    #[arg(long)]
    k: Option<usize>,

    /// Smallest candidate cluster count
    #[arg(long)]
    k_min: Option<usize>,

    /// Largest candidate cluster count
    #[arg(long)]
    k_max: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Evaluate candidate cluster counts in parallel
    #[arg(long)]
    parallel: bool,

    /// Worker threads for --parallel
    #[arg(long)]
    workers: Option<usize>,

    /// Metric used to choose the cluster count
    #[arg(long, value_enum)]
    metric: Option<MetricChoice>,

    /// Write scatter points (session, time, coordinates, label) as CSV
    #[arg(long)]
    scatter: Option<PathBuf>,

    /// Column indices plotted by --scatter (2 or 3)
    #[arg(long, num_args = 2..=3, default_values_t = [0, 1])]
    axes: Vec<usize>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmChoice {
    Dbscan,
    Kmeans,
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricChoice {
    Silhouette,
    CalinskiHarabasz,
}

impl From<MetricChoice> for ValidityMetric {
    fn from(m: MetricChoice) -> Self {
        match m {
            MetricChoice::Silhouette => ValidityMetric::Silhouette,
            MetricChoice::CalinskiHarabasz => ValidityMetric::CalinskiHarabasz,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(io::stderr)
                .with_ansi(atty::is(atty::Stream::Stderr)),
        )
        .with(filter)
        .init();
}

fn run(cli: Cli) -> Result<(), DrivestateCliError> {
    let config = match &cli.config {
        Some(path) => AnalysisConfig::from_json_file(path)?,
        None => AnalysisConfig::default(),
    };

    match cli.command {
        Commands::Clean {
            dir,
            file,
            pattern,
            interpolate,
            tolerance,
            json,
        } => {
            let dir = dir.unwrap_or_else(|| cli.logs_dir.clone());
            cmd_clean(config, &dir, file, &pattern, interpolate, tolerance, json)
        }

        Commands::Plot {
            file,
            columns,
            output,
        } => cmd_plot(&config, &file, &columns, output.as_deref()),

        Commands::Cluster(args) => cmd_cluster(config, &cli.logs_dir, args),

        Commands::Summary {
            patterns,
            columns,
            json,
        } => cmd_summary(&config, &cli.logs_dir, &patterns, &columns, json),
    }
}

fn cmd_clean(
    mut config: AnalysisConfig,
    dir: &Path,
    file: Option<PathBuf>,
    pattern: &str,
    interpolate: bool,
    tolerance: Option<f64>,
    json: bool,
) -> Result<(), DrivestateCliError> {
    config.cleaner.interpolate |= interpolate;
    if let Some(t) = tolerance {
        config.cleaner.duplicate_tolerance = t;
    }
    config.validate()?;

    let paths = match file {
        Some(f) => vec![f],
        None => discover_logs(dir, pattern)?,
    };
    if paths.is_empty() {
        return Err(DrivestateCliError::NoLogs(format!(
            "no logs in '{}' match '{pattern}'",
            dir.display()
        )));
    }

    let outcomes = pipeline::clean_logs(&paths, &config)?;
    if json {
        let summaries: Vec<serde_json::Value> = outcomes.iter().map(outcome_json).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for o in &outcomes {
            println!(
                "{} -> {} ({} of {} rows kept, {} values interpolated, {} gaps left)",
                o.source.display(),
                o.output.display(),
                o.filtered.len(),
                o.filtered.summary.source_rows,
                o.filtered.summary.interpolated_values,
                o.filtered.summary.uncorrected_gaps.len()
            );
        }
    }
    Ok(())
}

fn outcome_json(outcome: &CleanOutcome) -> serde_json::Value {
    serde_json::json!({
        "source": outcome.source,
        "output": outcome.output,
        "rows": outcome.filtered.len(),
        "summary": outcome.filtered.summary,
    })
}

fn cmd_plot(
    config: &AnalysisConfig,
    file: &Path,
    columns: &[String],
    output: Option<&Path>,
) -> Result<(), DrivestateCliError> {
    let sessions = pipeline::load_filtered(&[file.to_path_buf()], config)?;
    let session = sessions
        .first()
        .ok_or_else(|| DrivestateCliError::NoLogs(format!("could not load '{}'", file.display())))?;
    let series = time_series(session, columns)?;

    match output {
        Some(path) => {
            let out = File::create(path)?;
            series.write_csv(out)?;
        }
        None => series.write_csv(io::stdout().lock())?,
    }
    Ok(())
}

/// Reject flags that do not apply to the selected algorithm
fn check_cluster_flags(args: &ClusterArgs) -> Result<(), DrivestateCliError> {
    let (name, misplaced): (&str, Vec<(bool, &str)>) = match args.algorithm {
        AlgorithmChoice::Dbscan => (
            "dbscan",
            vec![
                (args.k.is_some(), "--k"),
                (args.k_min.is_some(), "--k-min"),
                (args.k_max.is_some(), "--k-max"),
                (args.seed.is_some(), "--seed"),
                (args.parallel, "--parallel"),
                (args.workers.is_some(), "--workers"),
                (args.metric.is_some(), "--metric"),
            ],
        ),
        AlgorithmChoice::Kmeans => (
            "kmeans",
            vec![
                (args.radius.is_some(), "--radius"),
                (args.min_points.is_some(), "--min-points"),
                (args.require_cluster, "--require-cluster"),
            ],
        ),
    };
    let flags: Vec<&str> = misplaced.into_iter().filter(|(set, _)| *set).map(|(_, f)| f).collect();
    if !flags.is_empty() {
        return Err(DrivestateCliError::Usage(format!(
            "{} cannot be used with --algorithm {name}",
            flags.join(", ")
        )));
    }
    if args.workers.is_some() && !args.parallel {
        return Err(DrivestateCliError::Usage("--workers requires --parallel".to_string()));
    }
    if args.k.is_some() && (args.k_min.is_some() || args.k_max.is_some() || args.metric.is_some()) {
        return Err(DrivestateCliError::Usage(
            "--k fixes the cluster count; drop --k-min, --k-max and --metric".to_string(),
        ));
    }
    if args.scatter.is_none() && args.axes != [0, 1] {
        return Err(DrivestateCliError::Usage("--axes requires --scatter".to_string()));
    }
    Ok(())
}

fn cmd_cluster(mut config: AnalysisConfig, logs_dir: &Path, args: ClusterArgs) -> Result<(), DrivestateCliError> {
    check_cluster_flags(&args)?;

    if let Some(columns) = args.columns.clone() {
        config.features = columns;
    }
    if args.pca.is_some() {
        config.pca_components = args.pca;
    }
    if args.no_standardize {
        config.standardize = false;
    }

    let algorithm = match args.algorithm {
        AlgorithmChoice::Dbscan => {
            let mut params = config.dbscan.clone();
            params.radius = args.radius.unwrap_or(params.radius);
            params.min_points = args.min_points.unwrap_or(params.min_points);
            params.require_cluster |= args.require_cluster;
            config.dbscan = params.clone();
            Algorithm::Dbscan(params)
        }
        AlgorithmChoice::Kmeans => {
            let mut params = config.kmeans.clone();
            params.k_min = args.k_min.unwrap_or(params.k_min);
            params.k_max = args.k_max.unwrap_or(params.k_max);
            params.seed = args.seed.unwrap_or(params.seed);
            params.parallel |= args.parallel;
            params.workers = args.workers.unwrap_or(params.workers);
            if let Some(metric) = args.metric {
                params.metric = metric.into();
            }
            config.kmeans = params.clone();
            match args.k {
                Some(k) => Algorithm::KMeans { k, params },
                None => Algorithm::KMeansAuto(params),
            }
        }
    };

    let paths = resolve_filtered(&config, logs_dir, &args.patterns)?;
    let sessions = pipeline::load_filtered(&paths, &config)?;
    let run = ClusterPipeline::new(config, algorithm)?.run(&sessions)?;

    if let Some(path) = &args.scatter {
        // projected coordinates when reduced, original units otherwise
        let matrix = if run.reduced.is_some() {
            &run.clustered
        } else {
            &run.features
        };
        let points = scatter_points(matrix, &run.assignment, &args.axes)?;
        let names: Vec<&str> = args.axes.iter().map(|&a| matrix.columns[a].as_str()).collect();
        let out = File::create(path)?;
        report::write_scatter(out, &names, &points)?;
    }

    if args.json {
        println!("{}", run.report.to_json()?);
    } else {
        print!("{}", render_text(&run.report));
    }
    Ok(())
}

fn cmd_summary(
    config: &AnalysisConfig,
    logs_dir: &Path,
    patterns: &[String],
    columns: &[String],
    json: bool,
) -> Result<(), DrivestateCliError> {
    let paths = resolve_filtered(config, logs_dir, patterns)?;
    let sessions = pipeline::load_filtered(&paths, config)?;

    let mut summaries = Vec::new();
    for column in columns {
        summaries.extend(distribution_summary(&sessions, column)?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    let mut stdout = io::stdout().lock();
    writeln!(
        stdout,
        "{:<16} {:<16} {:>7} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "column", "group", "count", "mean", "min", "q1", "median", "q3", "max"
    )?;
    for s in &summaries {
        writeln!(
            stdout,
            "{:<16} {:<16} {:>7} {:>9.2} {:>9.2} {:>9.2} {:>9.2} {:>9.2} {:>9.2}",
            s.column, s.group, s.count, s.mean, s.min, s.q1, s.median, s.q3, s.max
        )?;
    }
    Ok(())
}

/// Filtered logs under `<logs_dir>/<filtered_dir>` matching any pattern
fn resolve_filtered(
    config: &AnalysisConfig,
    logs_dir: &Path,
    patterns: &[String],
) -> Result<Vec<PathBuf>, DrivestateCliError> {
    let dir = logs_dir.join(&config.log_format.filtered_dir);
    let mut paths: Vec<PathBuf> = Vec::new();
    for pattern in patterns {
        for path in discover_logs(&dir, pattern)? {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    if paths.is_empty() {
        return Err(DrivestateCliError::NoLogs(format!(
            "no filtered logs in '{}' match {}",
            dir.display(),
            patterns.join(", ")
        )));
    }
    Ok(paths)
}

// Error types

#[derive(Debug)]
enum DrivestateCliError {
    Analysis(AnalysisError),
    Io(io::Error),
    Json(serde_json::Error),
    Usage(String),
    NoLogs(String),
}

impl From<AnalysisError> for DrivestateCliError {
    fn from(e: AnalysisError) -> Self {
        DrivestateCliError::Analysis(e)
    }
}

impl From<io::Error> for DrivestateCliError {
    fn from(e: io::Error) -> Self {
        DrivestateCliError::Io(e)
    }
}

impl From<serde_json::Error> for DrivestateCliError {
    fn from(e: serde_json::Error) -> Self {
        DrivestateCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<DrivestateCliError> for CliError {
    fn from(e: DrivestateCliError) -> Self {
        match e {
            DrivestateCliError::Analysis(e) => {
                let kind = e.kind();
                let hint = match kind {
                    drivestate::ErrorKind::Schema => "Check --columns against the log header",
                    drivestate::ErrorKind::Config => "Check flag values and the --config file",
                    drivestate::ErrorKind::Data => "Select more sessions or relax the parameters",
                    drivestate::ErrorKind::Io => "Check file paths, permissions and CSV contents",
                };
                CliError {
                    code: kind.as_str().to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            DrivestateCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            DrivestateCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            DrivestateCliError::Usage(msg) => CliError {
                code: "USAGE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'drivestate cluster --help'".to_string()),
            },
            DrivestateCliError::NoLogs(msg) => CliError {
                code: "NO_LOGS".to_string(),
                message: msg,
                hint: Some("Run 'drivestate clean' first or check --logs-dir".to_string()),
            },
        }
    }
}
