use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use wattwatch::analysis::runner::{self, Pipeline, RunSummary};
use wattwatch::analysis::stats::{moving_average, ForecastStats};
use wattwatch::config::Settings;
use wattwatch::detect::anomaly::SeverityPreset;
use wattwatch::detect::incident;
use wattwatch::detect::Incident;
use wattwatch::ingest::attack::{self, Attack};
use wattwatch::ingest::csv::{parse_timestamp, CsvSource, DATE_FORMAT};
use wattwatch::ingest::poll::HttpPoller;
use wattwatch::ingest::synthetic::SyntheticSource;
use wattwatch::ingest::SampleSource;
use wattwatch::storage::results::{read_results, CsvResultWriter, ResultRow};
use wattwatch::storage::{self, OutcomeSink, SqliteSink};

#[derive(Parser)]
#[command(
    name = "wattwatch",
    about = "Online power forecasting and anomaly detection for building telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $WATTWATCH_CONFIG, then ./wattwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast and score a telemetry CSV (timestamp, features..., target)
    Analyze {
        /// Input CSV, or - for stdin
        input: PathBuf,

        /// Results file to write
        #[arg(long, default_value = "results.csv")]
        output: PathBuf,

        /// Also record the run in this SQLite database
        #[arg(long)]
        db: Option<String>,

        /// Inject an attack while reading: START,MINUTES,WATTS (repeatable)
        #[arg(long = "attack")]
        attacks: Vec<Attack>,

        #[command(flatten)]
        tuning: Tuning,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Poll a live sensor endpoint once per granularity period
    Poll {
        /// Endpoint returning {"timestamp"?, "features": [...], "target"}
        #[arg(long)]
        url: String,

        /// Align ticks to multiples of the granularity
        #[arg(long)]
        align: bool,

        /// Stop after this many readings
        #[arg(long)]
        max_ticks: Option<u64>,

        /// Results file to write
        #[arg(long)]
        output: Option<PathBuf>,

        /// Record the run in this SQLite database
        #[arg(long)]
        db: Option<String>,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Write a copy of a telemetry CSV with an attack added to the target
    Attack {
        input: PathBuf,
        output: PathBuf,

        /// Attack start (epoch seconds or "YYYY-MM-DD HH:MM:SS")
        #[arg(long)]
        start: String,

        /// Duration in minutes
        #[arg(long)]
        minutes: f64,

        /// Load added to the target
        #[arg(long)]
        watts: f64,
    },

    /// Accuracy and incident report of an existing results file or stored run
    Report {
        /// Results CSV
        results: Option<PathBuf>,

        /// Read a stored run from this database instead (needs --run)
        #[arg(long, requires = "run")]
        db: Option<String>,

        /// Run id inside --db
        #[arg(long)]
        run: Option<String>,

        /// Moving-average window applied to predictions
        #[arg(long, default_value = "1")]
        smooth: usize,

        /// Ticks per incident block
        #[arg(long)]
        block: Option<usize>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List runs recorded in a database
    Runs {
        #[arg(long)]
        db: String,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Run the engine over seeded synthetic telemetry
    Simulate {
        /// True weights, comma separated
        #[arg(long, value_delimiter = ',', default_value = "3,-1,0.5")]
        weights: Vec<f64>,

        /// Noise standard deviation
        #[arg(long, default_value = "1.0")]
        noise: f64,

        #[arg(long, default_value = "5000")]
        ticks: u64,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Inject an attack: START,MINUTES,WATTS (repeatable)
        #[arg(long = "attack")]
        attacks: Vec<Attack>,

        /// Results file to write
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Command-line overrides of the config file.
#[derive(Args)]
struct Tuning {
    /// EWMA preset: smooth, balanced or raw
    #[arg(long)]
    preset: Option<SeverityPreset>,

    /// Input smoothing weight in (0, 1]
    #[arg(long)]
    ema_alpha: Option<f64>,

    /// Window length in retraining intervals
    #[arg(long)]
    training_window: Option<usize>,

    /// Ticks between retraining attempts
    #[arg(long)]
    training_interval: Option<usize>,
}

impl Tuning {
    fn apply(&self, settings: &mut Settings) {
        if let Some(preset) = self.preset {
            settings.severity.preset = preset;
            settings.severity.decay_weight = None;
            settings.severity.control_multiplier = None;
        }
        if let Some(a) = self.ema_alpha {
            settings.smoothing.ema_alpha = a;
        }
        if let Some(w) = self.training_window {
            settings.engine.training_window = w;
        }
        if let Some(i) = self.training_interval {
            settings.engine.training_interval = i;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut settings = Settings::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            input,
            output,
            db,
            attacks,
            tuning,
            json,
        } => {
            tuning.apply(&mut settings);
            tracing::info!(input = %input.display(), output = %output.display(), "Analyzing telemetry");

            let mut source = CsvSource::open(&input)?;
            let mut csv_sink = CsvResultWriter::create(&output)?;
            let summary = execute(
                &mut source,
                &settings,
                attacks,
                &input.display().to_string(),
                db.as_deref(),
                Some(&mut csv_sink),
            )
            .await?;
            if source.skipped() > 0 {
                tracing::warn!(rows = source.skipped(), "Skipped malformed input rows");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
                println!("Results written to {}", output.display());
            }
        }
        Commands::Poll {
            url,
            align,
            max_ticks,
            output,
            db,
            tuning,
        } => {
            tuning.apply(&mut settings);
            let period = Duration::from_secs(60 * u64::from(settings.engine.granularity_minutes));
            tracing::info!(%url, ?period, align, "Starting live polling");

            let mut source = HttpPoller::connect(&url, period, align)
                .await?
                .with_max_ticks(max_ticks);
            let mut csv_sink = match &output {
                Some(path) => Some(CsvResultWriter::create(path)?),
                None => None,
            };

            let summary = tokio::select! {
                res = execute(&mut source, &settings, Vec::new(), &url, db.as_deref(), csv_sink.as_mut()) => res?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, stopping poller");
                    return Ok(());
                }
            };
            print_summary(&summary);
        }
        Commands::Attack {
            input,
            output,
            start,
            minutes,
            watts,
        } => {
            let start = parse_timestamp(&start)
                .with_context(|| format!("invalid attack start '{}'", start))?;
            if !(minutes > 0.0) {
                bail!("attack duration must be positive");
            }
            let attack = Attack {
                start,
                minutes,
                watts,
            };
            let altered = attack::inject_file(&input, &output, &[attack])?;
            println!(
                "Injected {} W for {} min into {} rows -> {}",
                watts,
                minutes,
                altered,
                output.display()
            );
        }
        Commands::Report {
            results,
            db,
            run,
            smooth,
            block,
            json,
        } => {
            let rows: Vec<ResultRow> = match (&db, &run, &results) {
                (Some(db), Some(run), _) => {
                    let pool = storage::open_pool(db)?;
                    storage::load_results(&pool, run)?
                        .iter()
                        .map(ResultRow::from)
                        .collect()
                }
                (None, _, Some(path)) => read_results(path)?,
                _ => bail!("give a results file, or --db together with --run"),
            };
            let block = block.unwrap_or(settings.report.incident_block);
            print_report(&rows, smooth, block, json)?;
        }
        Commands::Runs { db, limit } => {
            let pool = storage::open_pool(&db)?;
            let runs = storage::list_runs(&pool, limit)?;
            if runs.is_empty() {
                println!("No runs recorded.");
            } else {
                println!("{:<36} | {:<25} | Source", "Run", "Started");
                println!("{:-<36}-|-{:-<25}-|-{:-<30}", "", "", "");
                for (id, source, started) in runs {
                    println!("{:<36} | {:<25} | {}", id, started, source);
                }
            }
        }
        Commands::Simulate {
            weights,
            noise,
            ticks,
            seed,
            attacks,
            output,
            tuning,
        } => {
            tuning.apply(&mut settings);
            if weights.is_empty() {
                bail!("at least one weight is required");
            }
            let period = 60.0 * f64::from(settings.engine.granularity_minutes);
            let mut source = SyntheticSource::new(weights, noise, ticks, seed).with_period(period);
            let mut csv_sink = match &output {
                Some(path) => Some(CsvResultWriter::create(path)?),
                None => None,
            };
            let summary = execute(
                &mut source,
                &settings,
                attacks,
                "synthetic",
                None,
                csv_sink.as_mut(),
            )
            .await?;
            print_summary(&summary);
        }
        Commands::Config => {
            print!("{}", settings.to_toml()?);
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wire a source through a fresh engine into the requested sinks.
async fn execute(
    source: &mut dyn SampleSource,
    settings: &Settings,
    attacks: Vec<Attack>,
    label: &str,
    db: Option<&str>,
    csv_sink: Option<&mut CsvResultWriter>,
) -> Result<RunSummary> {
    let mut engine = runner::engine_for(source, settings)?;
    let mut pipeline = Pipeline::from_settings(settings, attacks)?;

    let mut db_sink = match db {
        Some(path) => {
            let pool = storage::open_pool(path)?;
            Some(SqliteSink::begin(pool, label, &serde_json::to_value(settings)?)?)
        }
        None => None,
    };

    let mut sinks: Vec<&mut dyn OutcomeSink> = Vec::new();
    if let Some(s) = csv_sink {
        sinks.push(s);
    }
    if let Some(s) = db_sink.as_mut() {
        sinks.push(s);
    }

    runner::run(source, &mut engine, &mut pipeline, &mut sinks).await
}

fn fmt_ts(ts: f64) -> String {
    chrono::DateTime::from_timestamp(ts as i64, 0)
        .map(|dt| dt.format(DATE_FORMAT).to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn print_stats(stats: &ForecastStats) {
    println!("Forecasts:  {}", stats.count);
    println!("RMSE:       {:.3}", stats.rmse);
    println!("MAE:        {:.3}", stats.mae);
    println!("Mean:       {:.3}", stats.mean_target);
    println!("NRMSE:      {:.2}%", 100.0 * stats.normalized_rmse);
}

fn print_incidents(incidents: &[Incident]) {
    if incidents.is_empty() {
        println!("\nNo incidents.");
        return;
    }
    println!("\n{:<10} | {:<19} | {:<19} | Anomalies", "Severity", "Start", "End");
    println!("{:-<10}-|-{:-<19}-|-{:-<19}-|-{:-<9}", "", "", "", "");
    for i in incidents {
        println!(
            "{:<10} | {:<19} | {:<19} | {}/{}",
            i.severity.to_string().to_uppercase(),
            fmt_ts(i.start),
            fmt_ts(i.end),
            i.anomaly_count,
            i.ticks
        );
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== WattWatch Run Summary ===");
    println!("Ticks:      {}", summary.ticks);
    print_stats(&summary.stats);
    println!("Anomalies:  {}", summary.anomalies);
    if let Some(d) = &summary.detection {
        println!("\nAttack detection:");
        println!(" - attacked ticks: {}", d.ground_truth);
        println!(" - detected:       {} ({} correct)", d.detected, d.true_positives);
        println!(" - precision:      {:.3}", d.precision);
        println!(" - recall:         {:.3}", d.recall);
        println!(" - F1:             {:.3}", d.f1);
    }
    print_incidents(&summary.incidents);
    println!("=============================\n");
}

fn print_report(rows: &[ResultRow], smooth: usize, block: usize, json: bool) -> Result<()> {
    let targets: Vec<f64> = rows.iter().map(|r| r.target).collect();
    let predictions: Vec<f64> = rows.iter().map(|r| r.prediction).collect();
    let raw = ForecastStats::compute(&targets, &predictions);
    let smoothed = (smooth > 1)
        .then(|| ForecastStats::compute(&targets, &moving_average(&predictions, smooth)));
    let incidents = incident::summarize(rows, block);

    if json {
        let out = serde_json::json!({
            "stats": raw,
            "smoothed": smoothed,
            "incidents": incidents,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("\n=== WattWatch Report ===");
    print_stats(&raw);
    if let Some(s) = &smoothed {
        println!("\nWith {}-tick moving average:", smooth);
        print_stats(s);
    }
    let flagged = rows.iter().filter(|r| r.anomaly == Some(true)).count();
    if rows.iter().all(|r| r.anomaly.is_none()) {
        println!("\nNo anomaly column in results.");
    } else {
        println!("Anomalies:  {}", flagged);
        print_incidents(&incidents);
    }
    println!("========================\n");
    Ok(())
}
