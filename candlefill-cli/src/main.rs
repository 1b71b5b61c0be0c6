//! candlefill CLI: table setup, API backfill, local CSV import, status.
//!
//! Commands:
//! - `init`: create the target table if missing
//! - `run`: backfill or import, whichever `mode` the config selects
//! - `backfill [SYMBOLS...]`: fetch missing history from the chart API
//! - `import [--dir DIR] [--group-size N]`: ingest a directory of CSV files
//! - `status [SYMBOLS...]`: watermark and row range per ticker

use anyhow::{bail, Context, Result};
use candlefill_core::data::{CircuitBreaker, Universe, YahooProvider};
use candlefill_core::ingest::TracingObserver;
use candlefill_core::store::{ParquetStore, StoreDriver, WatermarkStore};
use candlefill_runner::{
    CsvDirectorySource, IngestConfig, IngestPipeline, PipelineSettings, RunSummary, SourceMode,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "candlefill", about = "Incremental OHLCV history ingestion")]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (overridden by CANDLEFILL_LOG).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format: text or json.
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the target table if it does not exist.
    Init,
    /// Ingest using the source selected by the config's `mode`.
    Run,
    /// Backfill from the chart API for the universe or the given symbols.
    Backfill {
        /// Symbols to backfill (default: the whole universe).
        symbols: Vec<String>,
    },
    /// Import CSV files from a local directory.
    Import {
        /// Directory of `{SYMBOL}.csv` files. Defaults to `local.dir`.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Files per group; 0 imports the whole directory as one group.
        #[arg(long)]
        group_size: Option<usize>,
    },
    /// Show watermark, row count and range per ticker.
    Status {
        /// Symbols to report (default: every ticker in the table).
        symbols: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, &cli.log_format)?;

    let config = IngestConfig::load(cli.config.as_deref())
        .with_context(|| "loading configuration".to_string())?;
    tracing::info!(
        mode = %config.mode,
        table = %config.table,
        store = %config.store.root.display(),
        "configuration loaded"
    );
    let store = ParquetStore::new(&config.store.root);

    let summary = match cli.command {
        Commands::Init => return run_init(&store, &config),
        Commands::Status { symbols } => return run_status(&store, &config, &symbols),
        Commands::Run => match config.mode {
            SourceMode::Api => run_backfill(&store, &config, &[])?,
            SourceMode::Local => run_import(&store, &config, None, None)?,
        },
        Commands::Backfill { symbols } => run_backfill(&store, &config, &symbols)?,
        Commands::Import { dir, group_size } => run_import(&store, &config, dir, group_size)?,
    };

    report(&summary);
    if !summary.all_succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(log_level: &str, log_format: &str) -> Result<()> {
    let filter = std::env::var("CANDLEFILL_LOG").unwrap_or_else(|_| log_level.to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .map_err(|err| anyhow::anyhow!("invalid log filter: {err}"))?;

    match log_format.trim().to_lowercase().as_str() {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init(),
        "text" => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
        other => bail!("unknown --log-format '{other}' (expected text or json)"),
    }
    Ok(())
}

fn run_init(store: &ParquetStore, config: &IngestConfig) -> Result<()> {
    IngestPipeline::connect(store, PipelineSettings::from(config), &TracingObserver)
        .with_context(|| format!("preparing table '{}'", config.table))?;
    println!("Table '{}' ready under {}", config.table, store.root().display());
    Ok(())
}

fn run_backfill(
    store: &ParquetStore,
    config: &IngestConfig,
    symbols: &[String],
) -> Result<RunSummary> {
    let universe = Universe::from_file(&config.universe)
        .with_context(|| format!("loading universe {}", config.universe.display()))?;
    let tickers = universe.select(symbols)?;
    if tickers.is_empty() {
        bail!("universe {} lists no tickers", config.universe.display());
    }
    tracing::info!(tickers = tickers.len(), interval = %config.api.interval, "starting backfill");

    let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(
        config.api.breaker_cooldown_secs,
    )));
    let mut provider = YahooProvider::new(breaker)?.with_interval(config.api.interval.clone());
    if let Some(url) = &config.api.base_url {
        provider = provider.with_base_url(url.clone());
    }

    let observer = TracingObserver;
    let pipeline = IngestPipeline::connect(store, PipelineSettings::from(config), &observer)
        .with_context(|| format!("preparing table '{}'", config.table))?
        .with_scheduler(config.build_scheduler());
    Ok(pipeline.run_api(&provider, &tickers))
}

fn run_import(
    store: &ParquetStore,
    config: &IngestConfig,
    dir: Option<PathBuf>,
    group_size: Option<usize>,
) -> Result<RunSummary> {
    let dir = dir.unwrap_or_else(|| config.local.dir.clone());
    let group_size = group_size.unwrap_or(config.local.group_size);

    let observer = TracingObserver;
    let pipeline = IngestPipeline::connect(store, PipelineSettings::from(config), &observer)
        .with_context(|| format!("preparing table '{}'", config.table))?
        .with_scheduler(config.build_scheduler());
    let source = CsvDirectorySource::open(&dir, group_size, &observer)?;
    Ok(pipeline.run_local(source.groups()))
}

fn run_status(store: &ParquetStore, config: &IngestConfig, symbols: &[String]) -> Result<()> {
    let table = config.table.as_str();
    if !store.table_exists(table)? {
        println!("Table '{table}' does not exist (run `candlefill init`)");
        return Ok(());
    }
    let tickers = if symbols.is_empty() {
        store.tickers(table)?
    } else {
        symbols.to_vec()
    };
    if tickers.is_empty() {
        println!("Table '{table}' holds no tickers");
        return Ok(());
    }

    let watermarks = WatermarkStore::new(store, table);
    println!(
        "{:<16} {:>10} {:<20} {:<20} {:<20}",
        "Ticker", "Rows", "Watermark", "First", "Last"
    );
    println!("{}", "-".repeat(90));
    for ticker in &tickers {
        let watermark = watermarks.read(ticker)?;
        match store.stats(table, ticker)? {
            Some(stats) => println!(
                "{:<16} {:>10} {:<20} {:<20} {:<20}",
                ticker,
                stats.rows,
                watermark.to_string(),
                stats.first_timestamp.to_string(),
                stats.last_timestamp.to_string()
            ),
            None => println!("{:<16} {:>10} {:<20}", ticker, 0, watermark.to_string()),
        }
    }
    Ok(())
}

fn report(summary: &RunSummary) {
    println!(
        "{} tickers: {} succeeded ({} up to date), {} failed",
        summary.total, summary.succeeded, summary.up_to_date, summary.failed
    );
    for r in summary.reports.iter().filter(|r| !r.commit.is_complete()) {
        for failure in r.commit.failures() {
            let month = failure
                .month
                .map(|m| m.to_string())
                .unwrap_or_else(|| "all".into());
            eprintln!("Partial commit for {} ({month}, {} rows)", r.ticker, failure.rows);
        }
    }
    for (ticker, err) in &summary.errors {
        eprintln!("Error for {ticker}: {err}");
    }
}
