//! End-to-end runs against a Parquet store in a temp directory.
//!
//! Covers:
//! 1. Local CSV import, grouped, committed month by month
//! 2. Re-importing the same directory adds nothing
//! 3. API backfill after a local import resumes from the imported watermark
//! 4. Config file plus env overrides drive the whole run

use candlefill_core::domain::Ticker;
use candlefill_core::ingest::{
    BackfillScheduler, CommitMode, FixedClock, NoDelay, NullObserver, Termination,
};
use candlefill_core::store::{ParquetStore, StoreDriver};
use candlefill_core::testing::{raw_row, ScriptedProvider};
use candlefill_runner::{
    CsvDirectorySource, IngestConfig, IngestPipeline, PipelineSettings, SourceMode,
};
use chrono::NaiveDate;
use std::fs;
use std::path::Path;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn write_csv(dir: &Path, ticker: &str, days: &[NaiveDate]) {
    let mut body = String::from("timestamp,open,high,low,close,volume\n");
    for d in days {
        body.push_str(&format!("{d} 00:00:00,10,12,9,11,500\n"));
    }
    fs::write(dir.join(format!("{ticker}.csv")), body).unwrap();
}

fn scheduler(config: &IngestConfig, today: NaiveDate) -> BackfillScheduler {
    BackfillScheduler::new(config.scheduler.clone())
        .with_pacer(Box::new(NoDelay))
        .with_clock(Box::new(FixedClock(today)))
}

#[test]
fn local_import_is_idempotent_and_partitioned() {
    let tmp = tempfile::tempdir().unwrap();
    let csv_dir = tmp.path().join("csv");
    fs::create_dir_all(&csv_dir).unwrap();
    let days = [date(2024, 1, 30), date(2024, 1, 31), date(2024, 2, 1)];
    for t in ["ACC", "BEL", "CIPLA"] {
        write_csv(&csv_dir, t, &days);
    }

    let store = ParquetStore::new(tmp.path().join("store"));
    let pipeline =
        IngestPipeline::connect(&store, PipelineSettings::default(), &NullObserver).unwrap();

    let source = CsvDirectorySource::open(&csv_dir, 2, &NullObserver).unwrap();
    let summary = pipeline.run_local(source.groups());
    assert_eq!(summary.total, 3);
    assert!(summary.all_succeeded());
    for report in &summary.reports {
        assert_eq!(report.commit.mode, CommitMode::Monthly);
        assert_eq!(report.commit.partitions.len(), 2);
        assert_eq!(report.commit.committed_rows(), 3);
    }

    let meta = store.meta("candles", "BEL").unwrap().unwrap();
    assert_eq!(meta.row_count, 3);
    assert_eq!(meta.partitions.len(), 2);
    assert!(meta.partitions.contains_key("2024-01"));

    // same files again: everything is at or before the watermark
    let again = pipeline.run_local(source.groups());
    assert_eq!(again.up_to_date, 3);
    assert_eq!(store.stats("candles", "CIPLA").unwrap().unwrap().rows, 3);
}

#[test]
fn api_backfill_resumes_after_local_import() {
    let tmp = tempfile::tempdir().unwrap();
    let csv_dir = tmp.path().join("csv");
    fs::create_dir_all(&csv_dir).unwrap();
    write_csv(&csv_dir, "ABC", &[date(2024, 6, 14), date(2024, 6, 15)]);

    let config = IngestConfig::default();
    let store = ParquetStore::new(tmp.path().join("store"));
    let pipeline = IngestPipeline::connect(&store, PipelineSettings::from(&config), &NullObserver)
        .unwrap()
        .with_scheduler(scheduler(&config, date(2024, 7, 1)));

    let source = CsvDirectorySource::open(&csv_dir, 0, &NullObserver).unwrap();
    assert!(pipeline.run_local(source.groups()).all_succeeded());

    let provider = ScriptedProvider::new(|from, _, _| {
        Some(vec![raw_row(&format!("{from} 00:00:00"), 20.0, 10)])
    });
    let summary = pipeline.run_api(&provider, &[Ticker::new("ABC", "ABC.NS").unwrap()]);

    assert!(summary.all_succeeded());
    assert_eq!(provider.calls()[0].0, date(2024, 6, 16));
    assert_eq!(provider.calls()[0].1, date(2024, 7, 1));
    assert_eq!(summary.reports[0].termination, Some(Termination::BoundaryReached));
    assert_eq!(summary.reports[0].commit.mode, CommitMode::Bulk);

    let stats = store.stats("candles", "ABC").unwrap().unwrap();
    assert_eq!(stats.rows, 3);
    assert_eq!(stats.last_timestamp.date(), date(2024, 6, 16));
}

#[test]
fn config_file_and_env_drive_a_local_run() {
    let tmp = tempfile::tempdir().unwrap();
    let config_path = tmp.path().join("candlefill.toml");
    fs::write(
        &config_path,
        format!(
            "mode = \"api\"\ntable = \"daily\"\n\n[store]\nroot = \"{}\"\n\n[local]\ngroup_size = 1\n",
            tmp.path().join("store").display()
        ),
    )
    .unwrap();

    let csv_dir = tmp.path().join("from-env");
    let csv_dir_text = csv_dir.display().to_string();
    let mut config = IngestConfig::from_file(&config_path).unwrap();
    config
        .apply_env(|key| match key {
            "CANDLEFILL_MODE" => Some("local".to_string()),
            "CANDLEFILL_LOCAL_DIR" => Some(csv_dir_text.clone()),
            _ => None,
        })
        .unwrap();
    config.validate().unwrap();
    assert_eq!(config.mode, SourceMode::Local);

    // the directory does not exist yet; opening creates it
    let source = CsvDirectorySource::open(&config.local.dir, config.local.group_size, &NullObserver)
        .unwrap();
    assert!(csv_dir.is_dir());
    write_csv(&csv_dir, "ONE", &[date(2023, 3, 1)]);
    write_csv(&csv_dir, "TWO", &[date(2023, 3, 2)]);
    let source = CsvDirectorySource::open(source.dir(), config.local.group_size, &NullObserver)
        .unwrap();
    assert_eq!(source.groups().count(), 2);

    let store = ParquetStore::new(&config.store.root);
    let pipeline =
        IngestPipeline::connect(&store, PipelineSettings::from(&config), &NullObserver).unwrap();
    let summary = pipeline.run_local(source.groups());

    assert_eq!(summary.succeeded, 2);
    assert!(store.table_exists("daily").unwrap());
    assert!(!store.table_exists("candles").unwrap());
}

#[test]
fn shipped_sample_files_parse() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("..");
    let config = IngestConfig::from_file(&root.join("candlefill.toml")).unwrap();
    assert_eq!(config, IngestConfig::default());
    config.validate().unwrap();

    let universe =
        candlefill_core::data::Universe::from_file(&root.join("universe.toml")).unwrap();
    assert_eq!(universe.len(), 3);
    assert_eq!(universe.get("INFY").unwrap().token, "INFY.NS");
}
