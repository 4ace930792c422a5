//! purefood-sync: command-line front end and composition root.
//!
//! Builds the Local Store, Sync Pipeline and Dataset Reader once from the
//! command line and hands them to the selected command.

#![warn(clippy::all)]

mod cli;
mod config;
mod progress;
mod shutdown;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use purefood_sync::export;
use purefood_sync::model::Record;
use purefood_sync::reader::{DatasetReader, LoadOutcome};
use purefood_sync::sync::SyncPipeline;

use cli::{Command, NetworkArgs};
use config::Config;
use progress::{format_bytes, format_duration, CliProgress};

/// Run the sync or refresh command.
///
/// A plain `sync` is the startup path: it does nothing when a dataset is
/// already present unless `force` is set.
async fn run_sync(
    config: &Config,
    network: &NetworkArgs,
    force: bool,
    refresh: bool,
) -> anyhow::Result<()> {
    let pipeline = SyncPipeline::from_config(
        Arc::clone(&config.store),
        config::sync_config(network)?,
    )?;

    if !refresh && !force && pipeline.is_initialized() {
        tracing::info!(
            "Local data already present in {}; use --force or refresh to sync again",
            config.store.app_data_dir().display()
        );
        return Ok(());
    }

    let shutdown_token = shutdown::install_signal_handler()?;
    let started = Instant::now();
    let mut progress = CliProgress::new(config.no_progress_bar);
    let result = if refresh {
        pipeline.refresh(&mut progress, &shutdown_token).await
    } else {
        pipeline.sync(&mut progress, &shutdown_token).await
    };
    progress.finish();

    let report = result?;
    tracing::info!(
        "  downloaded {} in {} attempt(s)",
        format_bytes(report.bytes_downloaded),
        report.attempts
    );
    tracing::info!("  elapsed: {}", format_duration(started.elapsed()));
    Ok(())
}

/// Image count and total size in `dir`; a missing directory is empty.
fn image_stats(dir: &Path) -> (usize, u64) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return (0, 0);
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .fold((0, 0), |(count, bytes), m| (count + 1, bytes + m.len()))
}

fn run_status(config: &Config) -> anyhow::Result<()> {
    let store = &config.store;
    println!("Data directory: {}", store.app_data_dir().display());
    println!(
        "Initialized:    {}",
        if store.dataset_path().is_file() { "yes" } else { "no" }
    );

    match DatasetReader::new(Arc::clone(store)).load() {
        LoadOutcome::Loaded { records, source } => {
            println!("Recipes:        {} ({} dataset)", records.len(), source);
        }
        LoadOutcome::Empty(skipped) => {
            println!("Recipes:        0");
            for s in skipped {
                println!("  {} dataset skipped: {}", s.source, s.reason);
            }
        }
    }

    let (images, bytes) = image_stats(&store.images_dir());
    println!("Images:         {} ({})", images, format_bytes(bytes));
    Ok(())
}

fn print_record(record: &Record) {
    println!(
        "{:>5}  {}  [{}]",
        record.id,
        record.title,
        record.categories.join(", ")
    );
}

fn run_list(config: &Config, category: Option<&str>, search: Option<&str>) -> anyhow::Result<()> {
    let reader = DatasetReader::new(Arc::clone(&config.store));
    let records = match (category, search) {
        (Some(category), None) => reader.records_by_category(category),
        (None, Some(query)) => reader.search_title(query),
        (Some(category), Some(query)) => {
            let mut records = reader.search_title(query);
            records.retain(|r| r.has_category(category));
            records
        }
        (None, None) => reader.load_records(),
    };
    for record in &records {
        print_record(record);
    }
    tracing::info!("{} recipes", records.len());
    Ok(())
}

fn run_categories(config: &Config) -> anyhow::Result<()> {
    for category in DatasetReader::new(Arc::clone(&config.store)).categories() {
        println!("{}", category);
    }
    Ok(())
}

async fn run_export(config: &Config, output: Option<&str>) -> anyhow::Result<()> {
    let records = DatasetReader::new(Arc::clone(&config.store)).load_records();
    let images_dir = config.store.images_dir();
    let output_dir = config::output_dir(output)?;

    let pb = progress::create_progress_bar(config.no_progress_bar, 0);
    pb.set_message("exporting");
    let bar = pb.clone();
    let path = tokio::task::spawn_blocking(move || {
        export::export_archive(&records, &images_dir, &output_dir, &mut |current, total| {
            bar.set_length(total as u64);
            bar.set_position(current as u64);
        })
    })
    .await??;
    pb.finish_and_clear();

    println!("{}", path.display());
    Ok(())
}

fn run_export_json(config: &Config, output: Option<&str>) -> anyhow::Result<()> {
    let records = DatasetReader::new(Arc::clone(&config.store)).load_records();
    let path = export::export_records_json(&records, &config::output_dir(output)?)?;
    println!("{}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = Config::from_cli(&cli)?;
    tracing::debug!(?config, "Loaded configuration");

    match cli.command {
        Command::Sync { force, network } => run_sync(&config, &network, force, false).await,
        Command::Refresh { network } => run_sync(&config, &network, true, true).await,
        Command::Status => run_status(&config),
        Command::List { category, search } => {
            run_list(&config, category.as_deref(), search.as_deref())
        }
        Command::Categories => run_categories(&config),
        Command::Export { output } => run_export(&config, output.as_deref()).await,
        Command::ExportJson { output } => run_export_json(&config, output.as_deref()),
    }
}
