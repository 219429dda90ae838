//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Settings;
use crate::export::{ExportService, MarketplaceClient, SubmitError};
use crate::models::RowStatus;
use crate::profiles::ProfileStore;
use crate::reconcile::{ReconcileError, Reconciler};
use crate::repository::DispatchRepository;
use crate::services::{pdf_files, IngestService};
use crate::structurer::{check_tools, DocumentStructurer};
use crate::warehouse::TomlWarehouseDirectory;

#[derive(Parser)]
#[command(name = "haulflow")]
#[command(about = "Auction invoice ingestion and freight-marketplace export")]
#[command(version)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Ingest one or more auction PDFs (files or directories)
    Ingest {
        /// PDF files or directories containing them
        paths: Vec<PathBuf>,
        /// Number of concurrent ingestion workers
        #[arg(short, long, default_value = "4")]
        workers: usize,
    },

    /// List dispatch records
    List {
        /// Filter by status (new, ready, hold, error, exported, retry, cancelled)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show one record's fields, protections, and recent upsert reports
    Show {
        dispatch_id: String,
        /// Include recent upsert reports
        #[arg(short, long)]
        reports: bool,
    },

    /// Move a record through the status state machine
    Mark {
        dispatch_id: String,
        #[arg(value_enum)]
        status: MarkStatus,
    },

    /// Set or clear lock flags on a record
    Lock {
        dispatch_id: String,
        /// Lock every business field
        #[arg(long)]
        all: bool,
        /// Lock delivery/dropoff fields
        #[arg(long)]
        delivery: bool,
        /// Lock release notes
        #[arg(long)]
        release_notes: bool,
        /// Clear the named locks instead of setting them
        #[arg(long)]
        clear: bool,
    },

    /// Apply an operator correction (writes the override column)
    Correct {
        dispatch_id: String,
        field: String,
        value: String,
    },

    /// Assign a delivery warehouse to a record
    Warehouse {
        dispatch_id: String,
        warehouse_id: String,
        /// Pin the selection so ingestion stops touching delivery fields
        #[arg(long)]
        manual: bool,
    },

    /// Export READY records to the marketplace
    Export {
        /// Export a single record
        dispatch_id: Option<String>,
        /// Export everything in READY or RETRY
        #[arg(long)]
        all: bool,
    },

    /// List the auction profile catalog
    Profiles,

    /// Show record counts by status
    Status,

    /// Check that required external tools are installed
    Doctor,
}

#[derive(Clone, Copy, ValueEnum)]
enum MarkStatus {
    Ready,
    Hold,
    Retry,
    Cancelled,
}

impl From<MarkStatus> for RowStatus {
    fn from(value: MarkStatus) -> Self {
        match value {
            MarkStatus::Ready => RowStatus::Ready,
            MarkStatus::Hold => RowStatus::Hold,
            MarkStatus::Retry => RowStatus::Retry,
            MarkStatus::Cancelled => RowStatus::Cancelled,
        }
    }
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => init(&settings),
        Commands::Ingest { paths, workers } => ingest(&settings, paths, workers).await,
        Commands::List { status } => list(&settings, status),
        Commands::Show {
            dispatch_id,
            reports,
        } => show(&settings, &dispatch_id, reports),
        Commands::Mark {
            dispatch_id,
            status,
        } => mark(&settings, &dispatch_id, status.into()),
        Commands::Lock {
            dispatch_id,
            all,
            delivery,
            release_notes,
            clear,
        } => lock(&settings, &dispatch_id, all, delivery, release_notes, clear),
        Commands::Correct {
            dispatch_id,
            field,
            value,
        } => correct(&settings, &dispatch_id, field, value),
        Commands::Warehouse {
            dispatch_id,
            warehouse_id,
            manual,
        } => warehouse(&settings, &dispatch_id, &warehouse_id, manual).await,
        Commands::Export { dispatch_id, all } => export(&settings, dispatch_id, all).await,
        Commands::Profiles => profiles(&settings),
        Commands::Status => status(&settings),
        Commands::Doctor => doctor(),
    }
}

fn open_repository(settings: &Settings) -> anyhow::Result<Arc<DispatchRepository>> {
    settings
        .ensure_dirs()
        .context("creating data directories")?;
    Ok(Arc::new(DispatchRepository::new(&settings.database_path())?))
}

fn init(settings: &Settings) -> anyhow::Result<()> {
    let _ = open_repository(settings)?;
    println!(
        "{} initialized data directory at {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!("  database: {}", settings.database_path().display());
    println!("  profiles: {}", settings.profile_dir().display());
    Ok(())
}

async fn ingest(settings: &Settings, paths: Vec<PathBuf>, workers: usize) -> anyhow::Result<()> {
    if paths.is_empty() {
        bail!("no input paths given");
    }

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(pdf_files(&path)?);
        } else {
            files.push(path);
        }
    }
    if files.is_empty() {
        bail!("no PDF files found in the given paths");
    }

    let repo = open_repository(settings)?;
    let profiles = ProfileStore::load(&settings.profile_dir())?;
    let structurer = DocumentStructurer::new()
        .with_ocr_timeout(Duration::from_secs(settings.ocr_timeout_secs));
    let service = IngestService::new(structurer, profiles, Arc::new(Reconciler::new(repo)));

    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .expect("valid progress template"),
    );

    let results = service.ingest_batch(files, workers).await;

    let mut failures = 0usize;
    for (path, result) in &results {
        progress.inc(1);
        match result {
            Ok(outcome) => {
                progress.println(format!(
                    "{} {} -> {} [{} {:.0}%] {} field(s), {}",
                    style("✓").green(),
                    path.display(),
                    outcome.dispatch_id,
                    outcome.auction_type,
                    outcome.classification_confidence * 100.0,
                    outcome.extracted_fields,
                    outcome.action.as_str(),
                ));
                for diag in &outcome.diagnostics {
                    progress.println(format!(
                        "  {} {}: {}",
                        style("!").yellow(),
                        diag.key,
                        diag.message
                    ));
                }
            }
            Err(err) => {
                failures += 1;
                progress.println(format!(
                    "{} {}: {}",
                    style("✗").red(),
                    path.display(),
                    err
                ));
            }
        }
    }
    progress.finish_and_clear();

    println!(
        "{} ingested, {} failed",
        results.len() - failures,
        failures
    );
    Ok(())
}

fn list(settings: &Settings, status: Option<String>) -> anyhow::Result<()> {
    let repo = open_repository(settings)?;
    let filter = match status.as_deref() {
        Some(s) => Some(
            RowStatus::from_str(s)
                .with_context(|| format!("unknown status {:?}", s))?,
        ),
        None => None,
    };

    let records = repo.list(filter)?;
    if records.is_empty() {
        println!("no records");
        return Ok(());
    }

    for record in records {
        let vin = record
            .final_value(crate::models::keys::VEHICLE_VIN)
            .unwrap_or("-");
        println!(
            "{}  {:<9}  {:<8}  {}",
            record.dispatch_id,
            record.row_status.as_str(),
            record.auction_type,
            vin
        );
    }
    Ok(())
}

fn show(settings: &Settings, dispatch_id: &str, reports: bool) -> anyhow::Result<()> {
    let repo = open_repository(settings)?;
    let record = repo.get_required(dispatch_id)?;

    println!("{}", style(&record.dispatch_id).bold());
    println!("  auction: {}", record.auction_type);
    println!("  status: {}", record.row_status.as_str());
    println!(
        "  locks: all={} delivery={} release_notes={}  warehouse={}",
        record.lock_all,
        record.lock_delivery,
        record.lock_release_notes,
        record.warehouse_mode.as_str()
    );
    if let Some(listing) = &record.external_listing_id {
        println!("  listing: {}", listing);
    }

    println!("  fields:");
    for (key, field) in &record.fields {
        if field.is_empty() && !record.overrides.contains_key(key) {
            continue;
        }
        let overridden = record
            .overrides
            .get(key)
            .filter(|v| !v.trim().is_empty())
            .is_some();
        let value = record.final_value(key).unwrap_or("-");
        let marker = if overridden {
            style("override").yellow().to_string()
        } else {
            format!("{} {:.2}", field.source.as_str(), field.confidence)
        };
        println!("    {:<20} {}  ({})", key, value, marker);
    }

    if reports {
        println!("  recent reports:");
        for report in repo.reports(dispatch_id, 5)? {
            println!(
                "    {} updated={} skipped={}",
                report.action.as_str(),
                report.updated_fields.len(),
                report.skipped_fields.len()
            );
            for skip in report.skipped_fields {
                println!("      - {} ({})", skip.field, skip.reason.as_str());
            }
        }
    }
    Ok(())
}

fn mark(settings: &Settings, dispatch_id: &str, to: RowStatus) -> anyhow::Result<()> {
    let repo = open_repository(settings)?;
    let reconciler = Reconciler::new(repo);

    match reconciler.transition(dispatch_id, to) {
        Ok(record) => {
            println!(
                "{} {} is now {}",
                style("✓").green(),
                dispatch_id,
                record.row_status.as_str()
            );
            Ok(())
        }
        Err(ReconcileError::ValidationFailed(errors)) => {
            eprintln!(
                "{} {} cannot become {}:",
                style("✗").red(),
                dispatch_id,
                to.as_str()
            );
            for error in errors {
                eprintln!("  - {}", error);
            }
            bail!("validation failed");
        }
        Err(err) => Err(err.into()),
    }
}

fn lock(
    settings: &Settings,
    dispatch_id: &str,
    all: bool,
    delivery: bool,
    release_notes: bool,
    clear: bool,
) -> anyhow::Result<()> {
    if !all && !delivery && !release_notes {
        bail!("name at least one lock: --all, --delivery, --release-notes");
    }
    let repo = open_repository(settings)?;
    let value = !clear;
    let record = repo.set_locks(
        dispatch_id,
        all.then_some(value),
        delivery.then_some(value),
        release_notes.then_some(value),
    )?;
    println!(
        "{} locks on {}: all={} delivery={} release_notes={}",
        style("✓").green(),
        dispatch_id,
        record.lock_all,
        record.lock_delivery,
        record.lock_release_notes
    );
    Ok(())
}

fn correct(
    settings: &Settings,
    dispatch_id: &str,
    field: String,
    value: String,
) -> anyhow::Result<()> {
    if !crate::models::keys::ALL.contains(&field.as_str()) {
        bail!("unknown field key {:?}", field);
    }
    let repo = open_repository(settings)?;
    repo.apply_corrections(dispatch_id, &[(field.clone(), value.clone())])?;
    println!(
        "{} override set: {} = {:?}",
        style("✓").green(),
        field,
        value
    );
    Ok(())
}

async fn warehouse(
    settings: &Settings,
    dispatch_id: &str,
    warehouse_id: &str,
    manual: bool,
) -> anyhow::Result<()> {
    let repo = open_repository(settings)?;
    let directory = TomlWarehouseDirectory::load(&settings.warehouse_file())?;
    let reconciler = Reconciler::new(repo);

    let (record, report) = reconciler
        .assign_warehouse(dispatch_id, warehouse_id, &directory, manual)
        .await?;
    println!(
        "{} warehouse {} applied to {} ({} field(s) updated, mode {})",
        style("✓").green(),
        warehouse_id,
        dispatch_id,
        report.updated_fields.len(),
        record.warehouse_mode.as_str()
    );
    for skip in report.skipped_fields {
        println!("  skipped {} ({})", skip.field, skip.reason.as_str());
    }
    Ok(())
}

async fn export(
    settings: &Settings,
    dispatch_id: Option<String>,
    all: bool,
) -> anyhow::Result<()> {
    let repo = open_repository(settings)?;
    let token = settings
        .marketplace
        .token()
        .context("no marketplace API token configured (set HAULFLOW_API_TOKEN)")?;
    let client = MarketplaceClient::new(
        &settings.marketplace.base_url,
        &token,
        Duration::from_secs(settings.marketplace.request_timeout_secs),
    );
    let service = ExportService::new(client, repo, settings.export_concurrency);

    match (dispatch_id, all) {
        (Some(id), _) => {
            let record = service.export_record(&id).await.map_err(|err| {
                if let SubmitError::Validation(ref errors) = err {
                    for error in errors {
                        eprintln!("  - {}", error);
                    }
                }
                anyhow::anyhow!(err.to_string())
            })?;
            println!(
                "{} exported {} as listing {}",
                style("✓").green(),
                record.dispatch_id,
                record.external_listing_id.as_deref().unwrap_or("?")
            );
        }
        (None, true) => {
            let results = service.export_all().await;
            let mut exported = 0usize;
            for (id, result) in results {
                match result {
                    Ok(record) => {
                        exported += 1;
                        println!(
                            "{} {} -> {}",
                            style("✓").green(),
                            id,
                            record.external_listing_id.as_deref().unwrap_or("?")
                        );
                    }
                    Err(err) => println!("{} {}: {}", style("✗").red(), id, err),
                }
            }
            println!("{} record(s) exported", exported);
        }
        (None, false) => bail!("give a dispatch id or --all"),
    }
    Ok(())
}

fn profiles(settings: &Settings) -> anyhow::Result<()> {
    let store = ProfileStore::load(&settings.profile_dir())?;
    for profile in store.all() {
        println!(
            "{:<10} v{}  threshold {:.2}  {} match rule(s), {} field rule(s)",
            profile.auction_type,
            profile.version,
            profile.confidence_threshold,
            profile.match_rules.len(),
            profile.field_rules.len()
        );
    }
    Ok(())
}

fn status(settings: &Settings) -> anyhow::Result<()> {
    let repo = open_repository(settings)?;
    let counts = repo.counts_by_status()?;
    if counts.is_empty() {
        println!("no records yet");
        return Ok(());
    }
    for (status, count) in counts {
        println!("{:<10} {}", status, count);
    }
    Ok(())
}

fn doctor() -> anyhow::Result<()> {
    let mut missing = false;
    for (tool, available) in check_tools() {
        if available {
            println!("{} {}", style("✓").green(), tool);
        } else {
            missing = true;
            println!("{} {} (not found in PATH)", style("✗").red(), tool);
        }
    }
    if missing {
        println!("install poppler-utils and tesseract-ocr for full functionality");
    }
    Ok(())
}
