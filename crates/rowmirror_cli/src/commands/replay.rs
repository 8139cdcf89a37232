//! Replay command implementation.

use rowmirror_core::{JobSource, MemoryQueue};
use rowmirror_store::{MemoryStore, RecordStore};
use rowmirror_worker::{ReplicationWorker, RetryConfig, WorkerConfig, WorkerRunner};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

/// Replay options.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Job file (JSON lines).
    pub jobs: PathBuf,
    /// Schema file.
    pub schema: PathBuf,
    /// Store snapshot file.
    pub store: PathBuf,
    /// Worker configuration file.
    pub config: Option<PathBuf>,
    /// Let the target assign primary keys on create.
    pub nullify_pks: bool,
    /// Legacy primary-key field.
    pub legacy_pk_field: Option<String>,
    /// Deliveries per job.
    pub max_attempts: Option<u32>,
    /// Skip writing the store back.
    pub dry_run: bool,
}

/// Replay result.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Jobs read from the file.
    pub jobs: usize,
    /// Jobs applied.
    pub applied: u64,
    /// Redeliveries.
    pub retried: u64,
    /// Jobs dropped.
    pub failed: u64,
    /// Whether the store file was written.
    pub written: bool,
}

/// Runs the replay command.
pub fn run(options: &ReplayOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = replay(options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("Replayed {}", options.jobs.display());
            if options.dry_run {
                println!("(dry run - store not written)");
            }
            println!();
            println!("  Jobs:    {}", report.jobs);
            println!("  Applied: {}", report.applied);
            println!("  Retried: {}", report.retried);
            println!("  Failed:  {}", report.failed);
        }
    }

    if report.failed > 0 {
        return Err(format!("{} job(s) failed permanently", report.failed).into());
    }
    Ok(())
}

/// Applies every job in the file to the store snapshot.
///
/// Retries are redelivered without delay. Jobs still failing after the
/// attempt ceiling are counted as failed and logged by the worker.
pub fn replay(options: &ReplayOptions) -> Result<ReplayReport, Box<dyn std::error::Error>> {
    let schemas = super::load_schemas(&options.schema)?;
    let registry = Arc::new(super::registry_of(&schemas)?);

    let store = if options.store.exists() {
        MemoryStore::load(&options.store)?
    } else {
        tracing::info!(path = %options.store.display(), "store file not found, starting empty");
        MemoryStore::new()
    };
    for schema in &schemas {
        store.register(schema);
        for through in schema.through_types() {
            store.register(&through);
        }
    }
    let store = Arc::new(store);

    let queue = Arc::new(MemoryQueue::new());
    let file = File::open(&options.jobs)
        .map_err(|e| format!("cannot open {}: {e}", options.jobs.display()))?;
    let jobs = queue.import_jsonl(BufReader::new(file))?;

    let worker = ReplicationWorker::new(
        registry,
        Arc::clone(&store) as Arc<dyn RecordStore>,
        worker_config(options)?,
    )?;
    let runner = WorkerRunner::new(Arc::new(worker), queue as Arc<dyn JobSource>);
    let summary = runner.run_until_idle()?;

    let written = !options.dry_run;
    if written {
        store.save(&options.store)?;
    }
    tracing::info!(
        jobs,
        applied = summary.applied,
        failed = summary.failed,
        written,
        "replay finished"
    );

    Ok(ReplayReport {
        jobs,
        applied: summary.applied,
        retried: summary.retried,
        failed: summary.failed,
        written,
    })
}

/// Builds the worker configuration: file first, then flags. The result is
/// validated once both are applied.
fn worker_config(options: &ReplayOptions) -> Result<WorkerConfig, Box<dyn std::error::Error>> {
    let mut config: WorkerConfig = match &options.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)
            .map_err(|e| format!("invalid config {}: {e}", path.display()))?,
        None => WorkerConfig::default(),
    };
    if options.nullify_pks {
        config = config.with_nullify_primary_key_on_create(true);
    }
    if let Some(field) = &options.legacy_pk_field {
        config = config.with_legacy_primary_key_field(field.clone());
    }
    let attempts = options.max_attempts.unwrap_or(config.retry.max_attempts);
    let config = config.with_retry(RetryConfig::immediate(attempts));
    config.validate()?;
    Ok(config)
}
