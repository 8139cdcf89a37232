//! RowMirror CLI
//!
//! Command-line tools for inspecting and replaying replication jobs.
//!
//! # Commands
//!
//! - `inspect` - Decode a JSON-lines job file and list its jobs
//! - `replay` - Apply a job file to a JSON store snapshot
//! - `schema` - Validate schema definitions and show derived types

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// RowMirror replication tools.
#[derive(Parser)]
#[command(name = "rowmirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a job file and list its jobs
    Inspect {
        /// JSON-lines file of wire-form jobs
        jobs: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Apply a job file to a JSON store snapshot
    Replay {
        /// JSON-lines file of wire-form jobs
        jobs: PathBuf,

        /// Schema definitions (JSON array of entity types)
        #[arg(long)]
        schema: PathBuf,

        /// Store snapshot to apply to; created if missing
        #[arg(long)]
        store: PathBuf,

        /// Worker configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Let the target assign primary keys on create
        #[arg(long)]
        nullify_pks: bool,

        /// Field holding the source primary key on the target
        #[arg(long)]
        legacy_pk_field: Option<String>,

        /// Deliveries per job before it is dropped
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Dry run - apply in memory without writing the store back
        #[arg(short, long)]
        dry_run: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate schema definitions and list entity types
    Schema {
        /// Schema definitions (JSON array of entity types)
        schema: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { jobs, format } => {
            commands::inspect::run(&jobs, &format)?;
        }
        Commands::Replay {
            jobs,
            schema,
            store,
            config,
            nullify_pks,
            legacy_pk_field,
            max_attempts,
            dry_run,
            format,
        } => {
            let options = commands::replay::ReplayOptions {
                jobs,
                schema,
                store,
                config,
                nullify_pks,
                legacy_pk_field,
                max_attempts,
                dry_run,
            };
            commands::replay::run(&options, &format)?;
        }
        Commands::Schema { schema, format } => {
            commands::schema::run(&schema, &format)?;
        }
        Commands::Version => {
            println!("RowMirror CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("RowMirror Core v{}", rowmirror_core::VERSION);
        }
    }

    Ok(())
}
