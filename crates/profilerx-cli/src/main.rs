//! ProfilerX archive tool.
//!
//! Provides the `profilerx` binary for inspecting and maintaining a profiler
//! data directory offline: print statistics, list, create, load, delete and
//! merge archives. It drives the same `ProfileStore` the HTTP server uses,
//! so archive semantics are identical from both entry points.
//!
//! Every subcommand prints JSON on stdout. Exit codes: 0 = success,
//! 1 = operation failed, 3 = I/O error.

use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use profilerx_core::{NullSampler, SystemClock, WorkflowProfile};
use profilerx_engine::{EngineError, ProfileStore, ProfilerConfig};
use profilerx_storage::{JsonFileStore, Payload, ProfileStorage, StorageError};

/// ProfilerX data directory tools.
#[derive(Parser)]
#[command(name = "profilerx", about = "Inspect and manage ProfilerX profiling data")]
struct Cli {
    /// Profiler data directory (default: ./data).
    #[arg(short, long, global = true, env = "PROFILERX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print the statistics snapshot of the current history.
    Stats,
    /// List archives, newest first.
    Archives,
    /// Move the current history into a new archive.
    Archive,
    /// Replace the current history with an archive (the archive is consumed).
    Load {
        /// Archive file name.
        name: String,
    },
    /// Delete an archive.
    Delete {
        /// Archive file name.
        name: String,
    },
    /// Combine archives into one, ordered by start time. Sources are kept.
    Merge {
        /// Write the merged profiles to this file instead of a new archive.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Archive file names to merge.
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] EngineError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Failed(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Storage(StorageError::Io { .. }) | CliError::Output { .. } => 3,
            _ => 1,
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_env("PROFILERX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli.data_dir, cli.command) {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{}", text);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    process::exit(code);
}

/// Opens the data directory and executes one subcommand.
fn run(data_dir: Option<PathBuf>, command: Commands) -> Result<serde_json::Value, CliError> {
    let mut config = ProfilerConfig::from_env()?;
    if let Some(dir) = data_dir {
        config = config.with_data_dir(dir);
    }
    let storage = Arc::new(JsonFileStore::open(&config.data_dir)?);
    let store = ProfileStore::open(
        &config,
        storage.clone(),
        Arc::new(NullSampler),
        Arc::new(SystemClock),
    );

    match command {
        Commands::Stats => to_value(&store.get_stats()),
        Commands::Archives => to_value(&storage.list_archives()?),
        Commands::Archive => match store.try_archive_history()? {
            Some(name) => Ok(json!({ "success": true, "archive": name })),
            None => Err(CliError::Failed("history is empty, nothing to archive".to_string())),
        },
        Commands::Load { name } => {
            let profiles = store.try_load_archive(&name)?;
            Ok(json!({ "success": true, "profiles": profiles }))
        }
        Commands::Delete { name } => {
            store.try_delete_archive(&name)?;
            Ok(json!({ "success": true }))
        }
        Commands::Merge { output, names } => run_merge(storage.as_ref(), &names, output.as_deref()),
    }
}

/// Execute the merge subcommand.
fn run_merge(
    storage: &dyn ProfileStorage,
    names: &[String],
    output: Option<&Path>,
) -> Result<serde_json::Value, CliError> {
    let profiles = merge_archives(storage, names)?;
    let payload = Payload::encode(&profiles)?;

    match output {
        Some(path) => {
            std::fs::write(path, payload.as_bytes()).map_err(|source| CliError::Output {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(json!({
                "success": true,
                "output": path.display().to_string(),
                "profiles": profiles.len(),
            }))
        }
        None => {
            let archive = storage.create_archive(&payload)?;
            Ok(json!({ "success": true, "archive": archive, "profiles": profiles.len() }))
        }
    }
}

/// Reads every named archive and orders the union by start time.
///
/// Profiles with equal start times keep the order of `names`.
fn merge_archives(
    storage: &dyn ProfileStorage,
    names: &[String],
) -> Result<Vec<WorkflowProfile>, CliError> {
    let mut merged = Vec::new();
    for name in names {
        let profiles = storage.read_archive(name)?;
        tracing::info!(archive = %name, profiles = profiles.len(), "archive read for merge");
        merged.extend(profiles);
    }
    merged.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    Ok(merged)
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, CliError> {
    serde_json::to_value(value).map_err(|e| CliError::Storage(StorageError::Serialization(e)))
}
