//! daybook-engine - command-line driver
//!
//! Each subcommand performs one engine operation against the database in the
//! resolved root folder and prints the result as JSON. Engine failures print
//! `{code, message}` and exit non-zero.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daybook_common::config::{RootFolder, RootFolderResolver};
use daybook_common::logging::init_tracing;
use daybook_engine::models::{ClassifyMode, ClassifyRequest};
use daybook_engine::{Engine, EngineError};
use serde::Serialize;
use serde_json::json;
use tracing::info;

/// Command-line arguments for daybook-engine
#[derive(Parser, Debug)]
#[command(name = "daybook-engine")]
#[command(about = "Run scheduler and classification engine for daybook")]
#[command(version)]
struct Args {
    /// Root folder holding daybook.db and daybook.toml
    #[arg(short, long, env = "DAYBOOK_ROOT")]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process queued jobs of a run
    Tick {
        run_id: String,
        #[arg(long, default_value_t = 1)]
        max_jobs: u32,
    },
    /// Requeue failed jobs of a run
    Resume { run_id: String },
    /// Cancel a run and its open jobs
    Cancel { run_id: String },
    /// Discard one day's output and queue it again
    ResetJob { run_id: String, day: String },
    /// Label the unlabeled atoms of an import batch
    Classify {
        batch_id: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        prompt_version: String,
        #[arg(long, default_value = "openai")]
        provider: String,
        #[arg(long, value_parser = parse_mode, default_value = "stub")]
        mode: ClassifyMode,
    },
    /// Show a run and its jobs
    Status { run_id: String },
    /// Show one classification audit row
    ClassifyStatus { classify_run_id: String },
}

fn parse_mode(value: &str) -> std::result::Result<ClassifyMode, String> {
    value.parse()
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let root = RootFolder::new(RootFolderResolver::new(args.root_folder.clone()).resolve());
    let toml_config = root.load_config();
    init_tracing(&toml_config.logging);

    info!(
        "daybook-engine v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Root folder: {}", root.path().display());

    root.ensure_directory_exists()
        .context("Failed to create root folder")?;
    let db_path = root.database_path();
    let pool = daybook_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let outcome = match Engine::from_config(pool, &toml_config) {
        Ok(engine) => run_command(&engine, args.command).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let payload = json!({ "code": e.code(), "message": e.to_string() });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_command(
    engine: &Engine,
    command: Command,
) -> std::result::Result<serde_json::Value, EngineError> {
    match command {
        Command::Tick { run_id, max_jobs } => to_json(engine.tick(&run_id, max_jobs).await?),
        Command::Resume { run_id } => to_json(engine.resume(&run_id).await?),
        Command::Cancel { run_id } => to_json(engine.cancel(&run_id).await?),
        Command::ResetJob { run_id, day } => to_json(engine.reset_job(&run_id, &day).await?),
        Command::Classify {
            batch_id,
            model,
            prompt_version,
            provider,
            mode,
        } => {
            let request = ClassifyRequest {
                batch_id,
                provider,
                model,
                prompt_version_id: prompt_version,
                mode,
                budget: None,
            };
            to_json(engine.classify_batch(&request).await?)
        }
        Command::Status { run_id } => {
            let run = engine.get_run(&run_id).await?;
            let jobs = engine.list_jobs(&run_id).await?;
            Ok(json!({ "run": run, "jobs": jobs }))
        }
        Command::ClassifyStatus { classify_run_id } => {
            to_json(engine.get_classify_run(&classify_run_id).await?)
        }
    }
}

fn to_json<T: Serialize>(value: T) -> std::result::Result<serde_json::Value, EngineError> {
    Ok(serde_json::to_value(value)?)
}
