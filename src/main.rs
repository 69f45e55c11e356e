//! Mathesis - Feedback-Driven Corpus Learning Pipeline
//!
//! Command-line entry point: runs the background scheduler, or executes
//! one-off processing, sync, and inspection passes against the store.

use clap::{Parser, Subcommand};
use mathesis::{
    config::LearningConfig,
    index::{Embedder, SqliteVecIndex},
    learning::LearningService,
    scheduler::LearningScheduler,
    storage::sqlite::SqliteStore,
    types::Namespace,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Default database path under the platform data directory
fn get_default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mathesis")
        .join("mathesis.db")
}

/// Database path from CLI arg, env var, or default
fn get_db_path(cli_path: Option<String>) -> String {
    cli_path
        .or_else(|| std::env::var("MATHESIS_DB_PATH").ok())
        .unwrap_or_else(|| get_default_db_path().to_string_lossy().to_string())
}

#[derive(Parser)]
#[command(name = "mathesis")]
#[command(about = "Feedback-driven corpus learning pipeline")]
#[command(version)]
struct Cli {
    /// Path to the SQLite database file
    #[arg(long, global = true, env = "MATHESIS_DB_PATH")]
    db_path: Option<String>,

    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Restrict the operation to one tenant's namespace
    #[arg(long, global = true)]
    tenant: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the background scheduler until interrupted
    Serve,

    /// Apply pending feedback directly, skipping the rule chain
    Process {
        /// Maximum number of items to process
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Run the rule chain over pending feedback
    ProcessRules {
        /// Maximum number of items to process
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Report auto-approve decisions without applying them
        #[arg(long)]
        no_approve: bool,

        /// Report auto-flag decisions without applying them
        #[arg(long)]
        no_flag: bool,
    },

    /// Push unsynced corpus entries to the vector index
    Sync {
        /// Maximum number of entries to push
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Print pipeline statistics
    Stats,

    /// Evaluate the quality of one question/answer pair
    Evaluate {
        #[arg(long)]
        question: String,

        #[arg(long)]
        answer: String,

        /// Expected category, checked against the answer's keywords
        #[arg(long)]
        category: Option<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<LearningConfig> {
    match path {
        Some(path) => Ok(LearningConfig::from_file(path)?),
        None => Ok(LearningConfig::default()),
    }
}

fn build_embedder() -> Embedder {
    match std::env::var("MATHESIS_EMBED_ENDPOINT") {
        Ok(endpoint) if !endpoint.is_empty() => {
            let model = std::env::var("MATHESIS_EMBED_MODEL")
                .unwrap_or_else(|_| "all-MiniLM-L6-v2".to_string());
            info!("Using remote embedding endpoint: {}", endpoint);
            Embedder::with_remote(endpoint, model)
        }
        _ => Embedder::local(),
    }
}

async fn build_service(
    db_path: &str,
    config: &LearningConfig,
) -> anyhow::Result<Arc<LearningService>> {
    if let Some(parent) = PathBuf::from(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let store = Arc::new(SqliteStore::new(db_path)?);
    store.init_schema().await?;

    let index = Arc::new(SqliteVecIndex::new(db_path, Arc::new(build_embedder()))?);
    index.init_schema().await?;

    Ok(Arc::new(LearningService::new(
        store.clone(),
        store,
        index,
        config,
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let db_path = get_db_path(cli.db_path.clone());
    let namespace = cli.tenant.clone().map(|id| Namespace::Tenant { id });

    match cli.command {
        Command::Serve => {
            let service = build_service(&db_path, &config).await?;
            let scheduler = LearningScheduler::new(service, config.scheduler.clone());
            scheduler.start().await;
            info!("Scheduler running, press ctrl-c to stop");

            tokio::signal::ctrl_c().await?;
            scheduler.stop().await;
        }
        Command::Process { limit } => {
            let service = build_service(&db_path, &config).await?;
            let report = service
                .process_pending_feedbacks(namespace.as_ref(), limit)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::ProcessRules {
            limit,
            no_approve,
            no_flag,
        } => {
            let service = build_service(&db_path, &config).await?;
            let report = service
                .process_with_rules(namespace.as_ref(), limit, !no_approve, !no_flag)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Sync { limit } => {
            let service = build_service(&db_path, &config).await?;
            let report = service
                .sync_unsynced_entries(namespace.as_ref(), limit)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stats => {
            let service = build_service(&db_path, &config).await?;
            let stats = service.get_learning_statistics(namespace.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Evaluate {
            question,
            answer,
            category,
        } => {
            let evaluator = mathesis::quality::QualityEvaluator::new();
            let report = evaluator.evaluate(&question, &answer, category.as_deref());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
