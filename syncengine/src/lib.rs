pub mod api;
pub mod config;
pub mod error_logger;
pub mod errors;
pub mod lease;
pub mod loader;
pub mod mapper;
pub mod orchestrator;
pub mod router;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value as JsonValue};
use syncstore::{config::StoreConfig, models::IntegrationConfig, models::SyncType, SyncStore};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

pub use api::{build_router, AppState};
pub use config::EngineConfig;
pub use orchestrator::{SyncFailure, SyncOrchestrator, SyncOutcome, SyncRequest};

/// Runs the command line interface for the sync engine.
pub async fn run_cli() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Serve(args)) => serve(args).await?,
        Some(Command::Run(args)) => run_once(args).await?,
        Some(Command::Register(args)) => register(args).await?,
        Some(Command::ShowRun(args)) => show_run(args).await?,
        None => {
            println!("No subcommand provided. Use --help to see available commands.");
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the HTTP service accepting sync invocations
    Serve(ServeArgs),
    /// Runs one sync and prints the response
    Run(RunArgs),
    /// Registers or replaces an integration from a JSON definition
    Register(RegisterArgs),
    /// Prints a sync run and its record errors
    ShowRun(ShowRunArgs),
}

#[derive(Args)]
struct StoreArgs {
    /// Base directory for the catalog and record databases
    #[arg(long, env = "SYNCENGINE_BASE_PATH")]
    base_path: PathBuf,
}

#[derive(Args)]
struct EngineArgs {
    /// JSON file with engine settings; flags below take precedence
    #[arg(long, env = "SYNCENGINE_CONFIG")]
    config: Option<PathBuf>,
    /// Records per batch when the integration sets none
    #[arg(long, env = "SYNCENGINE_BATCH_SIZE")]
    batch_size: Option<usize>,
    /// Fetch timeout in seconds when the integration sets none
    #[arg(long, env = "SYNCENGINE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
    /// Fail runs whose credentials are incomplete
    #[arg(long, env = "SYNCENGINE_STRICT_AUTH", default_value_t = false)]
    strict_auth: bool,
    /// Concurrent upserts per batch
    #[arg(long, env = "SYNCENGINE_MAX_CONCURRENT_UPSERTS")]
    max_concurrent_upserts: Option<usize>,
    /// Allow at most one active run per integration
    #[arg(long, env = "SYNCENGINE_EXCLUSIVE_RUNS", default_value_t = false)]
    exclusive_runs: bool,
}

impl EngineArgs {
    fn load(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str::<EngineConfig>(&raw)
                    .with_context(|| format!("invalid engine config {}", path.display()))?
            }
            None => EngineConfig::default(),
        };

        if let Some(size) = self.batch_size {
            config.default_batch_size = size;
        }
        if let Some(secs) = self.timeout_secs {
            config.default_timeout_secs = secs;
        }
        if let Some(limit) = self.max_concurrent_upserts {
            config.max_concurrent_upserts = limit;
        }
        config.strict_auth |= self.strict_auth;
        config.exclusive_runs |= self.exclusive_runs;
        Ok(config)
    }
}

#[derive(Args)]
struct ServeArgs {
    #[command(flatten)]
    store: StoreArgs,
    #[command(flatten)]
    engine: EngineArgs,
    /// Socket address to bind the service
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    store: StoreArgs,
    #[command(flatten)]
    engine: EngineArgs,
    /// Integration to synchronize
    #[arg(long)]
    integration: String,
    /// Entity type; defaults to the integration's first sync entity
    #[arg(long)]
    entity_type: Option<String>,
    /// manual or scheduled
    #[arg(long, default_value = "manual")]
    sync_type: String,
    /// JSON object of filters sent as query parameters
    #[arg(long)]
    filters: Option<String>,
}

#[derive(Args)]
struct RegisterArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Path to the integration definition
    file: PathBuf,
}

#[derive(Args)]
struct ShowRunArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Identifier of the sync run
    run_id: String,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

async fn open_store(args: &StoreArgs) -> anyhow::Result<Arc<SyncStore>> {
    let config = StoreConfig::new(&args.base_path);
    let store = SyncStore::new(config)
        .await
        .context("failed to open sync store")?;
    Ok(Arc::new(store))
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let addr: SocketAddr = args.bind.parse().context("failed to parse bind address")?;

    let store = open_store(&args.store).await?;
    let orchestrator = Arc::new(SyncOrchestrator::from_store(&store, args.engine.load()?));

    let router = build_router(AppState::new(store, orchestrator));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind sync listener")?;

    info!("Sync service listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("sync server error")?;

    Ok(())
}

async fn run_once(args: RunArgs) -> anyhow::Result<()> {
    let sync_type: SyncType = args.sync_type.parse()?;
    let filters = match &args.filters {
        Some(raw) => match serde_json::from_str::<JsonValue>(raw).context("--filters is not JSON")? {
            JsonValue::Object(map) => Some(map),
            _ => bail!("--filters must be a JSON object"),
        },
        None => None::<Map<String, JsonValue>>,
    };

    let store = open_store(&args.store).await?;
    let orchestrator = SyncOrchestrator::from_store(&store, args.engine.load()?);

    let request = SyncRequest {
        integration_id: Some(args.integration),
        sync_type,
        entity_type: args.entity_type,
        filters,
    };
    let body = match orchestrator.run(request).await {
        Ok(outcome) => {
            let mut body = serde_json::to_value(&outcome)?;
            if let JsonValue::Object(map) = &mut body {
                map.insert("success".to_string(), JsonValue::Bool(true));
            }
            body
        }
        Err(failure) => json!({
            "success": false,
            "error": failure.error.kind(),
            "details": failure.error.to_string(),
            "sync_log_id": failure.sync_log_id,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn register(args: RegisterArgs) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let integration = IntegrationConfig::from_json(&raw)
        .with_context(|| format!("invalid integration definition {}", args.file.display()))?;

    let store = open_store(&args.store).await?;
    store.catalog.upsert_integration(&integration)?;
    println!("registered integration '{}'", integration.id);
    Ok(())
}

async fn show_run(args: ShowRunArgs) -> anyhow::Result<()> {
    let run_id = Uuid::parse_str(&args.run_id).context("invalid run id")?;
    let store = open_store(&args.store).await?;

    let Some(run) = store.catalog.get_run(run_id)? else {
        bail!("sync run {run_id} not found");
    };
    let errors = store.catalog.list_errors(run_id)?;
    let body = json!({ "run": run, "errors": errors });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}
