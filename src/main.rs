//! CivicPulse admin binary
//!
//! Wraps the core with a small operational CLI: serve the control plane,
//! drive a phased load to completion, trigger single scrapers, inspect
//! status, and apply migrations.

use civicpulse::core::config::Config;
use civicpulse::core::context::CoreContext;
use civicpulse::core::control::ControlPlane;
use civicpulse::core::db::Store;
use civicpulse::core::executor::ExecutorPool;
use civicpulse::core::model::{SessionStatus, Strategy};
use civicpulse::core::phases::{LoaderError, PhasedLoader};
use civicpulse::core::progress::ProgressTracker;
use civicpulse::core::registry::{RegistryError, ScraperRegistry};
use civicpulse::core::scheduler::Scheduler;

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 2;
const EXIT_STORE: i32 = 3;
const EXIT_REGISTRY_EMPTY: i32 = 4;
const EXIT_SESSION_ACTIVE: i32 = 5;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "civicpulse", version, about = "Canadian civic data ingestion")]
struct Cli {
    /// Configuration file (defaults apply when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane and the cron scheduler until interrupted
    Serve,

    /// Run one phased loading session to completion
    Load {
        /// conservative, balanced, or aggressive
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Run one scraper on demand and wait for it
    Trigger { scraper_id: String },

    /// Print a system status summary as JSON
    Status,

    /// Apply pending store migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config = match Config::load_or_default(cli.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return EXIT_CONFIG;
        }
    };

    match cli.command {
        Command::Migrate => {
            let store = match connect_store(&config).await {
                Ok(store) => store,
                Err(code) => return code,
            };
            match store.migrate().await {
                Ok(()) => EXIT_OK,
                Err(e) => {
                    eprintln!("migration failed: {e}");
                    EXIT_STORE
                }
            }
        }
        Command::Status => {
            let store = match connect_store(&config).await {
                Ok(store) => store,
                Err(code) => return code,
            };
            if let Err(e) = store.migrate().await {
                eprintln!("migration failed: {e}");
                return EXIT_STORE;
            }
            match store.recent_runs(20).await {
                Ok(runs) => {
                    let summary = serde_json::json!({
                        "recent_runs": runs,
                        "active_session": store.active_session().await.ok().flatten(),
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&summary).unwrap_or_default()
                    );
                    EXIT_OK
                }
                Err(e) => {
                    eprintln!("store error: {e}");
                    EXIT_STORE
                }
            }
        }
        Command::Serve => {
            let ctx = match bootstrap(config).await {
                Ok(ctx) => ctx,
                Err(code) => return code,
            };
            serve(ctx).await
        }
        Command::Load { strategy } => {
            let strategy = match strategy.as_deref().map(str::parse::<Strategy>).transpose() {
                Ok(parsed) => parsed.unwrap_or(config.strategy),
                Err(e) => {
                    eprintln!("configuration error: {e}");
                    return EXIT_CONFIG;
                }
            };
            let ctx = match bootstrap(config).await {
                Ok(ctx) => ctx,
                Err(code) => return code,
            };
            load(ctx, strategy).await
        }
        Command::Trigger { scraper_id } => {
            let ctx = match bootstrap(config).await {
                Ok(ctx) => ctx,
                Err(code) => return code,
            };
            trigger(ctx, &scraper_id).await
        }
    }
}

async fn connect_store(config: &Config) -> Result<Store, i32> {
    match Store::connect(&config.store_url).await {
        Ok(store) => Ok(store),
        Err(e) => {
            eprintln!("store unavailable: {e}");
            Err(EXIT_STORE)
        }
    }
}

/// Shared startup: store, migrations, registry, jurisdiction seeding,
/// progress recovery
async fn bootstrap(config: Arc<Config>) -> Result<CoreContext, i32> {
    let store = connect_store(&config).await?;
    if let Err(e) = store.migrate().await {
        eprintln!("migration failed: {e}");
        return Err(EXIT_STORE);
    }

    let limiter = civicpulse::core::scrapers::rate_limiter::RateLimiter::new(
        config.rate_limit_per_host_rps,
        config.rate_limit_burst,
    );
    let registry = match ScraperRegistry::load(&config.scrapers_dir, &limiter, HashMap::new()) {
        Ok(registry) => Arc::new(registry),
        Err(e @ RegistryError::RegistryEmpty { .. }) => {
            eprintln!("registry error: {e}");
            return Err(EXIT_REGISTRY_EMPTY);
        }
        Err(e) => {
            eprintln!("registry error: {e}");
            return Err(EXIT_CONFIG);
        }
    };

    for jurisdiction in registry.jurisdictions() {
        if let Err(e) = store.upsert_jurisdiction(&jurisdiction).await {
            eprintln!("store unavailable: {e}");
            return Err(EXIT_STORE);
        }
    }
    if let Err(e) = store.insert_issues(registry.load_issues()).await {
        tracing::warn!(error = %e, "failed to persist registry load issues");
    }

    let tracker = match ProgressTracker::new(config.progress_path.clone(), store.clone()) {
        Ok(tracker) => Arc::new(tracker),
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return Err(EXIT_CONFIG);
        }
    };

    match tracker.recover(config.default_timeout_seconds).await {
        Ok(report) => {
            if !report.orphaned_runs.is_empty() {
                tracing::warn!(
                    orphans = report.orphaned_runs.len(),
                    "cleaned up runs orphaned by a previous process"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "progress recovery failed"),
    }

    Ok(CoreContext::new(config, store, registry, tracker, limiter))
}

async fn serve(ctx: CoreContext) -> i32 {
    let pool = ExecutorPool::start(ctx.clone());
    let scheduler = Arc::new(Scheduler::new(ctx.clone(), pool.clone()));
    let loader = Arc::new(PhasedLoader::new(ctx.clone(), pool.clone()));
    let plane = ControlPlane::new(ctx.clone(), pool.clone(), scheduler.clone(), loader);

    // resume a session interrupted by the previous process
    if let Ok(report) = ctx
        .tracker
        .recover(ctx.config.default_timeout_seconds)
        .await
    {
        if let Some(snapshot) = report.resumable_session {
            if let Err(e) = plane.loader.resume_recovered(snapshot).await {
                tracing::warn!(error = %e, "could not resume recovered session");
            }
        }
    }

    let tick = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.start().await })
    };
    let server = {
        let plane = plane.clone();
        let addr = ctx.config.bind_addr.clone();
        tokio::spawn(async move { ControlPlane::serve(plane, &addr).await })
    };

    let code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            EXIT_OK
        }
        result = server => {
            match result {
                Ok(Ok(())) => EXIT_OK,
                Ok(Err(e)) => {
                    eprintln!("control plane failed: {e:#}");
                    EXIT_CONFIG
                }
                Err(e) => {
                    eprintln!("control plane task failed: {e}");
                    EXIT_CONFIG
                }
            }
        }
    };

    scheduler.shutdown();
    pool.shutdown();
    tick.abort();
    code
}

async fn load(ctx: CoreContext, strategy: Strategy) -> i32 {
    let pool = ExecutorPool::start(ctx.clone());
    let loader = Arc::new(PhasedLoader::new(ctx.clone(), pool.clone()));

    let session_id = match loader.start(strategy, "cli").await {
        Ok(session_id) => session_id,
        Err(LoaderError::SessionAlreadyActive) => {
            eprintln!("a loading session is already active");
            return EXIT_SESSION_ACTIVE;
        }
        Err(e) => {
            eprintln!("failed to start session: {e}");
            return EXIT_STORE;
        }
    };
    tracing::info!(session = %session_id, strategy = strategy.as_str(), "phased load started");

    let mut last_phase = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupt received, cancelling session");
                let _ = loader.cancel().await;
                // let in-flight runs observe the cancellation
                for _ in 0..40 {
                    match loader.status().await {
                        Some(report) if report.status.is_terminal() => break,
                        _ => tokio::time::sleep(Duration::from_millis(250)).await,
                    }
                }
                pool.shutdown();
                return EXIT_INTERRUPTED;
            }
            () = tokio::time::sleep(Duration::from_millis(500)) => {
                let Some(report) = loader.status().await else { continue };

                if report.current_phase != last_phase {
                    if let Some(phase) = report.current_phase {
                        tracing::info!(phase = phase.as_str(), "phase started");
                    }
                    last_phase = report.current_phase;
                }

                match report.status {
                    SessionStatus::Completed => {
                        tracing::info!(session = %session_id, "phased load completed");
                        pool.shutdown();
                        return EXIT_OK;
                    }
                    SessionStatus::Cancelled | SessionStatus::Failed => {
                        tracing::error!(session = %session_id, status = ?report.status, "phased load did not complete");
                        pool.shutdown();
                        return EXIT_STORE;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn trigger(ctx: CoreContext, scraper_id: &str) -> i32 {
    let pool = ExecutorPool::start(ctx.clone());
    let scheduler = Scheduler::new(ctx.clone(), pool.clone());

    let handle = match scheduler.trigger(scraper_id).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("trigger failed: {e}");
            return EXIT_CONFIG;
        }
    };

    let completion = tokio::select! {
        completion = handle.wait() => completion,
        _ = tokio::signal::ctrl_c() => {
            handle.cancel();
            handle.wait().await;
            pool.shutdown();
            return EXIT_INTERRUPTED;
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&completion).unwrap_or_default()
    );
    pool.shutdown();
    EXIT_OK
}
