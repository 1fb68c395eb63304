//! `patrol`: the notification backend's single binary, dispatching to one
//! of three roles per §6 — the admin API stub, the scheduler, or a
//! per-queue worker pool — all sharing one `AppState`.

mod api;
mod app_state;
mod config;

use std::sync::Arc;

use app_state::AppState;
use clap::{Parser, Subcommand};
use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "patrol", version, about = "Polling scheduler and push backend")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Runs the admin API (health checks only; the REST surface is out of
    /// scope for this rewrite).
    Api,
    /// Runs the scheduler: one tick job per work category plus maintenance.
    Scheduler,
    /// Runs a consumer pool against one named queue.
    Worker {
        #[arg(long)]
        queue: String,
        #[arg(long, default_value_t = 4)]
        consumers: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "patrol=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let state = match AppState::build(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize application state");
            std::process::exit(1);
        }
    };

    let result = match cli.role {
        Role::Api => api::serve(state).await,
        Role::Scheduler => run_scheduler(state).await,
        Role::Worker { queue, consumers } => run_worker(state, &queue, consumers).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "exiting with error");
        std::process::exit(1);
    }

    Ok(())
}

const SCHEDULER_HEALTH_PORT: u16 = 8080;

async fn run_scheduler(state: AppState) -> anyhow::Result<()> {
    let scheduler = Arc::new(state.scheduler());
    let handles = scheduler.spawn_jobs();

    let health_addr = std::net::SocketAddr::from(([0, 0, 0, 0], SCHEDULER_HEALTH_PORT));
    let health_listener = tokio::net::TcpListener::bind(health_addr).await?;
    tracing::info!(%health_addr, "scheduler health listener bound");
    let health_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(health_listener, api::health_router()).await {
            tracing::error!(error = %e, "scheduler health listener failed");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, scheduler jobs continue until process exit");
    health_server.abort();
    for handle in handles {
        handle.abort();
    }

    Ok(())
}

async fn run_worker(state: AppState, queue_name: &str, consumers: usize) -> anyhow::Result<()> {
    let Some(queue) = state.queue_by_name(queue_name) else {
        anyhow::bail!(
            "unknown queue {queue_name:?}; expected one of notifications, subreddits, trending, users, \
             stuck-notifications, live-activities"
        );
    };

    let ctx = state.worker_context();

    let pool = match queue_name {
        "notifications" => {
            patrol_core::worker::run_consumer(queue, consumers, "accounts", ctx, patrol_core::worker::handle_notification)
        }
        "subreddits" => {
            patrol_core::worker::run_consumer(queue, consumers, "subreddits", ctx, patrol_core::worker::handle_subreddit)
        }
        "trending" => {
            patrol_core::worker::run_consumer(queue, consumers, "subreddits", ctx, patrol_core::worker::handle_trending)
        }
        "users" => patrol_core::worker::run_consumer(queue, consumers, "users", ctx, patrol_core::worker::handle_user),
        "stuck-notifications" => patrol_core::worker::run_consumer(
            queue,
            consumers,
            "stuck-notifications",
            ctx,
            patrol_core::worker::handle_stuck_notification,
        ),
        "live-activities" => patrol_core::worker::run_consumer(
            queue,
            consumers,
            "live-activities",
            ctx,
            patrol_core::worker::handle_live_activity,
        ),
        _ => unreachable!("queue_by_name already validated the name"),
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!(queue = queue_name, "shutdown signal received, draining in-flight deliveries");
    pool.shutdown().await;

    Ok(())
}
