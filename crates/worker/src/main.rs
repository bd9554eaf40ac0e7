//! Flowdesk Background Worker
//!
//! Handles scheduled jobs including:
//! - Incremental calendar sync for sync-enabled connections (every 15 minutes)
//! - Expired OAuth state purge (hourly)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use flowdesk_connect::{ConnectService, PgStateStore, Provider, StateStore, SyncOptions};
use flowdesk_shared::ConnectionId;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    Ok(flowdesk_shared::create_pool(&database_url).await?)
}

/// Outcome of syncing one connection.
enum SyncResult {
    Synced {
        conn_id: ConnectionId,
        events: usize,
        full_sync: bool,
    },
    Error {
        conn_id: ConnectionId,
        error: String,
    },
}

/// Log results of a calendar sync cycle
fn log_sync_results(results: &[SyncResult]) {
    let synced = results
        .iter()
        .filter(|r| matches!(r, SyncResult::Synced { .. }))
        .count();
    let full_syncs = results
        .iter()
        .filter(|r| matches!(r, SyncResult::Synced { full_sync: true, .. }))
        .count();
    let errors = results
        .iter()
        .filter(|r| matches!(r, SyncResult::Error { .. }))
        .count();

    info!(
        synced = synced,
        full_syncs = full_syncs,
        errors = errors,
        "Calendar sync cycle complete"
    );

    // Log individual outcomes
    for result in results {
        match result {
            SyncResult::Synced {
                conn_id,
                events,
                full_sync,
            } => {
                debug!(
                    conn_id = %conn_id,
                    events = events,
                    full_sync = full_sync,
                    "Connection synced"
                );
            }
            SyncResult::Error { conn_id, error } => {
                error!(conn_id = %conn_id, error = %error, "Failed to sync connection");
            }
        }
    }
}

/// Sync every sync-enabled calendar connection once.
async fn run_calendar_sync(connect: &ConnectService) -> Vec<SyncResult> {
    let connections = match connect
        .manager
        .store()
        .list_sync_enabled(Provider::GoogleCalendar)
        .await
    {
        Ok(connections) => connections,
        Err(e) => {
            error!(error = %e, "Failed to list sync-enabled connections");
            return Vec::new();
        }
    };

    let mut results = Vec::with_capacity(connections.len());
    for connection in connections {
        match connect
            .calendar
            .list_events(&connection, SyncOptions::default())
            .await
        {
            Ok(sync) => results.push(SyncResult::Synced {
                conn_id: connection.id,
                events: sync.events.len(),
                full_sync: sync.full_sync,
            }),
            Err(e) => results.push(SyncResult::Error {
                conn_id: connection.id,
                error: e.to_string(),
            }),
        }
    }
    results
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Flowdesk Worker");

    // Create database pool
    let pool = create_db_pool().await?;

    // Create connect service
    let connect = match ConnectService::from_env(pool.clone()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            // If OAuth isn't configured, run in minimal mode
            warn!(error = %e, "Failed to create connect service - running in minimal mode");
            info!("Worker running without provider integrations");

            // Keep running with minimal functionality
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Incremental calendar sync (every 15 minutes)
    let sync_connect = connect.clone();
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let connect = sync_connect.clone();
            Box::pin(async move {
                info!("Running scheduled calendar sync");
                let results = run_calendar_sync(&connect).await;
                log_sync_results(&results);
            })
        })?)
        .await?;
    info!("Scheduled: Calendar sync (every 15 minutes)");

    // Job 2: Purge expired OAuth states (hourly)
    let state_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let states = PgStateStore::new(state_pool.clone());
            Box::pin(async move {
                match states.purge_expired().await {
                    Ok(purged) => {
                        if purged > 0 {
                            info!(purged = purged, "Purged expired OAuth states");
                        }
                    }
                    Err(e) => error!(error = %e, "OAuth state purge failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: OAuth state purge (hourly)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Flowdesk Worker started successfully with {} scheduled jobs", 3);

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
