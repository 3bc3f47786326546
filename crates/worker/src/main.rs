use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ontask_events::{EventBus, RoutingTransport, RunLogPersistence};
use ontask_worker::{ScheduledRunner, WorkerConfig};

/// Time left for queued run logs after the runner stops.
const PERSISTENCE_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ontask_worker=debug,ontask_events=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        poll_secs = config.poll_interval.as_secs(),
        batch_size = config.batch_size,
        abort_on_first_failure = config.abort_on_first_failure,
        "Loaded worker configuration"
    );

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = ontask_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    ontask_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let event_bus = Arc::new(EventBus::default());
    let persistence = RunLogPersistence::spawn(pool.clone(), &event_bus);

    let runner = ScheduledRunner::new(
        pool,
        Arc::clone(&event_bus),
        Arc::new(RoutingTransport::from_env()),
        config,
    );
    let shutdown = CancellationToken::new();
    let runner_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { runner.run(shutdown).await }
    });
    tracing::info!("Scheduled runner started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }
    tracing::info!("Stopping scheduled runner");
    shutdown.cancel();
    if let Err(e) = runner_task.await {
        tracing::error!(error = %e, "Scheduled runner task failed");
    }

    drop(event_bus);
    persistence.finish(PERSISTENCE_DRAIN).await;
    tracing::info!("Worker stopped");
}
