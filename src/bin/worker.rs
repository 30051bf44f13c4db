use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use jobboard::{
    config::AppConfig,
    db,
    default_handlers,
    mail::mailer_from_config,
    retention::{RetentionScheduler, RetentionSweeper},
    s3::build_client,
    storage::S3Storage,
    store::PgStore,
    Worker, WorkerContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 2,
        smtp_enabled = config.smtp.is_some(),
        retention_days = config.retention_days,
        retention_interval_hours = config.retention_interval_hours,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 2)?;
    let s3_client = build_client(&config).await?;
    let storage = Arc::new(S3Storage::new(s3_client, config.s3_bucket.clone()));
    let mailer = mailer_from_config(config.smtp.as_ref())?;

    let sweeper = Arc::new(RetentionSweeper::new(
        Arc::new(PgStore::new(pool.clone())),
        storage,
        config.retention_days,
    ));
    let scheduler = RetentionScheduler::new(
        sweeper,
        Duration::from_secs(config.retention_interval_hours.max(1) * 3600),
    );

    let ctx = Arc::new(WorkerContext { pool, mailer });
    let worker = Worker::new(ctx, default_handlers(), Duration::from_secs(2));

    tokio::select! {
        _ = worker.run() => {}
        _ = scheduler.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
