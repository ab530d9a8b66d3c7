use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenv::dotenv;
use std::sync::{Arc, Mutex};
use tokenq::config::AppConfig;
use tokenq::db::{create_pool, PgPool};
use tokenq::http_server::run_http_server;
use tokenq::services::scheduler::RolloverScheduler;
use tracing_subscriber::EnvFilter;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(timezone = %config.service_timezone, "Configuration loaded");

    let pool = Arc::new(create_pool(&config.database_url)?);
    run_migrations(&pool)?;

    let scheduler = Arc::new(Mutex::new(RolloverScheduler::new(
        pool.clone(),
        config.service_timezone,
    )));
    scheduler
        .lock()
        .expect("scheduler mutex poisoned")
        .start();

    // Blocks until the server receives a shutdown signal
    run_http_server(pool.clone(), scheduler.clone(), config.port).await?;

    scheduler.lock().expect("scheduler mutex poisoned").stop();
    tracing::info!("Shutdown complete");

    Ok(())
}

fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    let conn = &mut pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
    Ok(())
}
