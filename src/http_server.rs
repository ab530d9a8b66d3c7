//! Liveness surface only: the queue itself has no HTTP routes here.

use crate::db::DbPool;
use crate::models::CronLog;
use crate::observability::metrics::MetricsSnapshot;
use crate::observability::METRICS;
use crate::services::run_ledger::{self, JOB_DAILY_RESET};
use crate::services::scheduler::{RolloverScheduler, SchedulerStatus};
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

pub struct AppState {
    pub pool: DbPool,
    pub scheduler: Arc<Mutex<RolloverScheduler>>,
}

pub async fn run_http_server(
    pool: DbPool,
    scheduler: Arc<Mutex<RolloverScheduler>>,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!(port, "Starting HTTP server");

    let state = web::Data::new(AppState { pool, scheduler });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(health)
            .service(status)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

#[get("/health")]
async fn health() -> impl Responder {
    tracing::debug!("Health check");
    "I'm ok"
}

#[derive(Serialize)]
struct StatusResponse {
    scheduler: SchedulerStatus,
    metrics: MetricsSnapshot,
    last_reset: Option<LastReset>,
}

#[derive(Serialize)]
struct LastReset {
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i32>,
    rooms_processed: Option<i32>,
    tokens_archived: Option<i32>,
    tokens_carried_forward: Option<i32>,
    error_message: Option<String>,
}

impl From<CronLog> for LastReset {
    fn from(log: CronLog) -> Self {
        LastReset {
            status: log.status,
            started_at: log.started_at,
            completed_at: log.completed_at,
            duration_seconds: log.duration_seconds,
            rooms_processed: log.rooms_processed,
            tokens_archived: log.tokens_archived,
            tokens_carried_forward: log.tokens_carried_forward,
            error_message: log.error_message,
        }
    }
}

#[get("/status")]
async fn status(state: web::Data<AppState>) -> impl Responder {
    let scheduler = match state.scheduler.lock() {
        Ok(guard) => guard.status(),
        Err(_) => return HttpResponse::InternalServerError().body("scheduler unavailable"),
    };

    let last_reset = match run_ledger::latest_run(&state.pool, JOB_DAILY_RESET) {
        Ok(log) => log.map(LastReset::from),
        Err(e) => {
            tracing::error!(error = %e, "Failed to read last reset attempt");
            None
        }
    };

    HttpResponse::Ok().json(StatusResponse {
        scheduler,
        metrics: METRICS.snapshot(),
        last_reset,
    })
}
