//! HTTP exposition of the Prometheus registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::http::{ContentType, Status};
use rocket::serde::json::Json;
use rocket::serde::{Deserialize, Serialize};
use rocket::{Ignite, Rocket, Route, State, get, routes};
use tokio::task::JoinHandle;
use tracing::error;

use super::PrometheusMetrics;

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    timestamp: DateTime<Utc>,
}

#[get("/health")]
fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}

#[get("/metrics")]
fn metrics(metrics: &State<Arc<PrometheusMetrics>>) -> (Status, (ContentType, String)) {
    match metrics.encode() {
        Ok(body) => (Status::Ok, (ContentType::Plain, body)),
        Err(e) => {
            error!("Failed to encode metrics: {e}");
            (Status::InternalServerError, (ContentType::Plain, String::new()))
        }
    }
}

pub(crate) fn routes() -> Vec<Route> {
    routes![health, metrics]
}

pub(crate) fn spawn_metrics_server(
    port: u16,
    metrics: Arc<PrometheusMetrics>,
) -> JoinHandle<Result<Rocket<Ignite>, rocket::Error>> {
    let rocket_config = rocket::Config::figment()
        .merge(("port", port))
        .merge(("address", "0.0.0.0"));

    let rocket = rocket::custom(rocket_config)
        .mount("/", routes())
        .manage(metrics);

    tokio::spawn(rocket.launch())
}
