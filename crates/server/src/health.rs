use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use idguard_db::{ping, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    model_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, model_id: String) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, model_id })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match ping(&state.db_pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "identity store reachable".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("identity store unreachable: {error}") }
        }
    };
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: format!("idguard-server pipelines using {}", state.model_id),
        },
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
