//! `GET /health`: the server is ready once the database answers and the order and
//! session tables exist.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use bookworm_db::{migrations, DbPool};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

const DIALOGUE_TABLES: &[&str] = &["order_line", "dialogue_session"];

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Ready,
    Degraded,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub detail: String,
}

impl ComponentHealth {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: ComponentStatus::Ready, detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: ComponentStatus::Degraded, detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub database: ComponentHealth,
    pub schema: ComponentHealth,
    pub checked_at: DateTime<Utc>,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let (database, schema) = storage_checks(&state.db_pool).await;
    let ready = [&database, &schema].iter().all(|check| check.status == ComponentStatus::Ready);
    if !ready {
        warn!(
            event_name = "system.health.degraded",
            database = %database.detail,
            schema = %schema.detail,
            "health check degraded"
        );
    }

    let payload = HealthResponse {
        status: if ready { ComponentStatus::Ready } else { ComponentStatus::Degraded },
        database,
        schema,
        checked_at: Utc::now(),
    };
    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn storage_checks(pool: &DbPool) -> (ComponentHealth, ComponentHealth) {
    if let Err(error) = sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        let skipped = ComponentHealth {
            status: ComponentStatus::Skipped,
            detail: "database unreachable".to_string(),
        };
        return (ComponentHealth::degraded(format!("database query failed: {error}")), skipped);
    }

    let schema = match migrations::missing_tables(pool, DIALOGUE_TABLES).await {
        Ok(missing) if missing.is_empty() => {
            ComponentHealth::ready("order and session tables present")
        }
        Ok(missing) => {
            ComponentHealth::degraded(format!("missing tables: {}", missing.join(", ")))
        }
        Err(error) => ComponentHealth::degraded(format!("schema inspection failed: {error}")),
    };
    (ComponentHealth::ready("database query succeeded"), schema)
}
