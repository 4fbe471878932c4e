use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use alcoguard_agent::{AgentStats, Broker};
use alcoguard_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub broker: Arc<Broker>,
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
    pub agents: AgentStats,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "alcoguard-server runtime initialized".to_string(),
        },
        database,
        agents: state.broker.agent_stats(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};

    use alcoguard_agent::{Broker, BrokerSettings};
    use alcoguard_core::audit::InMemoryMessageLog;
    use alcoguard_core::clock::SystemClock;
    use alcoguard_db::connect_with_settings;

    use crate::health::{health, HealthState};

    fn broker() -> Arc<Broker> {
        Arc::new(Broker::new(
            Arc::new(InMemoryMessageLog::default()),
            Arc::new(SystemClock),
            BrokerSettings::default(),
        ))
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), broker: broker() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.service.status, "ready");
        assert!(payload.agents.registered_agents.is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool, broker: broker() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
