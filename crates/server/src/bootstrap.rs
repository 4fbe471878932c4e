use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use alcoguard_agent::{
    BartenderAgent, Broker, BrokerError, BrokerSettings, GuardianAgent, GuardianSettings,
    SessionAnalyzer, VetoPolicy,
};
use alcoguard_core::clock::{Clock, SystemClock};
use alcoguard_core::config::{AppConfig, ConfigError, LoadOptions};
use alcoguard_core::domain::message::AgentId;
use alcoguard_db::{connect_from_config, migrations, DbPool, SqlMessageLog, SqlSessionRepository};

use crate::health::HealthState;
use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub broker: Arc<Broker>,
    pub state: AppState,
    agent_handles: Vec<JoinHandle<()>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("agent wiring failed: {0}")]
    Agents(#[from] BrokerError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let broker = Arc::new(Broker::new(
        Arc::new(SqlMessageLog::new(db_pool.clone())),
        clock.clone(),
        BrokerSettings::from(&config.broker),
    ));

    let analyzer = Arc::new(SessionAnalyzer::new(sessions.clone(), clock.clone()));
    let guardian_settings = GuardianSettings::from(&config.guardian);
    let guardian = Arc::new(GuardianAgent::new(
        guardian_settings.clone(),
        analyzer.clone(),
        VetoPolicy::new(config.guardian.veto_threshold),
        clock.clone(),
    ));
    let bartender = Arc::new(BartenderAgent::new(
        guardian_settings.conversational_agent_id.clone(),
        guardian_settings.agent_id.clone(),
        clock.clone(),
    ));

    broker.register(guardian_settings.agent_id.clone(), GuardianAgent::subscriptions(), guardian)?;
    broker.register(
        guardian_settings.conversational_agent_id.clone(),
        BartenderAgent::subscriptions(),
        bartender.clone(),
    )?;
    let agent_handles = broker.start_all()?;
    info!(
        event_name = "system.bootstrap.agents_started",
        correlation_id = "bootstrap",
        guardian = %guardian_settings.agent_id,
        bartender = %guardian_settings.conversational_agent_id,
        veto_threshold = %config.guardian.veto_threshold,
        "agent loops started"
    );

    let state = AppState {
        broker: broker.clone(),
        sessions,
        analyzer,
        bartender,
        clock,
        guardian_id: guardian_settings.agent_id,
    };

    Ok(Application { config, db_pool, broker, state, agent_handles })
}

impl Application {
    pub fn health_state(&self) -> HealthState {
        HealthState { db_pool: self.db_pool.clone(), broker: self.broker.clone() }
    }

    /// Closes every mailbox and waits for the loops to drain, up to `grace`.
    pub async fn shutdown(self, grace: Duration) {
        let agents: Vec<AgentId> = self
            .broker
            .agent_stats()
            .registered_agents
            .into_iter()
            .map(AgentId::from)
            .collect();
        for agent_id in &agents {
            if let Err(error) = self.broker.unregister(agent_id) {
                warn!(
                    event_name = "system.shutdown.unregister_failed",
                    correlation_id = "shutdown",
                    agent_id = %agent_id,
                    error = %error,
                    "could not unregister agent"
                );
            }
        }

        if tokio::time::timeout(grace, drain_agent_loops(self.agent_handles)).await.is_err() {
            warn!(
                event_name = "system.shutdown.drain_timeout",
                correlation_id = "shutdown",
                grace_secs = grace.as_secs(),
                "agent loops did not drain in time"
            );
        }

        self.db_pool.close().await;
    }
}

/// Awaits every agent loop. Returns how many ended by panic or cancellation.
async fn drain_agent_loops(handles: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for handle in handles {
        if let Err(error) = handle.await {
            failed += 1;
            warn!(
                event_name = "system.shutdown.agent_failed",
                correlation_id = "shutdown",
                panicked = error.is_panic(),
                error = %error,
                "agent loop did not exit cleanly"
            );
        }
    }
    failed
}
