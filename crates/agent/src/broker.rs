use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use alcoguard_core::audit::{AuditLogError, HistoryFilter, MessageLog};
use alcoguard_core::clock::Clock;
use alcoguard_core::config::BrokerConfig;
use alcoguard_core::domain::message::{
    AgentId, EventType, Message, MessageError, MessageRecord, NewMessage, Recipient,
};

use crate::handler::{MessageHandler, Publisher};
use crate::mailbox::{mailbox, Mailbox, MailboxReceiver};
use crate::registry::SubscriptionRegistry;
use crate::runtime::AgentLoop;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("agent `{0}` is already registered")]
    DuplicateAgent(AgentId),
    #[error("agent id `{0}` is blank or reserved for broadcast")]
    ReservedAgentId(AgentId),
    #[error("agent `{0}` is not registered")]
    UnknownAgent(AgentId),
    #[error("agent `{0}` has already been started")]
    AgentAlreadyStarted(AgentId),
    #[error(transparent)]
    InvalidMessage(#[from] MessageError),
    #[error(transparent)]
    AuditLog(#[from] AuditLogError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerSettings {
    pub handler_backoff: Duration,
    pub history_limit_max: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self { handler_backoff: Duration::from_millis(1_000), history_limit_max: 1_000 }
    }
}

impl From<&BrokerConfig> for BrokerSettings {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            handler_backoff: Duration::from_millis(config.handler_backoff_ms),
            history_limit_max: config.history_limit_max,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub registered_agents: Vec<String>,
    pub subscriptions: BTreeMap<String, Vec<String>>,
    pub queue_sizes: BTreeMap<String, usize>,
    pub running_agents: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

struct Registration {
    agent_id: AgentId,
    handler: Arc<dyn MessageHandler>,
    mailbox: Mailbox,
    /// Taken by the runtime loop on start.
    receiver: Option<MailboxReceiver>,
}

#[derive(Default)]
struct BrokerState {
    /// Registration order.
    agents: Vec<Registration>,
    registry: SubscriptionRegistry,
}

impl BrokerState {
    fn find(&self, agent_id: &AgentId) -> Option<&Registration> {
        self.agents.iter().find(|registration| &registration.agent_id == agent_id)
    }

    fn find_mut(&mut self, agent_id: &AgentId) -> Option<&mut Registration> {
        self.agents.iter_mut().find(|registration| &registration.agent_id == agent_id)
    }

    fn recipients(&self, message: &Message) -> Vec<AgentId> {
        match &message.to {
            Recipient::All => self
                .agents
                .iter()
                .map(|registration| registration.agent_id.clone())
                .filter(|agent_id| agent_id != &message.from)
                .collect(),
            Recipient::Agent(agent_id) if self.find(agent_id).is_some() => vec![agent_id.clone()],
            Recipient::Agent(_) => self.registry.subscribers(&message.event_type).to_vec(),
        }
    }
}

/// Routes published messages into per-agent mailboxes.
///
/// Shared by `Arc`. The state lock is never held across an `.await`.
pub struct Broker {
    state: RwLock<BrokerState>,
    log: Arc<dyn MessageLog>,
    clock: Arc<dyn Clock>,
    settings: BrokerSettings,
}

impl Broker {
    pub fn new(log: Arc<dyn MessageLog>, clock: Arc<dyn Clock>, settings: BrokerSettings) -> Self {
        Self { state: RwLock::new(BrokerState::default()), log, clock, settings }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, BrokerState> {
        match self.state.read() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, BrokerState> {
        match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register<I>(
        &self,
        agent_id: impl Into<AgentId>,
        subscriptions: I,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BrokerError>
    where
        I: IntoIterator<Item = EventType>,
    {
        let agent_id = agent_id.into();
        if !matches!(Recipient::parse(agent_id.as_str()), Recipient::Agent(_)) {
            return Err(BrokerError::ReservedAgentId(agent_id));
        }
        let mut state = self.write_state();
        if state.find(&agent_id).is_some() {
            return Err(BrokerError::DuplicateAgent(agent_id));
        }

        state.registry.subscribe(&agent_id, subscriptions);
        let (mailbox, receiver) = mailbox();
        state.agents.push(Registration {
            agent_id: agent_id.clone(),
            handler,
            mailbox,
            receiver: Some(receiver),
        });

        info!(
            event_name = "broker.agent_registered",
            agent_id = %agent_id,
            subscriptions = ?state.registry.subscriptions_of(&agent_id),
            "agent registered"
        );
        Ok(())
    }

    /// Drops the agent's mailbox and subscriptions. A running loop drains what is
    /// already queued and then exits.
    pub fn unregister(&self, agent_id: &AgentId) -> Result<(), BrokerError> {
        let mut state = self.write_state();
        let position = state
            .agents
            .iter()
            .position(|registration| &registration.agent_id == agent_id)
            .ok_or_else(|| BrokerError::UnknownAgent(agent_id.clone()))?;
        state.agents.remove(position);
        state.registry.unregister(agent_id);

        info!(event_name = "broker.agent_unregistered", agent_id = %agent_id, "agent unregistered");
        Ok(())
    }

    pub async fn publish(&self, message: NewMessage) -> Result<Message, BrokerError> {
        let message = message.into_message(self.clock.now())?;
        self.log.append(&message).await?;

        let recipients = {
            let state = self.read_state();
            let recipients = state.recipients(&message);
            for agent_id in &recipients {
                let Some(registration) = state.find(agent_id) else { continue };
                if registration.mailbox.deliver(message.clone()).is_err() {
                    warn!(
                        event_name = "broker.delivery_failed",
                        correlation_id = %message.id,
                        agent_id = %agent_id,
                        message_type = %message.event_type,
                        "mailbox closed; message archived only"
                    );
                }
            }
            recipients
        };

        if recipients.is_empty() {
            debug!(
                event_name = "broker.message_archived",
                correlation_id = %message.id,
                message_type = %message.event_type,
                from = %message.from,
                to = %message.to,
                "no recipients; message archived"
            );
        } else {
            info!(
                event_name = "broker.message_published",
                correlation_id = %message.id,
                message_type = %message.event_type,
                from = %message.from,
                to = %message.to,
                recipients = ?recipients,
                "message published"
            );
        }

        Ok(message)
    }

    /// Most recent first. `limit` is clamped to the configured maximum.
    pub async fn message_history(
        &self,
        filter: &HistoryFilter,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, BrokerError> {
        let limit = limit.min(self.settings.history_limit_max);
        Ok(self.log.history(filter, limit).await?)
    }

    pub fn agent_stats(&self) -> AgentStats {
        let state = self.read_state();
        AgentStats {
            registered_agents: state
                .agents
                .iter()
                .map(|registration| registration.agent_id.to_string())
                .collect(),
            subscriptions: state.registry.snapshot(),
            queue_sizes: state
                .agents
                .iter()
                .map(|registration| {
                    (registration.agent_id.to_string(), registration.mailbox.depth())
                })
                .collect(),
            running_agents: state
                .agents
                .iter()
                .filter(|registration| registration.receiver.is_none())
                .map(|registration| registration.agent_id.to_string())
                .collect(),
            timestamp: self.clock.now(),
        }
    }

    /// Spawns the runtime loop for one agent. Must be called inside a tokio runtime.
    pub fn start_agent(self: &Arc<Self>, agent_id: &AgentId) -> Result<JoinHandle<()>, BrokerError> {
        let (handler, receiver) = {
            let mut state = self.write_state();
            let registration = state
                .find_mut(agent_id)
                .ok_or_else(|| BrokerError::UnknownAgent(agent_id.clone()))?;
            let receiver = registration
                .receiver
                .take()
                .ok_or_else(|| BrokerError::AgentAlreadyStarted(agent_id.clone()))?;
            (registration.handler.clone(), receiver)
        };

        let agent_loop = AgentLoop::new(
            agent_id.clone(),
            handler,
            receiver,
            Arc::downgrade(self),
            self.log.clone(),
            self.clock.clone(),
            self.settings.handler_backoff,
        );
        info!(event_name = "broker.agent_started", agent_id = %agent_id, "agent loop started");
        Ok(tokio::spawn(agent_loop.run()))
    }

    /// Starts every registered agent that is not running yet, in registration order.
    pub fn start_all(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, BrokerError> {
        let pending: Vec<AgentId> = self
            .read_state()
            .agents
            .iter()
            .filter(|registration| registration.receiver.is_some())
            .map(|registration| registration.agent_id.clone())
            .collect();

        pending.iter().map(|agent_id| self.start_agent(agent_id)).collect()
    }
}

#[async_trait]
impl Publisher for Broker {
    async fn publish(&self, message: NewMessage) -> Result<Message, BrokerError> {
        Broker::publish(self, message).await
    }
}
