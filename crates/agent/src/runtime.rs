use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use alcoguard_core::audit::MessageLog;
use alcoguard_core::clock::Clock;
use alcoguard_core::domain::message::{AgentId, Message};

use crate::broker::Broker;
use crate::handler::{HandlerContext, HandlerOutcome, MessageHandler};
use crate::mailbox::MailboxReceiver;

/// One agent's receive loop. Messages are handled strictly in arrival order.
pub(crate) struct AgentLoop {
    agent_id: AgentId,
    handler: Arc<dyn MessageHandler>,
    receiver: MailboxReceiver,
    broker: Weak<Broker>,
    log: Arc<dyn MessageLog>,
    clock: Arc<dyn Clock>,
    backoff: Duration,
}

impl AgentLoop {
    pub(crate) fn new(
        agent_id: AgentId,
        handler: Arc<dyn MessageHandler>,
        receiver: MailboxReceiver,
        broker: Weak<Broker>,
        log: Arc<dyn MessageLog>,
        clock: Arc<dyn Clock>,
        backoff: Duration,
    ) -> Self {
        Self { agent_id, handler, receiver, broker, log, clock, backoff }
    }

    pub(crate) async fn run(mut self) {
        while let Some(message) = self.receiver.recv().await {
            let Some(broker) = self.broker.upgrade() else {
                info!(
                    event_name = "agent.loop_stopped",
                    agent_id = %self.agent_id,
                    "broker dropped; stopping agent loop"
                );
                return;
            };
            self.process(&broker, &message).await;
        }

        info!(
            event_name = "agent.loop_stopped",
            agent_id = %self.agent_id,
            "mailbox closed; stopping agent loop"
        );
    }

    async fn process(&self, broker: &Broker, message: &Message) {
        let correlation_id = message.id.to_string();
        debug!(
            event_name = "agent.message_received",
            agent_id = %self.agent_id,
            message_type = %message.event_type,
            correlation_id = %correlation_id,
            from = %message.from,
            "agent received message"
        );

        let ctx = HandlerContext {
            agent_id: &self.agent_id,
            correlation_id: &correlation_id,
            publisher: broker,
        };

        match self.handler.handle(message, &ctx).await {
            Ok(HandlerOutcome::Handled) => self.mark_processed(message, &correlation_id).await,
            Ok(HandlerOutcome::Unhandled { message_type }) => {
                warn!(
                    event_name = "agent.message_unhandled",
                    agent_id = %self.agent_id,
                    message_type = %message_type,
                    correlation_id = %correlation_id,
                    "no handler for message type; marking processed"
                );
                self.mark_processed(message, &correlation_id).await;
            }
            Err(error) => {
                warn!(
                    event_name = "agent.handler_failed",
                    agent_id = %self.agent_id,
                    message_type = %message.event_type,
                    correlation_id = %correlation_id,
                    error = %error,
                    "handler failed; continuing agent loop"
                );
                if let Err(log_error) =
                    self.log.record_failure(&message.id, &self.agent_id, &error.to_string()).await
                {
                    warn!(
                        event_name = "agent.audit_failed",
                        agent_id = %self.agent_id,
                        correlation_id = %correlation_id,
                        error = %log_error,
                        "could not record handler failure"
                    );
                }
                if !self.backoff.is_zero() {
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }

    async fn mark_processed(&self, message: &Message, correlation_id: &str) {
        match self.log.mark_processed(&message.id, &self.agent_id, self.clock.now()).await {
            Ok(true) => debug!(
                event_name = "agent.message_processed",
                agent_id = %self.agent_id,
                message_type = %message.event_type,
                correlation_id = %correlation_id,
                "message processed"
            ),
            // Broadcast copies: the first recipient to finish claims the flag.
            Ok(false) => {}
            Err(error) => warn!(
                event_name = "agent.audit_failed",
                agent_id = %self.agent_id,
                correlation_id = %correlation_id,
                error = %error,
                "could not mark message processed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use alcoguard_core::audit::{InMemoryMessageLog, MessageLog};
    use alcoguard_core::clock::ManualClock;
    use alcoguard_core::domain::message::{AgentId, EventType, Message, NewMessage};

    use crate::broker::{Broker, BrokerSettings};
    use crate::handler::{HandlerContext, HandlerError, HandlerOutcome, MessageHandler};

    struct Flaky {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        async fn handle(
            &self,
            message: &Message,
            _ctx: &HandlerContext<'_>,
        ) -> Result<HandlerOutcome, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match message.event_type {
                EventType::DrinkAdded => Err(HandlerError::Internal("boom".to_owned())),
                EventType::SessionStarted => Ok(HandlerOutcome::Handled),
                ref other => Ok(HandlerOutcome::Unhandled { message_type: other.clone() }),
            }
        }
    }

    async fn wait_for(calls: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if calls.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn loop_survives_handler_failures_and_records_outcomes() {
        let log = InMemoryMessageLog::default();
        let clock = ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 17, 20, 0, 0).single().expect("valid time"),
        );
        let settings = BrokerSettings { handler_backoff: Duration::ZERO, history_limit_max: 100 };
        let broker = Arc::new(Broker::new(Arc::new(log.clone()), Arc::new(clock), settings));

        let calls = Arc::new(AtomicUsize::new(0));
        broker
            .register("worker", [EventType::DrinkAdded], Arc::new(Flaky { calls: calls.clone() }))
            .expect("register");
        let handle = broker.start_agent(&AgentId::from("worker")).expect("start");

        let failed = broker
            .publish(NewMessage::new(EventType::DrinkAdded, "system").to("worker"))
            .await
            .expect("publish");
        let handled = broker
            .publish(NewMessage::new(EventType::SessionStarted, "system").to("worker"))
            .await
            .expect("publish");
        let unknown = broker
            .publish(NewMessage::new(EventType::MoodDetected, "system").to("worker"))
            .await
            .expect("publish");

        wait_for(&calls, 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let failed = log.find(&failed.id).await.expect("find").expect("logged");
        assert!(!failed.processed);
        assert_eq!(failed.failed_by, Some(AgentId::from("worker")));
        assert_eq!(failed.handler_error.as_deref(), Some("handler failure: boom"));

        assert!(log.find(&handled.id).await.expect("find").expect("logged").processed);
        assert!(log.find(&unknown.id).await.expect("find").expect("logged").processed);

        handle.abort();
    }

    #[tokio::test]
    async fn loop_exits_when_agent_is_unregistered() {
        let log = InMemoryMessageLog::default();
        let clock = ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 17, 20, 0, 0).single().expect("valid time"),
        );
        let broker = Arc::new(Broker::new(
            Arc::new(log),
            Arc::new(clock),
            BrokerSettings::default(),
        ));
        let calls = Arc::new(AtomicUsize::new(0));
        broker
            .register("worker", [EventType::DrinkAdded], Arc::new(Flaky { calls }))
            .expect("register");
        let handle = broker.start_agent(&AgentId::from("worker")).expect("start");

        broker.unregister(&AgentId::from("worker")).expect("unregister");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop stops")
            .expect("loop task did not panic");
    }
}
