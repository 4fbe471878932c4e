//! Durable, append-only record of every published message.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::message::{AgentId, EventType, Message, MessageId, MessageRecord};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AuditLogError {
    #[error("message `{0}` is already in the audit log")]
    Duplicate(MessageId),
    #[error("audit log storage failure: {0}")]
    Storage(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub from: Option<AgentId>,
    pub event_type: Option<EventType>,
}

impl HistoryFilter {
    pub fn matches(&self, message: &Message) -> bool {
        self.from.as_ref().map_or(true, |from| &message.from == from)
            && self.event_type.as_ref().map_or(true, |event_type| &message.event_type == event_type)
    }
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn append(&self, message: &Message) -> Result<(), AuditLogError>;

    /// Marks the record processed. Returns `false` when another consumer already did.
    async fn mark_processed(
        &self,
        id: &MessageId,
        agent_id: &AgentId,
        at: DateTime<Utc>,
    ) -> Result<bool, AuditLogError>;

    async fn record_failure(
        &self,
        id: &MessageId,
        agent_id: &AgentId,
        error: &str,
    ) -> Result<(), AuditLogError>;

    /// Most recent first.
    async fn history(
        &self,
        filter: &HistoryFilter,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, AuditLogError>;

    async fn find(&self, id: &MessageId) -> Result<Option<MessageRecord>, AuditLogError>;
}

#[derive(Clone, Default)]
pub struct InMemoryMessageLog {
    records: Arc<Mutex<Vec<MessageRecord>>>,
}

impl InMemoryMessageLog {
    pub fn records(&self) -> Vec<MessageRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut Vec<MessageRecord>) -> T) -> T {
        match self.records.lock() {
            Ok(mut records) => f(&mut records),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn append(&self, message: &Message) -> Result<(), AuditLogError> {
        self.with_records(|records| {
            if records.iter().any(|record| record.message.id == message.id) {
                return Err(AuditLogError::Duplicate(message.id.clone()));
            }
            records.push(MessageRecord::pending(message.clone()));
            Ok(())
        })
    }

    async fn mark_processed(
        &self,
        id: &MessageId,
        agent_id: &AgentId,
        at: DateTime<Utc>,
    ) -> Result<bool, AuditLogError> {
        Ok(self.with_records(|records| {
            match records.iter_mut().find(|record| &record.message.id == id) {
                Some(record) if !record.processed => {
                    record.processed = true;
                    record.processed_by = Some(agent_id.clone());
                    record.processed_at = Some(at);
                    true
                }
                _ => false,
            }
        }))
    }

    async fn record_failure(
        &self,
        id: &MessageId,
        agent_id: &AgentId,
        error: &str,
    ) -> Result<(), AuditLogError> {
        self.with_records(|records| {
            if let Some(record) = records.iter_mut().find(|record| &record.message.id == id) {
                if record.failed_by.is_none() {
                    record.failed_by = Some(agent_id.clone());
                    record.handler_error = Some(error.to_owned());
                }
            }
        });
        Ok(())
    }

    async fn history(
        &self,
        filter: &HistoryFilter,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, AuditLogError> {
        let mut matching: Vec<(usize, MessageRecord)> = self.with_records(|records| {
            records
                .iter()
                .enumerate()
                .filter(|(_, record)| filter.matches(&record.message))
                .map(|(position, record)| (position, record.clone()))
                .collect()
        });

        // Equal timestamps fall back to insertion order, newest first.
        matching.sort_by(|(left_pos, left), (right_pos, right)| {
            right
                .message
                .timestamp
                .cmp(&left.message.timestamp)
                .then_with(|| right_pos.cmp(left_pos))
        });

        Ok(matching.into_iter().take(limit).map(|(_, record)| record).collect())
    }

    async fn find(&self, id: &MessageId) -> Result<Option<MessageRecord>, AuditLogError> {
        Ok(self.with_records(|records| {
            records.iter().find(|record| &record.message.id == id).cloned()
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{AuditLogError, HistoryFilter, InMemoryMessageLog, MessageLog};
    use crate::domain::message::{AgentId, EventType, Message, NewMessage};

    fn message(event_type: EventType, from: &str, minute: i64) -> Message {
        let base = Utc.with_ymd_and_hms(2026, 10, 17, 20, 0, 0).single().expect("valid time");
        NewMessage::new(event_type, from)
            .into_message(base + Duration::minutes(minute))
            .expect("valid message")
    }

    #[tokio::test]
    async fn first_consumer_wins_the_processed_mark() {
        let log = InMemoryMessageLog::default();
        let msg = message(EventType::DrinkAdded, "system", 0);
        log.append(&msg).await.expect("append");

        let at = msg.timestamp + Duration::seconds(1);
        assert!(log.mark_processed(&msg.id, &AgentId::from("guardian"), at).await.expect("mark"));
        assert!(!log.mark_processed(&msg.id, &AgentId::from("bartender"), at).await.expect("mark"));

        let record = log.find(&msg.id).await.expect("find").expect("record present");
        assert!(record.processed);
        assert_eq!(record.processed_by, Some(AgentId::from("guardian")));
    }

    #[tokio::test]
    async fn duplicate_append_is_rejected() {
        let log = InMemoryMessageLog::default();
        let msg = message(EventType::DrinkAdded, "system", 0);
        log.append(&msg).await.expect("append");

        assert_eq!(log.append(&msg).await, Err(AuditLogError::Duplicate(msg.id.clone())));
    }

    #[tokio::test]
    async fn history_is_newest_first_filtered_and_limited() {
        let log = InMemoryMessageLog::default();
        for (minute, (event_type, from)) in [
            (EventType::SessionStarted, "system"),
            (EventType::DrinkAdded, "system"),
            (EventType::GuardianVeto, "guardian"),
            (EventType::DrinkAdded, "system"),
        ]
        .into_iter()
        .enumerate()
        {
            log.append(&message(event_type, from, minute as i64)).await.expect("append");
        }

        let all = log.history(&HistoryFilter::default(), 10).await.expect("history");
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|pair| pair[0].message.timestamp >= pair[1].message.timestamp));

        let drinks = HistoryFilter { from: None, event_type: Some(EventType::DrinkAdded) };
        let latest = log.history(&drinks, 1).await.expect("history");
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].message.timestamp, all[0].message.timestamp);

        let from_guardian = HistoryFilter { from: Some(AgentId::from("guardian")), event_type: None };
        assert_eq!(log.history(&from_guardian, 10).await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn failure_annotation_keeps_first_error() {
        let log = InMemoryMessageLog::default();
        let msg = message(EventType::DrinkAdded, "system", 0);
        log.append(&msg).await.expect("append");

        log.record_failure(&msg.id, &AgentId::from("guardian"), "boom").await.expect("record");
        log.record_failure(&msg.id, &AgentId::from("guardian"), "again").await.expect("record");

        let record = log.find(&msg.id).await.expect("find").expect("record present");
        assert_eq!(record.handler_error.as_deref(), Some("boom"));
        assert!(!record.processed);
    }
}
