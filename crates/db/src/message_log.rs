use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use alcoguard_core::audit::{AuditLogError, HistoryFilter, MessageLog};
use alcoguard_core::domain::message::{
    AgentId, EventType, Message, MessageId, MessageRecord, Payload, Recipient,
};

use crate::repositories::{decode_timestamp, encode_timestamp, RepositoryError};
use crate::DbPool;

const MESSAGE_COLUMNS: &str = "id, event_type, from_agent, to_agent, payload_json, created_at,
     processed, processed_by, processed_at, failed_by, handler_error";

/// `agent_message`-backed audit log.
pub struct SqlMessageLog {
    pool: DbPool,
}

impl SqlMessageLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn storage(error: sqlx::Error) -> AuditLogError {
    AuditLogError::Storage(error.to_string())
}

fn decode(error: RepositoryError) -> AuditLogError {
    AuditLogError::Storage(error.to_string())
}

fn record_from_row(row: &SqliteRow) -> Result<MessageRecord, RepositoryError> {
    let event_type: String = row.try_get("event_type")?;
    let to_agent: String = row.try_get("to_agent")?;
    let payload_json: String = row.try_get("payload_json")?;
    let created_at: String = row.try_get("created_at")?;
    let processed_at: Option<String> = row.try_get("processed_at")?;
    let processed_by: Option<String> = row.try_get("processed_by")?;
    let failed_by: Option<String> = row.try_get("failed_by")?;

    let payload: Payload = serde_json::from_str(&payload_json)
        .map_err(|error| RepositoryError::Decode(format!("payload_json: {error}")))?;

    Ok(MessageRecord {
        message: Message {
            id: MessageId(row.try_get("id")?),
            event_type: EventType::parse(&event_type),
            from: AgentId(row.try_get("from_agent")?),
            to: Recipient::parse(&to_agent),
            payload,
            timestamp: decode_timestamp("created_at", &created_at)?,
        },
        processed: row.try_get::<i64, _>("processed")? != 0,
        processed_by: processed_by.map(AgentId),
        processed_at: processed_at
            .as_deref()
            .map(|value| decode_timestamp("processed_at", value))
            .transpose()?,
        failed_by: failed_by.map(AgentId),
        handler_error: row.try_get("handler_error")?,
    })
}

#[async_trait]
impl MessageLog for SqlMessageLog {
    async fn append(&self, message: &Message) -> Result<(), AuditLogError> {
        let payload_json = serde_json::to_string(&message.payload)
            .map_err(|error| AuditLogError::Storage(format!("payload encode: {error}")))?;

        let result = sqlx::query(
            "INSERT INTO agent_message (id, event_type, from_agent, to_agent, payload_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(message.event_type.as_str())
        .bind(message.from.as_str())
        .bind(message.to.as_str())
        .bind(payload_json)
        .bind(encode_timestamp(message.timestamp))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(AuditLogError::Duplicate(message.id.clone()))
            }
            Err(error) => Err(storage(error)),
        }
    }

    async fn mark_processed(
        &self,
        id: &MessageId,
        agent_id: &AgentId,
        at: DateTime<Utc>,
    ) -> Result<bool, AuditLogError> {
        let result = sqlx::query(
            "UPDATE agent_message
             SET processed = 1, processed_by = ?, processed_at = ?
             WHERE id = ? AND processed = 0",
        )
        .bind(agent_id.as_str())
        .bind(encode_timestamp(at))
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(
        &self,
        id: &MessageId,
        agent_id: &AgentId,
        error: &str,
    ) -> Result<(), AuditLogError> {
        sqlx::query(
            "UPDATE agent_message
             SET failed_by = ?, handler_error = ?
             WHERE id = ? AND failed_by IS NULL",
        )
        .bind(agent_id.as_str())
        .bind(error)
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn history(
        &self,
        filter: &HistoryFilter,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, AuditLogError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM agent_message
             WHERE (? IS NULL OR from_agent = ?)
               AND (? IS NULL OR event_type = ?)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?"
        ))
        .bind(filter.from.as_ref().map(AgentId::as_str))
        .bind(filter.from.as_ref().map(AgentId::as_str))
        .bind(filter.event_type.as_ref().map(EventType::as_str))
        .bind(filter.event_type.as_ref().map(EventType::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(|row| record_from_row(row).map_err(decode)).collect()
    }

    async fn find(&self, id: &MessageId) -> Result<Option<MessageRecord>, AuditLogError> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM agent_message WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(|row| record_from_row(row).map_err(decode)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use alcoguard_core::audit::{AuditLogError, HistoryFilter, MessageLog};
    use alcoguard_core::domain::message::{AgentId, EventType, Message, NewMessage, Payload, Recipient};

    use super::SqlMessageLog;
    use crate::{connect_with_settings, migrations};

    async fn log() -> SqlMessageLog {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlMessageLog::new(pool)
    }

    fn message(event_type: EventType, from: &str, to: Option<&str>, second: i64) -> Message {
        let base = Utc.with_ymd_and_hms(2026, 10, 17, 20, 0, 0).single().expect("valid time");
        let mut payload = Payload::new();
        payload.insert("user_id".to_owned(), json!("u-1"));
        let mut new = NewMessage::new(event_type, from).with_payload(payload);
        if let Some(to) = to {
            new = new.to(to);
        }
        new.into_message(base + Duration::seconds(second)).expect("valid message")
    }

    #[tokio::test]
    async fn appended_message_round_trips_with_audit_fields() {
        let log = log().await;
        let msg = message(EventType::GuardianVeto, "guardian", Some("bartender"), 0);
        log.append(&msg).await.expect("append");

        let at = msg.timestamp + Duration::seconds(2);
        assert!(log.mark_processed(&msg.id, &AgentId::from("bartender"), at).await.expect("mark"));
        assert!(!log.mark_processed(&msg.id, &AgentId::from("other"), at).await.expect("mark"));

        let record = log.find(&msg.id).await.expect("find").expect("present");
        assert_eq!(record.message, msg);
        assert_eq!(record.message.to, Recipient::Agent(AgentId::from("bartender")));
        assert!(record.processed);
        assert_eq!(record.processed_by, Some(AgentId::from("bartender")));
        assert_eq!(record.processed_at, Some(at));
    }

    #[tokio::test]
    async fn duplicate_ids_are_reported() {
        let log = log().await;
        let msg = message(EventType::DrinkAdded, "system", None, 0);
        log.append(&msg).await.expect("append");

        assert_eq!(log.append(&msg).await, Err(AuditLogError::Duplicate(msg.id.clone())));
    }

    #[tokio::test]
    async fn history_filters_and_orders_newest_first() {
        let log = log().await;
        log.append(&message(EventType::SessionStarted, "system", None, 0)).await.expect("append");
        log.append(&message(EventType::DrinkAdded, "system", Some("guardian"), 1)).await.expect("append");
        log.append(&message(EventType::SessionStats, "guardian", None, 2)).await.expect("append");
        log.append(&message(EventType::DrinkAdded, "system", Some("guardian"), 3)).await.expect("append");

        let all = log.history(&HistoryFilter::default(), 100).await.expect("history");
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].message.event_type, EventType::DrinkAdded);
        assert_eq!(all[3].message.event_type, EventType::SessionStarted);

        let drinks = log
            .history(&HistoryFilter { from: None, event_type: Some(EventType::DrinkAdded) }, 100)
            .await
            .expect("history");
        assert_eq!(drinks.len(), 2);

        let guardian = log
            .history(&HistoryFilter { from: Some(AgentId::from("guardian")), event_type: None }, 100)
            .await
            .expect("history");
        assert_eq!(guardian.len(), 1);

        let limited = log.history(&HistoryFilter::default(), 2).await.expect("history");
        assert_eq!(limited.len(), 2);
    }
}
