use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use alcoguard_core::domain::session::{
    Drink, DrinkId, Session, SessionId, SessionStatus, UserId,
};

use super::{decode_timestamp, encode_timestamp, RepositoryError, SessionRepository};
use crate::DbPool;

const SESSION_COLUMNS: &str = "id, user_id, start_time, end_time, total_alcohol_g, status";
const DRINK_COLUMNS: &str =
    "id, session_id, drink_type, volume_ml, alcohol_percentage, alcohol_g, timestamp";

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_session(&self, session_id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM drinking_session WHERE id = ?"))
            .bind(&session_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(session_from_row).transpose()
    }
}

fn session_from_row(row: &SqliteRow) -> Result<Session, RepositoryError> {
    let status: String = row.try_get("status")?;
    let start_time: String = row.try_get("start_time")?;
    let end_time: Option<String> = row.try_get("end_time")?;

    Ok(Session {
        id: SessionId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        start_time: decode_timestamp("start_time", &start_time)?,
        end_time: end_time.as_deref().map(|value| decode_timestamp("end_time", value)).transpose()?,
        total_alcohol_g: row.try_get("total_alcohol_g")?,
        status: SessionStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown session status `{status}`")))?,
    })
}

fn drink_from_row(row: &SqliteRow) -> Result<Drink, RepositoryError> {
    let timestamp: String = row.try_get("timestamp")?;

    Ok(Drink {
        id: DrinkId(row.try_get("id")?),
        session_id: SessionId(row.try_get("session_id")?),
        drink_type: row.try_get("drink_type")?,
        volume_ml: row.try_get("volume_ml")?,
        alcohol_percentage: row.try_get("alcohol_percentage")?,
        alcohol_g: row.try_get("alcohol_g")?,
        timestamp: decode_timestamp("timestamp", &timestamp)?,
    })
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM drinking_session WHERE id = ? AND user_id = ?"
        ))
        .bind(&session_id.0)
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_active_session(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM drinking_session
             WHERE user_id = ? AND status = 'active'
             ORDER BY start_time DESC, rowid DESC
             LIMIT 1"
        ))
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn create_session(&self, session: Session) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO drinking_session (id, user_id, start_time, end_time, total_alcohol_g, status)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id.0)
        .bind(&session.user_id.0)
        .bind(encode_timestamp(session.start_time))
        .bind(session.end_time.map(encode_timestamp))
        .bind(session.total_alcohol_g)
        .bind(session.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| match error {
            sqlx::Error::Database(ref database)
                if database.is_unique_violation()
                    && database.message().contains("drinking_session.user_id") =>
            {
                RepositoryError::ActiveSessionExists(session.user_id.clone())
            }
            other => RepositoryError::Database(other),
        })?;

        Ok(())
    }

    async fn append_drink(&self, drink: Drink) -> Result<Session, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM drinking_session WHERE id = ?")
                .bind(&drink.session_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        match status.as_deref().and_then(SessionStatus::parse) {
            None => return Err(RepositoryError::SessionNotFound(drink.session_id.clone())),
            Some(SessionStatus::Ended) => {
                return Err(RepositoryError::SessionEnded(drink.session_id.clone()))
            }
            Some(SessionStatus::Active) => {}
        }

        sqlx::query(
            "INSERT INTO drink (id, session_id, drink_type, volume_ml, alcohol_percentage, alcohol_g, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&drink.id.0)
        .bind(&drink.session_id.0)
        .bind(&drink.drink_type)
        .bind(drink.volume_ml)
        .bind(drink.alcohol_percentage)
        .bind(drink.alcohol_g)
        .bind(encode_timestamp(drink.timestamp))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE drinking_session SET total_alcohol_g = total_alcohol_g + ? WHERE id = ?",
        )
        .bind(drink.alcohol_g)
        .bind(&drink.session_id.0)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM drinking_session WHERE id = ?"))
            .bind(&drink.session_id.0)
            .fetch_one(&mut *tx)
            .await?;
        let session = session_from_row(&row)?;

        tx.commit().await?;
        Ok(session)
    }

    async fn list_drinks(
        &self,
        session_id: &SessionId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Drink>, RepositoryError> {
        let rows: Vec<SqliteRow> = if let Some(since) = since {
            sqlx::query(&format!(
                "SELECT {DRINK_COLUMNS} FROM drink
                 WHERE session_id = ? AND timestamp > ?
                 ORDER BY timestamp ASC, rowid ASC"
            ))
            .bind(&session_id.0)
            .bind(encode_timestamp(since))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {DRINK_COLUMNS} FROM drink
                 WHERE session_id = ?
                 ORDER BY timestamp ASC, rowid ASC"
            ))
            .bind(&session_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(drink_from_row).collect()
    }

    async fn end_session(
        &self,
        session_id: &SessionId,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        sqlx::query(
            "UPDATE drinking_session SET status = 'ended', end_time = ?
             WHERE id = ? AND status = 'active'",
        )
        .bind(encode_timestamp(at))
        .bind(&session_id.0)
        .execute(&self.pool)
        .await?;

        self.fetch_session(session_id).await
    }
}
