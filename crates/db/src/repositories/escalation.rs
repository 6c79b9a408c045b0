use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use leadwise_core::domain::escalation::{
    Escalation, EscalationMark, EscalationMarkOutcome, Urgency,
};
use leadwise_core::domain::ConversationKey;

use super::{
    format_timestamp, parse_optional_timestamp, parse_timestamp, EscalationRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlEscalationRepository {
    pool: DbPool,
}

impl SqlEscalationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EscalationRepository for SqlEscalationRepository {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Escalation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                connection_id,
                client_chat_id,
                is_open,
                last_alert_at,
                reason,
                urgency,
                last_message,
                created_at,
                updated_at
             FROM escalations
             WHERE connection_id = ? AND client_chat_id = ?",
        )
        .bind(&key.connection_id)
        .bind(key.client_chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(escalation_from_row).transpose()
    }

    async fn mark(
        &self,
        key: &ConversationKey,
        mark: &EscalationMark,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<EscalationMarkOutcome, RepositoryError> {
        // The claim token moves together with last_alert_at, so reading it back
        // tells whether this call won the gate even when timestamps repeat.
        let claim = Uuid::new_v4().to_string();
        let marked_at = format_timestamp(now);
        let threshold = format_timestamp(now - cooldown);

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO escalations (
                connection_id,
                client_chat_id,
                is_open,
                last_alert_at,
                alert_claim,
                reason,
                urgency,
                last_message,
                created_at,
                updated_at
             ) VALUES (?, ?, 1, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(connection_id, client_chat_id) DO UPDATE SET
                is_open = 1,
                alert_claim = CASE
                    WHEN escalations.last_alert_at IS NULL OR escalations.last_alert_at <= ?
                    THEN excluded.alert_claim
                    ELSE escalations.alert_claim
                END,
                last_alert_at = CASE
                    WHEN escalations.last_alert_at IS NULL OR escalations.last_alert_at <= ?
                    THEN excluded.last_alert_at
                    ELSE escalations.last_alert_at
                END,
                reason = excluded.reason,
                urgency = excluded.urgency,
                last_message = excluded.last_message,
                updated_at = excluded.updated_at
             RETURNING last_alert_at, alert_claim",
        )
        .bind(&key.connection_id)
        .bind(key.client_chat_id)
        .bind(&marked_at)
        .bind(&claim)
        .bind(&mark.reason)
        .bind(mark.urgency.as_str())
        .bind(&mark.last_message)
        .bind(&marked_at)
        .bind(&marked_at)
        .bind(&threshold)
        .bind(&threshold)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let stored_claim = row.try_get::<Option<String>, _>("alert_claim")?;
        let last_alert_at =
            parse_optional_timestamp("last_alert_at", row.try_get("last_alert_at")?)?;

        Ok(EscalationMarkOutcome {
            should_alert: stored_claim.as_deref() == Some(claim.as_str()),
            last_alert_at,
        })
    }

    async fn close(
        &self,
        key: &ConversationKey,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let affected = sqlx::query(
            "UPDATE escalations
             SET is_open = 0, updated_at = ?
             WHERE connection_id = ? AND client_chat_id = ? AND is_open = 1",
        )
        .bind(format_timestamp(now))
        .bind(&key.connection_id)
        .bind(key.client_chat_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected > 0)
    }
}

fn escalation_from_row(row: SqliteRow) -> Result<Escalation, RepositoryError> {
    let urgency_raw = row.try_get::<String, _>("urgency")?;
    let urgency = urgency_raw.parse::<Urgency>().map_err(|error| {
        RepositoryError::Decode(format!("invalid value in `urgency`: {error}"))
    })?;

    Ok(Escalation {
        key: ConversationKey::new(
            row.try_get::<String, _>("connection_id")?,
            row.try_get::<i64, _>("client_chat_id")?,
        ),
        open: row.try_get("is_open")?,
        last_alert_at: parse_optional_timestamp("last_alert_at", row.try_get("last_alert_at")?)?,
        reason: row.try_get("reason")?,
        urgency,
        last_message: row.try_get("last_message")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
