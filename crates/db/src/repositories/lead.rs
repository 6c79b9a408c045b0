use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};

use leadwise_core::domain::escalation::Urgency;
use leadwise_core::domain::lead::{Lead, LeadPatch, LeadSummary};
use leadwise_core::domain::ConversationKey;
use leadwise_core::flows::LeadStep;

use super::{
    format_timestamp, parse_optional_timestamp, parse_timestamp, LeadRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_LEAD: &str = "SELECT
        connection_id,
        client_chat_id,
        step,
        need,
        budget,
        deadline,
        contact_method,
        phone,
        call_time,
        summary_json,
        escalation_open,
        escalation_last_at,
        last_client_message,
        retrieved_source_urls_json,
        urgency,
        created_at,
        updated_at
     FROM leads
     WHERE connection_id = ? AND client_chat_id = ?";

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(SELECT_LEAD)
            .bind(&key.connection_id)
            .bind(key.client_chat_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(lead_from_row).transpose()
    }

    async fn get_or_create(
        &self,
        key: &ConversationKey,
        now: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError> {
        let created_at = format_timestamp(now);
        sqlx::query(
            "INSERT INTO leads (connection_id, client_chat_id, step, created_at, updated_at)
             VALUES (?, ?, 0, ?, ?)
             ON CONFLICT(connection_id, client_chat_id) DO NOTHING",
        )
        .bind(&key.connection_id)
        .bind(key.client_chat_id)
        .bind(&created_at)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(SELECT_LEAD)
            .bind(&key.connection_id)
            .bind(key.client_chat_id)
            .fetch_one(&self.pool)
            .await?;
        lead_from_row(row)
    }

    async fn update(
        &self,
        key: &ConversationKey,
        patch: &LeadPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, RepositoryError> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE leads SET updated_at = ");
        builder.push_bind(format_timestamp(now));

        if let Some(step) = patch.step {
            builder.push(", step = ").push_bind(i64::from(step.ordinal()));
        }
        if let Some(need) = patch.need {
            builder.push(", need = ").push_bind(need.as_str());
        }
        if let Some(budget) = patch.budget {
            builder.push(", budget = ").push_bind(budget.as_str());
        }
        if let Some(deadline) = patch.deadline {
            builder.push(", deadline = ").push_bind(deadline.as_str());
        }
        if let Some(contact_method) = patch.contact_method {
            builder.push(", contact_method = ").push_bind(contact_method.as_str());
        }
        if let Some(phone) = &patch.phone {
            builder.push(", phone = ").push_bind(phone.clone());
        }
        if let Some(call_time) = &patch.call_time {
            builder.push(", call_time = ").push_bind(call_time.clone());
        }
        if let Some(summary) = &patch.summary {
            builder.push(", summary_json = ").push_bind(encode_json("summary_json", summary)?);
        }
        if let Some(open) = patch.escalation_open {
            builder.push(", escalation_open = ").push_bind(open);
        }
        if let Some(last_at) = patch.escalation_last_at {
            builder.push(", escalation_last_at = ").push_bind(format_timestamp(last_at));
        }
        if let Some(message) = &patch.last_client_message {
            builder.push(", last_client_message = ").push_bind(message.clone());
        }
        if let Some(urls) = &patch.retrieved_source_urls {
            builder
                .push(", retrieved_source_urls_json = ")
                .push_bind(encode_json("retrieved_source_urls_json", urls)?);
        }
        if let Some(urgency) = patch.urgency {
            builder.push(", urgency = ").push_bind(urgency.as_str());
        }

        builder
            .push(" WHERE connection_id = ")
            .push_bind(key.connection_id.clone())
            .push(" AND client_chat_id = ")
            .push_bind(key.client_chat_id);

        let affected = builder.build().execute(&self.pool).await?.rows_affected();
        if affected == 0 {
            return Ok(None);
        }
        self.find(key).await
    }

    async fn reset(
        &self,
        key: &ConversationKey,
        now: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError> {
        let reset_at = format_timestamp(now);
        sqlx::query(
            "INSERT INTO leads (connection_id, client_chat_id, step, created_at, updated_at)
             VALUES (?, ?, 0, ?, ?)
             ON CONFLICT(connection_id, client_chat_id) DO UPDATE SET
                step = 0,
                need = NULL,
                budget = NULL,
                deadline = NULL,
                contact_method = NULL,
                phone = NULL,
                call_time = NULL,
                summary_json = NULL,
                escalation_open = 0,
                escalation_last_at = NULL,
                last_client_message = NULL,
                retrieved_source_urls_json = '[]',
                urgency = NULL,
                updated_at = excluded.updated_at",
        )
        .bind(&key.connection_id)
        .bind(key.client_chat_id)
        .bind(&reset_at)
        .bind(&reset_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(SELECT_LEAD)
            .bind(&key.connection_id)
            .bind(key.client_chat_id)
            .fetch_one(&self.pool)
            .await?;
        lead_from_row(row)
    }
}

fn encode_json<T: serde::Serialize + ?Sized>(
    column: &str,
    value: &T,
) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode `{column}`: {error}")))
}

fn parse_field<T>(column: &str, value: Option<String>) -> Result<Option<T>, RepositoryError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.parse::<T>().map_err(|error| {
                RepositoryError::Decode(format!("invalid value in `{column}`: {error}"))
            })
        })
        .transpose()
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    let step_raw = row.try_get::<i64, _>("step")?;
    let step = LeadStep::from_ordinal(step_raw)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    let summary = row
        .try_get::<Option<String>, _>("summary_json")?
        .map(|raw| {
            serde_json::from_str::<LeadSummary>(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid lead summary json: {error}"))
            })
        })
        .transpose()?;

    let urls_raw = row.try_get::<String, _>("retrieved_source_urls_json")?;
    let retrieved_source_urls = serde_json::from_str::<Vec<String>>(&urls_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid retrieved source urls json: {error}"))
    })?;

    Ok(Lead {
        key: ConversationKey::new(
            row.try_get::<String, _>("connection_id")?,
            row.try_get::<i64, _>("client_chat_id")?,
        ),
        step,
        need: parse_field("need", row.try_get("need")?)?,
        budget: parse_field("budget", row.try_get("budget")?)?,
        deadline: parse_field("deadline", row.try_get("deadline")?)?,
        contact_method: parse_field("contact_method", row.try_get("contact_method")?)?,
        phone: row.try_get("phone")?,
        call_time: row.try_get("call_time")?,
        summary,
        escalation_open: row.try_get("escalation_open")?,
        escalation_last_at: parse_optional_timestamp(
            "escalation_last_at",
            row.try_get("escalation_last_at")?,
        )?,
        last_client_message: row.try_get("last_client_message")?,
        retrieved_source_urls,
        urgency: parse_field::<Urgency>("urgency", row.try_get("urgency")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use leadwise_core::domain::escalation::Urgency;
    use leadwise_core::domain::lead::{Budget, ContactMethod, Deadline, LeadPatch, Need};
    use leadwise_core::domain::ConversationKey;
    use leadwise_core::flows::LeadStep;

    use super::SqlLeadRepository;
    use crate::repositories::LeadRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    #[tokio::test]
    async fn get_or_create_starts_at_welcome_and_is_idempotent() {
        let pool = setup_pool().await;
        let repo = SqlLeadRepository::new(pool.clone());
        let key = ConversationKey::new("bc-1", 7);

        let created = repo.get_or_create(&key, parse_ts("2026-03-02T08:00:00Z")).await.expect("create");
        let again = repo.get_or_create(&key, parse_ts("2026-03-02T08:10:00Z")).await.expect("reuse");

        assert_eq!(created.step, LeadStep::Welcome);
        assert!(created.retrieved_source_urls.is_empty());
        assert_eq!(again, created);

        pool.close().await;
    }

    #[tokio::test]
    async fn partial_update_leaves_unrelated_fields_and_stamps_updated_at() {
        let pool = setup_pool().await;
        let repo = SqlLeadRepository::new(pool.clone());
        let key = ConversationKey::new("bc-1", 8);
        repo.get_or_create(&key, parse_ts("2026-03-02T08:00:00Z")).await.expect("create");

        repo.update(
            &key,
            &LeadPatch {
                step: Some(LeadStep::Budget),
                need: Some(Need::Site),
                deadline: Some(Deadline::Month),
                contact_method: Some(ContactMethod::Call),
                ..LeadPatch::default()
            },
            parse_ts("2026-03-02T08:01:00Z"),
        )
        .await
        .expect("first update");

        let later = parse_ts("2026-03-02T08:02:00Z");
        let updated = repo
            .update(&key, &LeadPatch { budget: Some(Budget::From80To150k), ..LeadPatch::default() }, later)
            .await
            .expect("budget update")
            .expect("lead exists");

        assert_eq!(updated.budget, Some(Budget::From80To150k));
        assert_eq!(updated.need, Some(Need::Site));
        assert_eq!(updated.deadline, Some(Deadline::Month));
        assert_eq!(updated.contact_method, Some(ContactMethod::Call));
        assert_eq!(updated.step, LeadStep::Budget);
        assert_eq!(updated.updated_at, later);

        pool.close().await;
    }

    #[tokio::test]
    async fn summary_sources_and_escalation_mirror_are_persisted() {
        let pool = setup_pool().await;
        let repo = SqlLeadRepository::new(pool.clone());
        let key = ConversationKey::new("bc-1", 9);
        let lead = repo.get_or_create(&key, parse_ts("2026-03-02T08:00:00Z")).await.expect("create");
        let alerted_at = parse_ts("2026-03-02T08:03:00.123456Z");

        let updated = repo
            .update(
                &key,
                &LeadPatch {
                    summary: Some(lead.summary()),
                    retrieved_source_urls: Some(vec![
                        "https://example.com/pricing".to_string(),
                        "https://example.com/faq".to_string(),
                    ]),
                    escalation_open: Some(true),
                    escalation_last_at: Some(alerted_at),
                    urgency: Some(Urgency::High),
                    last_client_message: Some("где мой заказ?".to_string()),
                    ..LeadPatch::default()
                },
                alerted_at,
            )
            .await
            .expect("update")
            .expect("lead exists");

        assert_eq!(updated.summary, Some(lead.summary()));
        assert_eq!(updated.retrieved_source_urls.len(), 2);
        assert!(updated.escalation_open);
        assert_eq!(updated.escalation_last_at, Some(alerted_at));
        assert_eq!(updated.urgency, Some(Urgency::High));

        pool.close().await;
    }

    #[tokio::test]
    async fn update_of_missing_lead_is_none() {
        let pool = setup_pool().await;
        let repo = SqlLeadRepository::new(pool.clone());

        let result = repo
            .update(
                &ConversationKey::new("bc-1", 404),
                &LeadPatch::step(LeadStep::Need),
                parse_ts("2026-03-02T08:00:00Z"),
            )
            .await
            .expect("update");

        assert_eq!(result, None);
        pool.close().await;
    }

    #[tokio::test]
    async fn reset_clears_everything_but_identity() {
        let pool = setup_pool().await;
        let repo = SqlLeadRepository::new(pool.clone());
        let key = ConversationKey::new("bc-1", 10);
        let created_at = parse_ts("2026-03-02T08:00:00Z");
        repo.get_or_create(&key, created_at).await.expect("create");
        repo.update(
            &key,
            &LeadPatch {
                step: Some(LeadStep::Done),
                need: Some(Need::Bot),
                budget: Some(Budget::UpTo30k),
                contact_method: Some(ContactMethod::Phone),
                phone: Some("+7 900 123 45 67".to_string()),
                escalation_open: Some(true),
                urgency: Some(Urgency::Medium),
                ..LeadPatch::default()
            },
            parse_ts("2026-03-02T08:05:00Z"),
        )
        .await
        .expect("fill");

        let reset_at = parse_ts("2026-03-03T11:00:00Z");
        let reset = repo.reset(&key, reset_at).await.expect("reset");

        assert_eq!(reset.step, LeadStep::Welcome);
        assert_eq!(reset.need, None);
        assert_eq!(reset.budget, None);
        assert_eq!(reset.phone, None);
        assert_eq!(reset.urgency, None);
        assert!(!reset.escalation_open);
        assert_eq!(reset.created_at, created_at);
        assert_eq!(reset.updated_at, reset_at);

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
