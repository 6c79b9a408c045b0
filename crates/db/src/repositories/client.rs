use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadwise_core::domain::client::{Client, ClientProfile, ClientUpsert};
use leadwise_core::domain::ConversationKey;

use super::{format_timestamp, parse_timestamp, ClientRepository, RepositoryError};
use crate::DbPool;

pub struct SqlClientRepository {
    pool: DbPool,
}

impl SqlClientRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_CLIENT: &str = "SELECT
        connection_id,
        client_chat_id,
        username,
        full_name,
        first_seen_at,
        last_seen_at
     FROM clients
     WHERE connection_id = ? AND client_chat_id = ?";

#[async_trait::async_trait]
impl ClientRepository for SqlClientRepository {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Client>, RepositoryError> {
        let row = sqlx::query(SELECT_CLIENT)
            .bind(&key.connection_id)
            .bind(key.client_chat_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(client_from_row).transpose()
    }

    async fn record_seen(
        &self,
        key: &ConversationKey,
        profile: &ClientProfile,
        now: DateTime<Utc>,
    ) -> Result<ClientUpsert, RepositoryError> {
        let seen_at = format_timestamp(now);
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO clients (
                connection_id, client_chat_id, username, full_name, first_seen_at, last_seen_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(connection_id, client_chat_id) DO NOTHING",
        )
        .bind(&key.connection_id)
        .bind(key.client_chat_id)
        .bind(profile.username.as_deref())
        .bind(profile.full_name.as_deref())
        .bind(&seen_at)
        .bind(&seen_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            sqlx::query(
                "UPDATE clients
                 SET username = ?, full_name = ?, last_seen_at = ?
                 WHERE connection_id = ? AND client_chat_id = ?",
            )
            .bind(profile.username.as_deref())
            .bind(profile.full_name.as_deref())
            .bind(&seen_at)
            .bind(&key.connection_id)
            .bind(key.client_chat_id)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query(SELECT_CLIENT)
            .bind(&key.connection_id)
            .bind(key.client_chat_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(ClientUpsert { client: client_from_row(row)?, inserted })
    }
}

fn client_from_row(row: SqliteRow) -> Result<Client, RepositoryError> {
    Ok(Client {
        key: ConversationKey::new(
            row.try_get::<String, _>("connection_id")?,
            row.try_get::<i64, _>("client_chat_id")?,
        ),
        profile: ClientProfile {
            username: row.try_get("username")?,
            full_name: row.try_get("full_name")?,
        },
        first_seen_at: parse_timestamp("first_seen_at", row.try_get("first_seen_at")?)?,
        last_seen_at: parse_timestamp("last_seen_at", row.try_get("last_seen_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use leadwise_core::domain::client::ClientProfile;
    use leadwise_core::domain::ConversationKey;

    use super::SqlClientRepository;
    use crate::repositories::ClientRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    #[tokio::test]
    async fn first_message_is_an_insert_and_later_ones_are_updates() {
        let pool = setup_pool().await;
        let repo = SqlClientRepository::new(pool.clone());
        let key = ConversationKey::new("bc-1", 4242);
        let first_seen = parse_ts("2026-03-01T10:00:00Z");
        let later = parse_ts("2026-03-01T10:07:30Z");

        let first = repo
            .record_seen(&key, &ClientProfile { username: None, full_name: Some("Ира".into()) }, first_seen)
            .await
            .expect("first contact");
        let second = repo
            .record_seen(
                &key,
                &ClientProfile { username: Some("ira_k".into()), full_name: Some("Ира".into()) },
                later,
            )
            .await
            .expect("second contact");

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(second.client.first_seen_at, first_seen);
        assert_eq!(second.client.last_seen_at, later);
        assert_eq!(second.client.profile.username.as_deref(), Some("ira_k"));

        let other_connection = repo
            .record_seen(&ConversationKey::new("bc-2", 4242), &ClientProfile::default(), later)
            .await
            .expect("same chat through another connection");
        assert!(other_connection.inserted);

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
