use sqlx::{sqlite::SqliteRow, Row};

use leadwise_core::domain::connection::Connection;

use super::{format_timestamp, parse_timestamp, ConnectionRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConnectionRepository {
    pool: DbPool,
}

impl SqlConnectionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConnectionRepository for SqlConnectionRepository {
    async fn find(&self, connection_id: &str) -> Result<Option<Connection>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_user_id, owner_chat_id, can_reply, updated_at
             FROM connections
             WHERE id = ?",
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(connection_from_row).transpose()
    }

    async fn upsert(&self, connection: Connection) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO connections (id, owner_user_id, owner_chat_id, can_reply, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                owner_user_id = excluded.owner_user_id,
                owner_chat_id = excluded.owner_chat_id,
                can_reply = excluded.can_reply,
                updated_at = excluded.updated_at",
        )
        .bind(&connection.id)
        .bind(connection.owner_user_id)
        .bind(connection.owner_chat_id)
        .bind(connection.can_reply)
        .bind(format_timestamp(connection.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn connection_from_row(row: SqliteRow) -> Result<Connection, RepositoryError> {
    Ok(Connection {
        id: row.try_get("id")?,
        owner_user_id: row.try_get("owner_user_id")?,
        owner_chat_id: row.try_get("owner_chat_id")?,
        can_reply: row.try_get("can_reply")?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use leadwise_core::domain::connection::Connection;

    use super::SqlConnectionRepository;
    use crate::repositories::ConnectionRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    #[tokio::test]
    async fn upsert_refreshes_owner_and_reply_rights() {
        let pool = setup_pool().await;
        let repo = SqlConnectionRepository::new(pool.clone());

        let mut connection = Connection {
            id: "bc-100".to_string(),
            owner_user_id: None,
            owner_chat_id: None,
            can_reply: true,
            updated_at: parse_ts("2026-03-01T09:00:00Z"),
        };
        repo.upsert(connection.clone()).await.expect("insert connection");
        assert!(repo.find("bc-100").await.expect("find").is_some_and(|c| c.is_incomplete()));

        connection.owner_user_id = Some(501);
        connection.owner_chat_id = Some(501);
        connection.can_reply = false;
        connection.updated_at = parse_ts("2026-03-01T09:05:00Z");
        repo.upsert(connection.clone()).await.expect("update connection");

        assert_eq!(repo.find("bc-100").await.expect("find updated"), Some(connection));
        assert_eq!(repo.find("bc-missing").await.expect("find missing"), None);

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
