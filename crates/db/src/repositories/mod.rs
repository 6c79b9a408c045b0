use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use thiserror::Error;

use leadwise_core::domain::client::{Client, ClientProfile, ClientUpsert};
use leadwise_core::domain::connection::Connection;
use leadwise_core::domain::escalation::{Escalation, EscalationMark, EscalationMarkOutcome};
use leadwise_core::domain::knowledge::{KnowledgeChunk, RetrievedChunk};
use leadwise_core::domain::lead::{Lead, LeadPatch};
use leadwise_core::domain::ConversationKey;

use crate::DbPool;

pub mod client;
pub mod connection;
pub mod escalation;
pub mod knowledge;
pub mod lead;
pub mod memory;
pub mod settings;

pub use client::SqlClientRepository;
pub use connection::SqlConnectionRepository;
pub use escalation::SqlEscalationRepository;
pub use knowledge::SqlKnowledgeRepository;
pub use lead::SqlLeadRepository;
pub use memory::{
    InMemoryClientRepository, InMemoryConnectionRepository, InMemoryEscalationRepository,
    InMemoryKnowledgeRepository, InMemoryLeadRepository, InMemorySettingsRepository,
};
pub use settings::{SqlSettingsRepository, ADMIN_CHAT_ID_KEY};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn find(&self, connection_id: &str) -> Result<Option<Connection>, RepositoryError>;
    async fn upsert(&self, connection: Connection) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Client>, RepositoryError>;

    /// Records a message from the client; `inserted` is true only for the very first one.
    async fn record_seen(
        &self,
        key: &ConversationKey,
        profile: &ClientProfile,
        now: DateTime<Utc>,
    ) -> Result<ClientUpsert, RepositoryError>;
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Lead>, RepositoryError>;

    /// Returns the stored lead, creating a fresh `Welcome` one when absent.
    async fn get_or_create(
        &self,
        key: &ConversationKey,
        now: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError>;

    /// Writes only the supplied fields plus `updated_at`; `None` when no lead exists.
    async fn update(
        &self,
        key: &ConversationKey,
        patch: &LeadPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, RepositoryError>;

    /// Clears every collected field in one statement, creating the lead if needed.
    async fn reset(&self, key: &ConversationKey, now: DateTime<Utc>)
        -> Result<Lead, RepositoryError>;
}

#[async_trait]
pub trait EscalationRepository: Send + Sync {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Escalation>, RepositoryError>;

    /// Opens or refreshes the escalation and atomically decides whether this event may alert.
    async fn mark(
        &self,
        key: &ConversationKey,
        mark: &EscalationMark,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<EscalationMarkOutcome, RepositoryError>;

    /// Returns whether an open escalation was closed.
    async fn close(&self, key: &ConversationKey, now: DateTime<Utc>)
        -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError>;
    async fn set(&self, key: &str, value: &str, now: DateTime<Utc>)
        -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    /// Inserts or replaces chunks by id and returns how many were written.
    async fn upsert_chunks(
        &self,
        chunks: &[KnowledgeChunk],
        now: DateTime<Utc>,
    ) -> Result<usize, RepositoryError>;

    /// Top `k` chunks by ascending cosine distance; empty when the store is not provisioned.
    async fn nearest(&self, query: &[f32], k: usize)
        -> Result<Vec<RetrievedChunk>, RepositoryError>;

    async fn count(&self) -> Result<u64, RepositoryError>;
}

/// Every storage capability the conversation runtime consumes.
#[derive(Clone)]
pub struct Repositories {
    pub connections: Arc<dyn ConnectionRepository>,
    pub clients: Arc<dyn ClientRepository>,
    pub leads: Arc<dyn LeadRepository>,
    pub escalations: Arc<dyn EscalationRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub knowledge: Arc<dyn KnowledgeRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            connections: Arc::new(SqlConnectionRepository::new(pool.clone())),
            clients: Arc::new(SqlClientRepository::new(pool.clone())),
            leads: Arc::new(SqlLeadRepository::new(pool.clone())),
            escalations: Arc::new(SqlEscalationRepository::new(pool.clone())),
            settings: Arc::new(SqlSettingsRepository::new(pool.clone())),
            knowledge: Arc::new(SqlKnowledgeRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            connections: Arc::new(InMemoryConnectionRepository::default()),
            clients: Arc::new(InMemoryClientRepository::default()),
            leads: Arc::new(InMemoryLeadRepository::default()),
            escalations: Arc::new(InMemoryEscalationRepository::default()),
            settings: Arc::new(InMemorySettingsRepository::default()),
            knowledge: Arc::new(InMemoryKnowledgeRepository::default()),
        }
    }
}

/// Fixed-width RFC3339 so that lexical order in SQL equals chronological order.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
