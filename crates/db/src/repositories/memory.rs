use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use leadwise_core::domain::client::{Client, ClientProfile, ClientUpsert};
use leadwise_core::domain::connection::Connection;
use leadwise_core::domain::escalation::{Escalation, EscalationMark, EscalationMarkOutcome};
use leadwise_core::domain::knowledge::{rank_nearest, KnowledgeChunk, RetrievedChunk};
use leadwise_core::domain::lead::{Lead, LeadPatch};
use leadwise_core::domain::ConversationKey;

use super::{
    ClientRepository, ConnectionRepository, EscalationRepository, KnowledgeRepository,
    LeadRepository, RepositoryError, SettingsRepository,
};

#[derive(Default)]
pub struct InMemoryConnectionRepository {
    connections: RwLock<HashMap<String, Connection>>,
}

#[async_trait::async_trait]
impl ConnectionRepository for InMemoryConnectionRepository {
    async fn find(&self, connection_id: &str) -> Result<Option<Connection>, RepositoryError> {
        let connections = self.connections.read().await;
        Ok(connections.get(connection_id).cloned())
    }

    async fn upsert(&self, connection: Connection) -> Result<(), RepositoryError> {
        let mut connections = self.connections.write().await;
        connections.insert(connection.id.clone(), connection);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryClientRepository {
    clients: RwLock<HashMap<ConversationKey, Client>>,
}

#[async_trait::async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Client>, RepositoryError> {
        let clients = self.clients.read().await;
        Ok(clients.get(key).cloned())
    }

    async fn record_seen(
        &self,
        key: &ConversationKey,
        profile: &ClientProfile,
        now: DateTime<Utc>,
    ) -> Result<ClientUpsert, RepositoryError> {
        let mut clients = self.clients.write().await;
        match clients.get_mut(key) {
            Some(client) => {
                client.profile = profile.clone();
                client.last_seen_at = now;
                Ok(ClientUpsert { client: client.clone(), inserted: false })
            }
            None => {
                let client = Client {
                    key: key.clone(),
                    profile: profile.clone(),
                    first_seen_at: now,
                    last_seen_at: now,
                };
                clients.insert(key.clone(), client.clone());
                Ok(ClientUpsert { client, inserted: true })
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryLeadRepository {
    leads: RwLock<HashMap<ConversationKey, Lead>>,
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryLeadRepository {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads.get(key).cloned())
    }

    async fn get_or_create(
        &self,
        key: &ConversationKey,
        now: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError> {
        let mut leads = self.leads.write().await;
        Ok(leads.entry(key.clone()).or_insert_with(|| Lead::new(key.clone(), now)).clone())
    }

    async fn update(
        &self,
        key: &ConversationKey,
        patch: &LeadPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, RepositoryError> {
        let mut leads = self.leads.write().await;
        Ok(leads.get_mut(key).map(|lead| {
            lead.apply(patch, now);
            lead.clone()
        }))
    }

    async fn reset(
        &self,
        key: &ConversationKey,
        now: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError> {
        let mut leads = self.leads.write().await;
        let lead = leads.entry(key.clone()).or_insert_with(|| Lead::new(key.clone(), now));
        lead.reset(now);
        Ok(lead.clone())
    }
}

#[derive(Default)]
pub struct InMemoryEscalationRepository {
    escalations: RwLock<HashMap<ConversationKey, Escalation>>,
}

#[async_trait::async_trait]
impl EscalationRepository for InMemoryEscalationRepository {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Escalation>, RepositoryError> {
        let escalations = self.escalations.read().await;
        Ok(escalations.get(key).cloned())
    }

    async fn mark(
        &self,
        key: &ConversationKey,
        mark: &EscalationMark,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<EscalationMarkOutcome, RepositoryError> {
        let mut escalations = self.escalations.write().await;
        match escalations.get_mut(key) {
            Some(escalation) => Ok(escalation.remark(mark.clone(), now, cooldown)),
            None => {
                let escalation = Escalation::opened(key.clone(), mark.clone(), now);
                let outcome =
                    EscalationMarkOutcome { should_alert: true, last_alert_at: escalation.last_alert_at };
                escalations.insert(key.clone(), escalation);
                Ok(outcome)
            }
        }
    }

    async fn close(
        &self,
        key: &ConversationKey,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut escalations = self.escalations.write().await;
        match escalations.get_mut(key) {
            Some(escalation) if escalation.open => {
                escalation.open = false;
                escalation.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemorySettingsRepository {
    values: RwLock<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let values = self.values.read().await;
        Ok(values.get(key).cloned())
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        _now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut values = self.values.write().await;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryKnowledgeRepository {
    chunks: RwLock<HashMap<String, KnowledgeChunk>>,
}

#[async_trait::async_trait]
impl KnowledgeRepository for InMemoryKnowledgeRepository {
    async fn upsert_chunks(
        &self,
        chunks: &[KnowledgeChunk],
        _now: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let mut stored = self.chunks.write().await;
        for chunk in chunks {
            stored.insert(chunk.id.0.clone(), chunk.clone());
        }
        Ok(chunks.len())
    }

    async fn nearest(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RepositoryError> {
        let stored = self.chunks.read().await;
        Ok(rank_nearest(query, stored.values().cloned(), k))
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let stored = self.chunks.read().await;
        Ok(stored.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use leadwise_core::domain::client::ClientProfile;
    use leadwise_core::domain::escalation::{EscalationMark, Urgency};
    use leadwise_core::domain::lead::{Budget, LeadPatch, Need};
    use leadwise_core::domain::ConversationKey;

    use crate::repositories::{
        ClientRepository, EscalationRepository, InMemoryClientRepository,
        InMemoryEscalationRepository, InMemoryLeadRepository, LeadRepository,
    };

    #[tokio::test]
    async fn in_memory_client_repo_reports_first_contact_once() {
        let repo = InMemoryClientRepository::default();
        let key = ConversationKey::new("bc-1", 1);

        let first = repo.record_seen(&key, &ClientProfile::default(), Utc::now()).await.expect("first");
        let second = repo.record_seen(&key, &ClientProfile::default(), Utc::now()).await.expect("second");

        assert!(first.inserted);
        assert!(!second.inserted);
    }

    #[tokio::test]
    async fn in_memory_lead_repo_applies_partial_updates() {
        let repo = InMemoryLeadRepository::default();
        let key = ConversationKey::new("bc-1", 2);
        let start = Utc::now();
        repo.get_or_create(&key, start).await.expect("create");
        repo.update(&key, &LeadPatch { need: Some(Need::Bot), ..LeadPatch::default() }, start)
            .await
            .expect("need");

        let later = start + Duration::seconds(30);
        let lead = repo
            .update(&key, &LeadPatch { budget: Some(Budget::UpTo30k), ..LeadPatch::default() }, later)
            .await
            .expect("budget")
            .expect("lead exists");

        assert_eq!(lead.need, Some(Need::Bot));
        assert_eq!(lead.updated_at, later);
        assert!(repo
            .update(&ConversationKey::new("bc-1", 3), &LeadPatch::default(), later)
            .await
            .expect("missing")
            .is_none());
    }

    #[tokio::test]
    async fn in_memory_escalation_repo_matches_cooldown_semantics() {
        let repo = InMemoryEscalationRepository::default();
        let key = ConversationKey::new("bc-1", 4);
        let mark = EscalationMark {
            reason: "Прямой запрос на оператора".to_string(),
            urgency: Urgency::High,
            last_message: "оператор".to_string(),
        };
        let start = Utc::now();
        let cooldown = Duration::minutes(10);

        assert!(repo.mark(&key, &mark, start, cooldown).await.expect("1").should_alert);
        assert!(!repo.mark(&key, &mark, start + Duration::minutes(5), cooldown).await.expect("2").should_alert);
        assert!(repo.mark(&key, &mark, start + Duration::minutes(10), cooldown).await.expect("3").should_alert);
    }
}
