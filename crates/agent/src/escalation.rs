use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use leadwise_core::flows::prompts::ESCALATION_ACK;
use leadwise_core::{
    ApplicationError, ClientProfile, ConversationKey, EscalationMark, LeadPatch, RiskVerdict,
};
use leadwise_db::repositories::Repositories;
use tracing::{info, warn};

use crate::alerts::{escalation_alert, resolve_operator_destination};
use crate::persistence_error;
use crate::transport::{MessageSender, OutboundMessage, ReplyMarkup};

const DEFAULT_REASON: &str = "Эскалация по сообщению клиента";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertDelivery {
    /// Another alert for this conversation went out within the cooldown.
    Suppressed,
    Sent { operator_chat_id: i64 },
    /// No operator destination could be resolved; the alert was dropped.
    Unresolved,
    /// The destination was known but the send failed; not retried.
    Failed { operator_chat_id: i64 },
}

/// Hands a conversation to a human: acknowledge, mark, and alert at most once per cooldown.
#[derive(Clone)]
pub struct EscalationManager {
    repositories: Repositories,
    sender: Arc<dyn MessageSender>,
    cooldown: Duration,
    static_operator_chat_id: Option<i64>,
}

impl EscalationManager {
    pub fn new(
        repositories: Repositories,
        sender: Arc<dyn MessageSender>,
        cooldown: Duration,
        static_operator_chat_id: Option<i64>,
    ) -> Self {
        Self { repositories, sender, cooldown, static_operator_chat_id }
    }

    pub async fn escalate(
        &self,
        key: &ConversationKey,
        profile: &ClientProfile,
        verdict: &RiskVerdict,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertDelivery, ApplicationError> {
        let ack = OutboundMessage::to_client(
            key.connection_id.clone(),
            key.client_chat_id,
            ESCALATION_ACK,
            ReplyMarkup::Remove,
        );
        if let Err(error) = self.sender.send(&ack).await {
            warn!(
                event_name = "conversation.escalation.ack_failed",
                connection_id = %key.connection_id,
                client_chat_id = key.client_chat_id,
                error = %error,
                "escalation acknowledgement was not delivered"
            );
        }

        let reason = if verdict.reason.trim().is_empty() {
            DEFAULT_REASON.to_string()
        } else {
            verdict.reason.trim().to_string()
        };
        let mark = EscalationMark { reason, urgency: verdict.urgency, last_message: text.to_string() };
        let outcome = self
            .repositories
            .escalations
            .mark(key, &mark, now, self.cooldown)
            .await
            .map_err(persistence_error)?;

        let mirror = LeadPatch {
            escalation_open: Some(true),
            urgency: Some(verdict.urgency),
            escalation_last_at: outcome.should_alert.then_some(now),
            ..LeadPatch::default()
        };
        let lead =
            self.repositories.leads.update(key, &mirror, now).await.map_err(persistence_error)?;

        if !outcome.should_alert {
            info!(
                event_name = "conversation.escalation.suppressed",
                connection_id = %key.connection_id,
                client_chat_id = key.client_chat_id,
                "escalation alert suppressed by cooldown"
            );
            return Ok(AlertDelivery::Suppressed);
        }

        let destination = resolve_operator_destination(
            &self.repositories,
            &key.connection_id,
            self.static_operator_chat_id,
        )
        .await
        .map_err(persistence_error)?;
        let Some(operator_chat_id) = destination else {
            warn!(
                event_name = "conversation.escalation.destination_unresolved",
                connection_id = %key.connection_id,
                client_chat_id = key.client_chat_id,
                "no operator chat known; escalation alert dropped"
            );
            return Ok(AlertDelivery::Unresolved);
        };

        let summary = lead.map(|lead| lead.summary());
        let alert = OutboundMessage::to_operator(
            operator_chat_id,
            escalation_alert(key, profile, verdict, text, summary.as_ref()),
        );
        match self.sender.send(&alert).await {
            Ok(()) => {
                info!(
                    event_name = "conversation.escalation.alerted",
                    connection_id = %key.connection_id,
                    client_chat_id = key.client_chat_id,
                    operator_chat_id,
                    urgency = verdict.urgency.as_str(),
                    "operator alerted"
                );
                Ok(AlertDelivery::Sent { operator_chat_id })
            }
            Err(error) => {
                warn!(
                    event_name = "conversation.escalation.alert_failed",
                    connection_id = %key.connection_id,
                    client_chat_id = key.client_chat_id,
                    operator_chat_id,
                    error = %error,
                    "escalation alert was not delivered"
                );
                Ok(AlertDelivery::Failed { operator_chat_id })
            }
        }
    }

    /// Closes the escalation and clears the lead flag; `last_alert_at` is kept.
    pub async fn close(
        &self,
        key: &ConversationKey,
        now: DateTime<Utc>,
    ) -> Result<bool, ApplicationError> {
        let closed =
            self.repositories.escalations.close(key, now).await.map_err(persistence_error)?;
        let patch = LeadPatch { escalation_open: Some(false), ..LeadPatch::default() };
        self.repositories.leads.update(key, &patch, now).await.map_err(persistence_error)?;
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use leadwise_core::domain::escalation::Urgency;
    use leadwise_core::flows::prompts::ESCALATION_ACK;
    use leadwise_core::{ClientProfile, ConversationKey, RiskVerdict};
    use leadwise_db::repositories::{Repositories, ADMIN_CHAT_ID_KEY};

    use super::{AlertDelivery, EscalationManager};
    use crate::transport::{Destination, RecordingMessageSender, ReplyMarkup};

    fn human_request() -> RiskVerdict {
        RiskVerdict {
            need_human: true,
            negative: false,
            urgency: Urgency::High,
            reason: "Прямой запрос на оператора".to_string(),
            confidence: 0.95,
        }
    }

    async fn manager_with_admin() -> (EscalationManager, Arc<RecordingMessageSender>, Repositories) {
        let repositories = Repositories::in_memory();
        repositories.settings.set(ADMIN_CHAT_ID_KEY, "900", Utc::now()).await.expect("admin");
        let sender = Arc::new(RecordingMessageSender::default());
        let manager =
            EscalationManager::new(repositories.clone(), sender.clone(), Duration::minutes(10), None);
        (manager, sender, repositories)
    }

    #[tokio::test]
    async fn second_escalation_within_cooldown_only_acknowledges() {
        let (manager, sender, repositories) = manager_with_admin().await;
        let key = ConversationKey::new("bc-1", 42);
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("time");
        repositories.leads.get_or_create(&key, start).await.expect("lead");

        let first = manager
            .escalate(&key, &ClientProfile::default(), &human_request(), "позовите менеджера", start)
            .await
            .expect("first");
        let second = manager
            .escalate(
                &key,
                &ClientProfile::default(),
                &human_request(),
                "ну где менеджер",
                start + Duration::minutes(3),
            )
            .await
            .expect("second");
        let third = manager
            .escalate(
                &key,
                &ClientProfile::default(),
                &human_request(),
                "жду",
                start + Duration::minutes(10),
            )
            .await
            .expect("third");

        assert_eq!(first, AlertDelivery::Sent { operator_chat_id: 900 });
        assert_eq!(second, AlertDelivery::Suppressed);
        assert_eq!(third, AlertDelivery::Sent { operator_chat_id: 900 });
        assert_eq!(sender.to_operator().len(), 2);
        let acks = sender.to_clients();
        assert_eq!(acks.len(), 3);
        assert!(acks.iter().all(|ack| ack.text == ESCALATION_ACK && ack.markup == ReplyMarkup::Remove));

        let lead = repositories.leads.find(&key).await.expect("find").expect("lead");
        assert!(lead.escalation_open);
        assert_eq!(lead.escalation_last_at, Some(start + Duration::minutes(10)));
        let escalation = repositories.escalations.find(&key).await.expect("find").expect("row");
        assert_eq!(escalation.last_message, "жду");
    }

    #[tokio::test]
    async fn unresolved_destination_drops_the_alert() {
        let repositories = Repositories::in_memory();
        let sender = Arc::new(RecordingMessageSender::default());
        let manager =
            EscalationManager::new(repositories.clone(), sender.clone(), Duration::minutes(10), None);
        let key = ConversationKey::new("bc-1", 42);

        let delivery = manager
            .escalate(&key, &ClientProfile::default(), &human_request(), "оператор!", Utc::now())
            .await
            .expect("escalate");

        assert_eq!(delivery, AlertDelivery::Unresolved);
        assert!(sender.to_operator().is_empty());
        assert!(repositories.escalations.find(&key).await.expect("find").is_some_and(|e| e.open));
    }

    #[tokio::test]
    async fn close_keeps_the_alert_timestamp() {
        let (manager, sender, repositories) = manager_with_admin().await;
        let key = ConversationKey::new("bc-1", 42);
        let now = Utc::now();
        repositories.leads.get_or_create(&key, now).await.expect("lead");
        manager
            .escalate(&key, &ClientProfile::default(), &human_request(), "человек нужен", now)
            .await
            .expect("escalate");

        assert!(manager.close(&key, now + Duration::minutes(1)).await.expect("close"));

        let escalation = repositories.escalations.find(&key).await.expect("find").expect("row");
        assert!(!escalation.open);
        assert!(escalation.last_alert_at.is_some());
        let lead = repositories.leads.find(&key).await.expect("find").expect("lead");
        assert!(!lead.escalation_open);
        assert!(matches!(
            sender.to_operator()[0].destination,
            Destination::Operator { chat_id: 900 }
        ));
    }
}
