//! Operator alert texts and the lookup of where they go.

use leadwise_core::{ClientProfile, ConversationKey, LeadSummary, RiskVerdict};
use leadwise_db::repositories::{RepositoryError, Repositories, ADMIN_CHAT_ID_KEY};
use tracing::warn;

pub const MAX_ALERT_EXCERPT_CHARS: usize = 1200;

fn excerpt(text: &str) -> String {
    text.chars().take(MAX_ALERT_EXCERPT_CHARS).collect()
}

fn client_line(profile: &ClientProfile) -> String {
    format!("Клиент: {} ({})", profile.display_name(), profile.username_label())
}

pub fn new_client_alert(key: &ConversationKey, profile: &ClientProfile, text: &str) -> String {
    format!(
        "🆕 НОВЫЙ КЛИЕНТ\n{}\nchat_id: {}\nСообщение: {}\nСсылка: {}\nbcid: {}",
        client_line(profile),
        key.client_chat_id,
        excerpt(text),
        profile.contact_link(key.client_chat_id),
        key.connection_id,
    )
}

pub fn cannot_reply_alert(key: &ConversationKey, profile: &ClientProfile, text: &str) -> String {
    format!(
        "⚠️ НЕТ ПРАВА ОТВЕЧАТЬ через Business API (can_reply=false)\n{}\nchat_id: {}\nbcid: {}\n\
         Сообщение: {}\nСсылка: {}\n\n👉 Проверь в Telegram Business права бота (Reply/Manage messages).",
        client_line(profile),
        key.client_chat_id,
        key.connection_id,
        excerpt(text),
        profile.contact_link(key.client_chat_id),
    )
}

pub fn escalation_alert(
    key: &ConversationKey,
    profile: &ClientProfile,
    verdict: &RiskVerdict,
    text: &str,
    lead_state: Option<&LeadSummary>,
) -> String {
    let reason = if verdict.reason.trim().is_empty() { "-" } else { verdict.reason.trim() };
    format!(
        "🚨 КРИТИЧНО: клиент просит человека/негатив\n{}\nchat_id: {}\nСсылка: {}\n\
         business_connection_id: {}\nneed_human={}, negative={}, urgency={}\nПричина: {}\n\
         Текст: {}\nСтатус лида: {}",
        client_line(profile),
        key.client_chat_id,
        profile.contact_link(key.client_chat_id),
        key.connection_id,
        verdict.need_human,
        verdict.negative,
        verdict.urgency.as_str(),
        reason,
        excerpt(text),
        lead_state.map(LeadSummary::to_json).unwrap_or_else(|| "-".to_string()),
    )
}

pub fn lead_collected_alert(client_chat_id: i64, summary: &LeadSummary) -> String {
    format!("✅ ЛИД СОБРАН\nchat_id={client_chat_id}\nДанные: {}", summary.to_json())
}

/// Connection owner chat, then the persisted admin chat, then the static fallback.
pub async fn resolve_operator_destination(
    repositories: &Repositories,
    connection_id: &str,
    static_fallback: Option<i64>,
) -> Result<Option<i64>, RepositoryError> {
    let owner_chat = repositories
        .connections
        .find(connection_id)
        .await?
        .and_then(|connection| connection.owner_chat_id);
    if owner_chat.is_some() {
        return Ok(owner_chat);
    }

    if let Some(raw) = repositories.settings.get(ADMIN_CHAT_ID_KEY).await? {
        match raw.trim().parse::<i64>() {
            Ok(chat_id) => return Ok(Some(chat_id)),
            Err(_) => warn!(
                event_name = "conversation.alert.admin_chat_invalid",
                value = %raw,
                "stored admin chat id is not a number; ignoring it"
            ),
        }
    }

    Ok(static_fallback)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use leadwise_core::domain::escalation::Urgency;
    use leadwise_core::{ClientProfile, Connection, ConversationKey, LeadSummary, Need, RiskVerdict};
    use leadwise_db::repositories::{Repositories, ADMIN_CHAT_ID_KEY};

    use super::{
        escalation_alert, lead_collected_alert, new_client_alert, resolve_operator_destination,
    };

    fn connection(owner_chat_id: Option<i64>) -> Connection {
        Connection {
            id: "bc-1".to_string(),
            owner_user_id: Some(1),
            owner_chat_id,
            can_reply: true,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn destination_prefers_owner_then_settings_then_static() {
        let repositories = Repositories::in_memory();

        let resolve = |fallback| resolve_operator_destination(&repositories, "bc-1", fallback);

        assert_eq!(resolve(Some(3)).await.expect("static"), Some(3));
        assert_eq!(resolve(None).await.expect("none"), None);

        repositories.settings.set(ADMIN_CHAT_ID_KEY, "200", Utc::now()).await.expect("set admin");
        assert_eq!(resolve(Some(3)).await.expect("settings"), Some(200));

        repositories.connections.upsert(connection(Some(100))).await.expect("connection");
        assert_eq!(resolve(Some(3)).await.expect("owner"), Some(100));
    }

    #[tokio::test]
    async fn unparsable_admin_chat_falls_through() {
        let repositories = Repositories::in_memory();
        repositories.connections.upsert(connection(None)).await.expect("connection");
        repositories.settings.set(ADMIN_CHAT_ID_KEY, "not-a-number", Utc::now()).await.expect("set");

        let resolved = resolve_operator_destination(&repositories, "bc-1", Some(7)).await;
        assert_eq!(resolved.expect("fallback"), Some(7));
    }

    #[test]
    fn alerts_identify_the_client_and_cap_the_excerpt() {
        let key = ConversationKey::new("bc-1", 42);
        let profile = ClientProfile {
            username: Some("anna".to_string()),
            full_name: Some("Анна".to_string()),
        };

        let alert = new_client_alert(&key, &profile, &"x".repeat(5000));

        assert!(alert.starts_with("🆕 НОВЫЙ КЛИЕНТ\nКлиент: Анна (@anna)\nchat_id: 42"));
        assert!(alert.contains("Ссылка: https://t.me/anna"));
        assert_eq!(alert.matches('x').count(), 1200);
    }

    #[test]
    fn escalation_alert_carries_verdict_and_lead_state() {
        let key = ConversationKey::new("bc-1", 42);
        let verdict = RiskVerdict {
            need_human: true,
            negative: false,
            urgency: Urgency::High,
            reason: "Прямой запрос на оператора".to_string(),
            confidence: 0.95,
        };
        let summary = LeadSummary { step: 1, need: Some(Need::Bot), ..LeadSummary::default() };

        let alert = escalation_alert(
            &key,
            &ClientProfile::default(),
            &verdict,
            "позовите менеджера",
            Some(&summary),
        );

        assert!(alert.contains("Клиент: без имени (нет username)"));
        assert!(alert.contains("Ссылка: tg://user?id=42"));
        assert!(alert.contains("need_human=true, negative=false, urgency=high"));
        assert!(alert.contains("\"need\":\"bot\""));
        assert!(lead_collected_alert(42, &summary).starts_with("✅ ЛИД СОБРАН\nchat_id=42\nДанные: {"));
    }
}
