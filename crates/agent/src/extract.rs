use std::sync::Arc;

use leadwise_core::normalize;
use leadwise_core::{Lead, LeadPatch};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::llm::{extract_json_object, CompletionRequest, LlmClient};

const EXTRACT_INSTRUCTIONS: &str = "Извлеки поля лида в JSON. Верни строго: \
{\"need\":string|null,\"budget\":string|null,\"timeline\":string|null,\
\"contact_method\":string|null,\"phone\":string|null}";

/// Model placeholders that mean "not stated".
const EMPTY_MARKERS: &[&str] = &[
    "null",
    "none",
    "unknown",
    "n/a",
    "-",
    "не указано",
    "не указан",
    "неизвестно",
    "нет",
];

/// Proposes values for lead fields that are still unset.
///
/// Every proposal passes through the same normalizers as a guided answer, except
/// that need and contact method are only taken on a keyword match. A field that
/// already holds a value is never part of the returned patch.
#[derive(Clone, Default)]
pub struct FieldExtractor {
    llm: Option<Arc<dyn LlmClient>>,
}

impl FieldExtractor {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    pub async fn propose(&self, lead: &Lead, text: &str) -> LeadPatch {
        let mut patch = LeadPatch::default();
        if lead.phone.is_none() {
            patch.phone = normalize::extract_phone(text);
        }

        if !has_unset_field(lead, &patch) {
            return patch;
        }
        let Some(llm) = &self.llm else {
            return patch;
        };

        let request = CompletionRequest::json(EXTRACT_INSTRUCTIONS, text);
        let object = match llm.complete(&request).await {
            Ok(raw) => extract_json_object(&raw),
            Err(error) => {
                warn!(
                    event_name = "conversation.extract.provider_failed",
                    error = %error,
                    "field extraction call failed; keeping rule-based fields"
                );
                return patch;
            }
        };
        let Some(object) = object else {
            warn!(
                event_name = "conversation.extract.malformed_output",
                "field extraction output was not a json object"
            );
            return patch;
        };

        merge_model_fields(lead, &mut patch, &object);
        debug!(
            event_name = "conversation.extract.proposed",
            need = patch.need.is_some(),
            budget = patch.budget.is_some(),
            deadline = patch.deadline.is_some(),
            contact_method = patch.contact_method.is_some(),
            phone = patch.phone.is_some(),
            "lead fields proposed"
        );
        patch
    }
}

fn has_unset_field(lead: &Lead, patch: &LeadPatch) -> bool {
    lead.need.is_none()
        || lead.budget.is_none()
        || lead.deadline.is_none()
        || lead.contact_method.is_none()
        || (lead.phone.is_none() && patch.phone.is_none())
}

fn stated(object: &Map<String, Value>, key: &str) -> Option<String> {
    let Some(Value::String(value)) = object.get(key) else {
        return None;
    };
    let trimmed = value.trim();
    let lowered = trimmed.to_lowercase();
    (!trimmed.is_empty() && !EMPTY_MARKERS.contains(&lowered.as_str()))
        .then(|| trimmed.to_string())
}

fn merge_model_fields(lead: &Lead, patch: &mut LeadPatch, object: &Map<String, Value>) {
    if lead.need.is_none() {
        patch.need = stated(object, "need").and_then(|value| normalize::recognize_need(&value));
    }
    if lead.budget.is_none() {
        patch.budget =
            stated(object, "budget").and_then(|value| normalize::normalize_budget(&value));
    }
    if lead.deadline.is_none() {
        patch.deadline =
            stated(object, "timeline").and_then(|value| normalize::normalize_deadline(&value));
    }
    if lead.contact_method.is_none() {
        patch.contact_method =
            stated(object, "contact_method").and_then(|value| normalize::recognize_contact(&value));
    }
    if lead.phone.is_none() && patch.phone.is_none() {
        patch.phone = stated(object, "phone").and_then(|value| normalize::extract_phone(&value));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use leadwise_core::{
        Budget, ContactMethod, ConversationKey, Deadline, Lead, LeadStateMachine, LeadStep, Need,
    };

    use super::FieldExtractor;
    use crate::test_support::ScriptedLlm;

    fn fresh_lead() -> Lead {
        Lead::new(ConversationKey::new("bc-1", 7), Utc::now())
    }

    #[tokio::test]
    async fn phone_is_found_without_a_model() {
        let patch = FieldExtractor::default().propose(&fresh_lead(), "мой номер +7 900 111 22 33").await;

        assert_eq!(patch.phone.as_deref(), Some("+7 900 111 22 33"));
        assert!(patch.need.is_none());
        assert!(patch.budget.is_none());
    }

    #[tokio::test]
    async fn model_proposals_are_normalized() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            "{\"need\": \"Телеграм-бот для записи\", \"budget\": \"около 30-80 тысяч\", \"timeline\": \"за месяц\", \"contact_method\": null, \"phone\": \"unknown\"}",
        ]));
        let patch = FieldExtractor::new(Some(llm)).propose(&fresh_lead(), "нужен бот").await;

        assert_eq!(patch.need, Some(Need::Bot));
        assert_eq!(patch.budget, Some(Budget::From30To80k));
        assert_eq!(patch.deadline, Some(Deadline::Month));
        assert!(patch.contact_method.is_none());
        assert!(patch.phone.is_none());
    }

    #[tokio::test]
    async fn unstated_need_and_contact_are_not_filled_by_fallbacks() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            "{\"need\":\"не указано\",\"budget\":\"до 30k\",\"timeline\":\"срочно\",\"contact_method\":\"не указан\"}",
        ]));
        let lead = fresh_lead();
        let patch = FieldExtractor::new(Some(llm)).propose(&lead, "сколько стоит?").await;

        assert!(patch.need.is_none());
        assert!(patch.contact_method.is_none());
        assert_eq!(patch.budget, Some(Budget::UpTo30k));
        assert_eq!(patch.deadline, Some(Deadline::Urgent));

        let mut updated = lead.clone();
        updated.apply(&patch, Utc::now());
        assert_eq!(LeadStateMachine::new().next_step(&updated), LeadStep::Need);
    }

    #[tokio::test]
    async fn vague_model_wording_is_left_unset() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            "{\"need\": \"мобильное приложение\", \"contact_method\": \"как удобно\"}",
        ]));
        let patch = FieldExtractor::new(Some(llm)).propose(&fresh_lead(), "есть идея").await;

        assert!(patch.need.is_none());
        assert!(patch.contact_method.is_none());
    }

    #[tokio::test]
    async fn set_fields_are_never_overwritten() {
        let mut lead = fresh_lead();
        lead.need = Some(Need::Site);
        lead.contact_method = Some(ContactMethod::InChat);
        let llm = Arc::new(ScriptedLlm::replying(&[
            "{\"need\": \"бот\", \"budget\": \"150+\", \"contact_method\": \"телефон\"}",
        ]));

        let patch = FieldExtractor::new(Some(llm)).propose(&lead, "бот, бюджет 150+").await;

        assert!(patch.need.is_none());
        assert!(patch.contact_method.is_none());
        assert_eq!(patch.budget, Some(Budget::Over150k));
    }

    #[tokio::test]
    async fn non_string_values_and_failures_are_ignored() {
        let typed = Arc::new(ScriptedLlm::replying(&["{\"need\": 3, \"budget\": [\"до 30\"]}"]));
        let patch = FieldExtractor::new(Some(typed)).propose(&fresh_lead(), "текст").await;
        assert!(patch.is_empty());

        let failing = Arc::new(ScriptedLlm::failing());
        let patch = FieldExtractor::new(Some(failing)).propose(&fresh_lead(), "текст").await;
        assert!(patch.is_empty());
    }

    #[tokio::test]
    async fn complete_lead_skips_the_model() {
        let mut lead = fresh_lead();
        lead.need = Some(Need::Bot);
        lead.budget = Some(Budget::UpTo30k);
        lead.deadline = Some(Deadline::Weeks);
        lead.contact_method = Some(ContactMethod::Phone);
        lead.phone = Some("89001112233".to_string());
        let llm = Arc::new(ScriptedLlm::replying(&["{}"]));

        let patch = FieldExtractor::new(Some(llm.clone())).propose(&lead, "ещё вопрос").await;

        assert!(patch.is_empty());
        assert!(llm.requests().is_empty());
    }
}
