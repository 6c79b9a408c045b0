use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use leadwise_core::config::AppConfig;
use leadwise_core::domain::escalation::Urgency;
use leadwise_core::flows::prompts::{
    follow_up_after_answer, ASSISTANT_INTRO, CLARIFY_FALLBACK, EMPATHY_NOTE, FINALIZE_ACK,
    FIRST_TOUCH_LEAD_IN, GREETING_REPLY, OPERATOR_REGISTERED,
};
use leadwise_core::flows::{menu_for, prompt_for, reprompt_for, FlowAction, ESCALATE_OPTION};
use leadwise_core::normalize::{clip_client_text, is_greeting_only};
use leadwise_core::{
    ApplicationError, ClientProfile, ConnectionEvent, ConversationKey, Lead, LeadPatch,
    LeadStateMachine, LeadStep, RiskRules, RiskVerdict,
};
use leadwise_db::repositories::{Repositories, ADMIN_CHAT_ID_KEY};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::{
    cannot_reply_alert, lead_collected_alert, new_client_alert, resolve_operator_destination,
};
use crate::answer::{AnswerGenerator, GeneratedAnswer};
use crate::escalation::{AlertDelivery, EscalationManager};
use crate::extract::FieldExtractor;
use crate::knowledge::KnowledgeBase;
use crate::llm::LlmClient;
use crate::persistence_error;
use crate::risk::RiskClassifier;
use crate::transport::{ConnectionLookup, MessageSender, OutboundMessage, ReplyMarkup};

const ESCALATE_OPTION_REASON: &str = "Запрос на человека (кнопка)";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub connection_id: String,
    pub client_chat_id: i64,
    /// Text or caption; `None` for stickers and other non-text messages.
    pub text: Option<String>,
    pub profile: ClientProfile,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.connection_id.clone(), self.client_chat_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The connection may not answer; the operator was told instead.
    CannotReply,
    Escalated(AlertDelivery),
    /// Bare greeting on first touch; the need question was asked.
    Greeted,
    /// Knowledge answering turn that moved the lead to `next`.
    Answered { grounded: bool, next: LeadStep },
    Reprompted { step: LeadStep },
    Advanced { to: LeadStep },
    Finalized,
    /// Processing aborted; nothing else about this conversation was touched.
    Failed { class: &'static str },
}

/// Per-message coordinator over the store, the model-backed components and the sender.
#[derive(Clone)]
pub struct ConversationRuntime {
    repositories: Repositories,
    sender: Arc<dyn MessageSender>,
    lookup: Arc<dyn ConnectionLookup>,
    risk: RiskClassifier,
    extractor: FieldExtractor,
    knowledge: KnowledgeBase,
    answers: AnswerGenerator,
    escalations: EscalationManager,
    machine: LeadStateMachine,
    static_operator_chat_id: Option<i64>,
}

impl ConversationRuntime {
    pub fn new(
        repositories: Repositories,
        sender: Arc<dyn MessageSender>,
        lookup: Arc<dyn ConnectionLookup>,
        llm: Option<Arc<dyn LlmClient>>,
        config: &AppConfig,
    ) -> Self {
        let static_operator_chat_id = config.escalation.fallback_operator_chat_id;
        let escalations = EscalationManager::new(
            repositories.clone(),
            sender.clone(),
            Duration::minutes(i64::from(config.escalation.cooldown_minutes)),
            static_operator_chat_id,
        );

        Self {
            risk: RiskClassifier::new(RiskRules::default(), llm.clone()),
            extractor: FieldExtractor::new(llm.clone()),
            knowledge: KnowledgeBase::new(
                repositories.knowledge.clone(),
                llm.clone(),
                config.knowledge.top_k,
            ),
            answers: AnswerGenerator::new(llm),
            escalations,
            machine: LeadStateMachine::new(),
            repositories,
            sender,
            lookup,
            static_operator_chat_id,
        }
    }

    /// Never fails: errors are logged with the conversation identifiers and reported as `Failed`.
    pub async fn handle_message(&self, message: InboundMessage) -> MessageOutcome {
        let correlation_id = Uuid::new_v4().to_string();
        debug!(
            event_name = "conversation.message.received",
            correlation_id = %correlation_id,
            connection_id = %message.connection_id,
            client_chat_id = message.client_chat_id,
            "client message received"
        );

        match self.process(&message).await {
            Ok(outcome) => {
                info!(
                    event_name = "conversation.message.handled",
                    correlation_id = %correlation_id,
                    connection_id = %message.connection_id,
                    client_chat_id = message.client_chat_id,
                    outcome = ?outcome,
                    "client message handled"
                );
                outcome
            }
            Err(failure) => {
                error!(
                    event_name = "conversation.message.failed",
                    correlation_id = %correlation_id,
                    connection_id = %message.connection_id,
                    client_chat_id = message.client_chat_id,
                    error_class = failure.class(),
                    error = %failure,
                    "client message processing aborted"
                );
                MessageOutcome::Failed { class: failure.class() }
            }
        }
    }

    /// Stores the connection and, when it names an owner chat, the fallback operator chat.
    pub async fn handle_connection_event(
        &self,
        event: ConnectionEvent,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let owner_chat_id = event.owner_chat_id;
        let connection_id = event.connection_id.clone();
        self.repositories
            .connections
            .upsert(event.into_connection(now))
            .await
            .map_err(persistence_error)?;
        if let Some(chat_id) = owner_chat_id {
            self.repositories
                .settings
                .set(ADMIN_CHAT_ID_KEY, &chat_id.to_string(), now)
                .await
                .map_err(persistence_error)?;
        }

        info!(
            event_name = "conversation.connection.updated",
            connection_id = %connection_id,
            owner_chat = owner_chat_id.is_some(),
            "business connection stored"
        );
        Ok(())
    }

    /// A private chat with the bot becomes the persisted operator destination.
    pub async fn register_operator(
        &self,
        chat_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        self.repositories
            .settings
            .set(ADMIN_CHAT_ID_KEY, &chat_id.to_string(), now)
            .await
            .map_err(persistence_error)?;
        self.sender
            .send(&OutboundMessage::to_operator(chat_id, OPERATOR_REGISTERED))
            .await
            .map_err(|error| ApplicationError::Delivery(error.to_string()))?;

        info!(event_name = "conversation.operator.registered", chat_id, "operator chat registered");
        Ok(())
    }

    async fn process(&self, message: &InboundMessage) -> Result<MessageOutcome, ApplicationError> {
        let now = message.received_at;
        let key = message.key();
        let text = clip_client_text(message.text.as_deref());

        self.ensure_connection(&key.connection_id, now).await?;

        let seen = self
            .repositories
            .clients
            .record_seen(&key, &message.profile, now)
            .await
            .map_err(persistence_error)?;
        if seen.inserted {
            self.notify_operator(&key, new_client_alert(&key, &message.profile, &text)).await?;
        }

        let connection =
            self.repositories.connections.find(&key.connection_id).await.map_err(persistence_error)?;
        if !connection.is_some_and(|connection| connection.can_reply) {
            self.notify_operator(&key, cannot_reply_alert(&key, &message.profile, &text)).await?;
            return Ok(MessageOutcome::CannotReply);
        }

        self.repositories.leads.get_or_create(&key, now).await.map_err(persistence_error)?;
        let touched = LeadPatch { last_client_message: Some(text.clone()), ..LeadPatch::default() };
        let lead = self
            .repositories
            .leads
            .update(&key, &touched, now)
            .await
            .map_err(persistence_error)?
            .ok_or_else(|| ApplicationError::Persistence(format!("lead {key} vanished")))?;

        if text == ESCALATE_OPTION {
            let verdict = RiskVerdict {
                need_human: true,
                negative: false,
                urgency: Urgency::High,
                reason: ESCALATE_OPTION_REASON.to_string(),
                confidence: 1.0,
            };
            let delivery =
                self.escalations.escalate(&key, &message.profile, &verdict, &text, now).await?;
            return Ok(MessageOutcome::Escalated(delivery));
        }

        let assessment = self.risk.classify(&text).await;
        if assessment.verdict.is_critical() {
            debug!(
                event_name = "conversation.risk.critical",
                connection_id = %key.connection_id,
                client_chat_id = key.client_chat_id,
                source = assessment.source.as_str(),
                "critical risk verdict"
            );
            let delivery = self
                .escalations
                .escalate(&key, &message.profile, &assessment.verdict, &text, now)
                .await?;
            return Ok(MessageOutcome::Escalated(delivery));
        }
        if assessment.verdict.is_soft_negative() {
            self.send_to_client(&key, EMPATHY_NOTE, ReplyMarkup::Keep).await?;
        }

        match lead.step {
            LeadStep::Welcome => self.answer_from_knowledge(&key, lead, &text, true, now).await,
            LeadStep::Done => {
                let lead =
                    self.repositories.leads.reset(&key, now).await.map_err(persistence_error)?;
                self.answer_from_knowledge(&key, lead, &text, false, now).await
            }
            _ => self.continue_guided_flow(&key, &lead, &text, now).await,
        }
    }

    async fn ensure_connection(
        &self,
        connection_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let known =
            self.repositories.connections.find(connection_id).await.map_err(persistence_error)?;
        if known.as_ref().is_some_and(|connection| !connection.is_incomplete()) {
            return Ok(());
        }

        match self.lookup.fetch_connection(connection_id).await {
            Ok(event) => self.handle_connection_event(event, now).await,
            Err(error) => {
                warn!(
                    event_name = "conversation.connection.lookup_failed",
                    connection_id = %connection_id,
                    error = %error,
                    "business connection lookup failed"
                );
                Ok(())
            }
        }
    }

    async fn answer_from_knowledge(
        &self,
        key: &ConversationKey,
        lead: Lead,
        text: &str,
        first_touch: bool,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome, ApplicationError> {
        if first_touch && is_greeting_only(text) {
            let patch = LeadPatch {
                retrieved_source_urls: Some(Vec::new()),
                ..LeadPatch::step(LeadStep::Need)
            };
            self.repositories.leads.update(key, &patch, now).await.map_err(persistence_error)?;
            self.send_to_client(key, GREETING_REPLY, markup_for(LeadStep::Need)).await?;
            return Ok(MessageOutcome::Greeted);
        }

        let chunks = self.knowledge.retrieve(text).await;
        let proposed = self.extractor.propose(&lead, text).await;
        let transition = self.machine.advance(&lead, proposed);
        let next = transition.to;
        let answer = self.answers.generate(text, &chunks, Some(&lead.summary())).await;

        let patch = LeadPatch {
            last_client_message: Some(text.to_string()),
            retrieved_source_urls: Some(answer.sources.clone()),
            ..transition.patch.clone()
        };
        let stored =
            self.repositories.leads.update(key, &patch, now).await.map_err(persistence_error)?;

        if transition.finalizes() {
            if answer.grounded {
                self.send_to_client(key, &answer.text, ReplyMarkup::Keep).await?;
            }
            self.finalize(key, stored, now).await?;
            return Ok(MessageOutcome::Finalized);
        }

        let reply = knowledge_reply(&answer, first_touch, next);
        self.send_to_client(key, &reply, markup_for(next)).await?;
        Ok(MessageOutcome::Answered { grounded: answer.grounded, next })
    }

    async fn continue_guided_flow(
        &self,
        key: &ConversationKey,
        lead: &Lead,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome, ApplicationError> {
        let transition = self
            .machine
            .apply_reply(lead, text)
            .map_err(|error| ApplicationError::Domain(error.into()))?;

        match transition.action {
            FlowAction::Reprompt => {
                self.send_to_client(key, reprompt_for(lead.step), markup_for(lead.step)).await?;
                Ok(MessageOutcome::Reprompted { step: lead.step })
            }
            FlowAction::Prompt(to) => {
                self.repositories
                    .leads
                    .update(key, &transition.patch, now)
                    .await
                    .map_err(persistence_error)?;
                self.send_to_client(key, prompt_for(to), markup_for(to)).await?;
                Ok(MessageOutcome::Advanced { to })
            }
            FlowAction::Finalize => {
                let stored = self
                    .repositories
                    .leads
                    .update(key, &transition.patch, now)
                    .await
                    .map_err(persistence_error)?;
                self.finalize(key, stored, now).await?;
                Ok(MessageOutcome::Finalized)
            }
        }
    }

    async fn finalize(
        &self,
        key: &ConversationKey,
        lead: Option<Lead>,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        self.escalations.close(key, now).await?;
        self.send_to_client(key, FINALIZE_ACK, ReplyMarkup::Remove).await?;

        let summary = lead.map(|lead| lead.summary.clone().unwrap_or_else(|| lead.summary()));
        let Some(summary) = summary else {
            return Ok(());
        };
        info!(
            event_name = "conversation.lead.finalized",
            connection_id = %key.connection_id,
            client_chat_id = key.client_chat_id,
            "lead collected"
        );
        self.notify_operator(key, lead_collected_alert(key.client_chat_id, &summary)).await
    }

    async fn send_to_client(
        &self,
        key: &ConversationKey,
        text: &str,
        markup: ReplyMarkup,
    ) -> Result<(), ApplicationError> {
        let message =
            OutboundMessage::to_client(key.connection_id.clone(), key.client_chat_id, text, markup);
        self.sender
            .send(&message)
            .await
            .map_err(|error| ApplicationError::Delivery(error.to_string()))
    }

    /// Operator notices are best effort: an unknown destination or a failed send is logged.
    async fn notify_operator(
        &self,
        key: &ConversationKey,
        text: String,
    ) -> Result<(), ApplicationError> {
        let destination = resolve_operator_destination(
            &self.repositories,
            &key.connection_id,
            self.static_operator_chat_id,
        )
        .await
        .map_err(persistence_error)?;
        let Some(chat_id) = destination else {
            warn!(
                event_name = "conversation.alert.destination_unresolved",
                connection_id = %key.connection_id,
                client_chat_id = key.client_chat_id,
                "no operator chat known; notice dropped"
            );
            return Ok(());
        };

        if let Err(error) = self.sender.send(&OutboundMessage::to_operator(chat_id, text)).await {
            warn!(
                event_name = "conversation.alert.delivery_failed",
                connection_id = %key.connection_id,
                client_chat_id = key.client_chat_id,
                operator_chat_id = chat_id,
                error = %error,
                "operator notice was not delivered"
            );
        }
        Ok(())
    }
}

/// Framing of a knowledge answer that leads into the guided step `next`.
fn knowledge_reply(answer: &GeneratedAnswer, first_touch: bool, next: LeadStep) -> String {
    if answer.grounded {
        if first_touch {
            return format!(
                "{ASSISTANT_INTRO}\n{FIRST_TOUCH_LEAD_IN}\n\n{}\n\n{}",
                answer.text,
                follow_up_after_answer(next)
            );
        }
        return answer.text.clone();
    }

    let body = if next == LeadStep::Need { CLARIFY_FALLBACK } else { prompt_for(next) };
    if first_touch {
        format!("{ASSISTANT_INTRO}\n\n{body}")
    } else {
        body.to_string()
    }
}

fn markup_for(step: LeadStep) -> ReplyMarkup {
    menu_for(step).map(ReplyMarkup::Menu).unwrap_or(ReplyMarkup::Remove)
}
