pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod normalize;
pub mod risk;

pub use domain::client::{Client, ClientProfile, ClientUpsert};
pub use domain::connection::{Connection, ConnectionEvent};
pub use domain::escalation::{Escalation, EscalationMark, EscalationMarkOutcome, Urgency};
pub use domain::knowledge::{ChunkDraft, ChunkId, KnowledgeChunk, RetrievedChunk};
pub use domain::lead::{Budget, ContactMethod, Deadline, Lead, LeadPatch, LeadSummary, Need};
pub use domain::ConversationKey;
pub use errors::{ApplicationError, DomainError};
pub use flows::{LeadStateMachine, LeadStep, QuickReplyMenu};
pub use risk::{RiskRules, RiskRulesConfig, RiskVerdict};
