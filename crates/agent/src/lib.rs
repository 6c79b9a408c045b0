//! Conversation runtime for a business messaging account.
//!
//! Each inbound client message is classified for escalation risk and then routed
//! either into the guided qualification dialogue or into knowledge-base answering.
//!
//! # Modules
//!
//! - `llm` - chat completion and embedding capability (OpenAI-compatible HTTP)
//! - `risk` / `extract` - rule tiers with an optional model pass
//! - `knowledge` / `answer` - retrieval and grounded answers
//! - `ingest` - crawl, chunk, embed and upsert site content
//! - `escalation` / `alerts` - cooldown-gated operator alerts
//! - `runtime` - the per-message coordinator
//!
//! The model never decides dialogue state. Steps, fields and escalation gates are
//! deterministic; model output is validated before it reaches them.

pub mod alerts;
pub mod answer;
pub mod escalation;
pub mod extract;
pub mod ingest;
pub mod knowledge;
pub mod llm;
pub mod risk;
pub mod runtime;
pub mod transport;

#[cfg(test)]
mod test_support;

use leadwise_core::ApplicationError;
use leadwise_db::repositories::RepositoryError;

pub(crate) fn persistence_error(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
