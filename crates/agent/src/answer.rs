use std::collections::HashSet;
use std::sync::Arc;

use leadwise_core::flows::prompts::CLARIFY_FALLBACK;
use leadwise_core::{LeadSummary, RetrievedChunk};
use tracing::warn;

use crate::llm::{CompletionRequest, LlmClient};

pub const MAX_CHUNK_CHARS: usize = 1400;

const ANSWER_INSTRUCTIONS: &str = "Ты AI-консультант компании, которая делает ботов, сайты и \
автоматизацию. Отвечай по-русски, коротко и по делу, опираясь только на фрагменты из контекста. \
Если в контексте нет ответа, честно скажи об этом и предложи уточнить вопрос. Не выдумывай цены, \
сроки и условия. Не добавляй ссылки на источники: их добавят автоматически.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedAnswer {
    /// Client-facing text, with source lines appended when grounded.
    pub text: String,
    pub sources: Vec<String>,
    /// False when the clarifying fallback was returned instead of a model answer.
    pub grounded: bool,
}

impl GeneratedAnswer {
    pub fn fallback() -> Self {
        Self { text: CLARIFY_FALLBACK.to_string(), sources: Vec::new(), grounded: false }
    }
}

#[derive(Clone, Default)]
pub struct AnswerGenerator {
    llm: Option<Arc<dyn LlmClient>>,
}

impl AnswerGenerator {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    pub async fn generate(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        lead_context: Option<&LeadSummary>,
    ) -> GeneratedAnswer {
        let Some(llm) = &self.llm else {
            return GeneratedAnswer::fallback();
        };
        if chunks.is_empty() {
            return GeneratedAnswer::fallback();
        }

        let request =
            CompletionRequest::answer(ANSWER_INSTRUCTIONS, build_prompt(question, chunks, lead_context));
        let text = match llm.complete(&request).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!(
                    event_name = "conversation.answer.empty_completion",
                    "answer model returned no text; using clarifying fallback"
                );
                return GeneratedAnswer::fallback();
            }
            Err(error) => {
                warn!(
                    event_name = "conversation.answer.provider_failed",
                    error = %error,
                    "answer generation failed; using clarifying fallback"
                );
                return GeneratedAnswer::fallback();
            }
        };

        let sources = unique_source_urls(chunks);
        GeneratedAnswer { text: with_source_lines(text, &sources), sources, grounded: true }
    }
}

/// Non-empty source URLs in first-occurrence order.
pub fn unique_source_urls(chunks: &[RetrievedChunk]) -> Vec<String> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .map(|chunk| chunk.source_url.trim())
        .filter(|url| !url.is_empty() && seen.insert(*url))
        .map(str::to_string)
        .collect()
}

fn with_source_lines(text: String, sources: &[String]) -> String {
    if sources.is_empty() {
        return text;
    }
    let lines = sources.iter().map(|url| format!("Источник: {url}")).collect::<Vec<_>>();
    format!("{text}\n\n{}", lines.join("\n"))
}

/// Numbered, source-tagged context blocks followed by the lead state and the question.
pub fn build_prompt(
    question: &str,
    chunks: &[RetrievedChunk],
    lead_context: Option<&LeadSummary>,
) -> String {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let title = if chunk.title.trim().is_empty() { "-" } else { chunk.title.trim() };
            let content = chunk.content.chars().take(MAX_CHUNK_CHARS).collect::<String>();
            format!("[{}] title={title}; source={}\n{content}", index + 1, chunk.source_url)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut prompt = format!("Контекст:\n{context}\n\n");
    if let Some(summary) = lead_context {
        prompt.push_str(&format!("Состояние лида: {}\n\n", summary.to_json()));
    }
    prompt.push_str(&format!("Вопрос клиента: {}", question.trim()));
    prompt
}
