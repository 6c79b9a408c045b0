use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient};

pub const EMBEDDING_KEYWORDS: &[&str] = &["бот", "сайт", "цен", "срок"];

/// Counts of [`EMBEDDING_KEYWORDS`] plus a constant component.
pub fn keyword_embedding(text: &str) -> Vec<f32> {
    let lowered = text.to_lowercase();
    let mut vector = EMBEDDING_KEYWORDS
        .iter()
        .map(|keyword| lowered.matches(keyword).count() as f32)
        .collect::<Vec<_>>();
    vector.push(0.1);
    vector
}

#[derive(Default)]
pub struct ScriptedLlm {
    completions: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    embeddings_fail: bool,
}

impl ScriptedLlm {
    pub fn replying(replies: &[&str]) -> Self {
        Self {
            completions: Mutex::new(replies.iter().map(|reply| Ok(reply.to_string())).collect()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            completions: Mutex::new(VecDeque::from([Err("provider timeout".to_string())])),
            embeddings_fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().expect("requests lock").push(request.clone());
        match self.completions.lock().expect("completions lock").pop_front() {
            Some(reply) => reply.map_err(|error| anyhow!(error)),
            None => Err(anyhow!("no scripted completion left")),
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.embeddings_fail {
            return Err(anyhow!("embedding provider unavailable"));
        }
        Ok(texts.iter().map(|text| keyword_embedding(text)).collect())
    }
}
