use std::sync::Arc;

use leadwise_core::domain::escalation::Urgency;
use leadwise_core::{RiskRules, RiskVerdict};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::llm::{extract_json_object, CompletionRequest, LlmClient};

const RISK_INSTRUCTIONS: &str = "Определи риск эскалации клиента в JSON. Верни строго: \
{\"need_human\":true|false,\"negative\":true|false,\"urgency\":\"low|medium|high\",\
\"reason\":\"...\",\"confidence\":0..1}";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RiskSource {
    Rules,
    Model,
    /// Model was consulted but failed or answered outside the schema.
    Fallback,
    /// No tier matched and no model is configured.
    Neutral,
}

impl RiskSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::Model => "model",
            Self::Fallback => "fallback",
            Self::Neutral => "neutral",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RiskAssessment {
    pub verdict: RiskVerdict,
    pub source: RiskSource,
}

/// Rule tiers first; the model only sees text no tier matched.
#[derive(Clone)]
pub struct RiskClassifier {
    rules: RiskRules,
    llm: Option<Arc<dyn LlmClient>>,
}

impl RiskClassifier {
    pub fn new(rules: RiskRules, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { rules, llm }
    }

    pub async fn classify(&self, text: &str) -> RiskAssessment {
        if let Some(verdict) = self.rules.evaluate(text) {
            return RiskAssessment { verdict, source: RiskSource::Rules };
        }

        let Some(llm) = &self.llm else {
            return RiskAssessment { verdict: RiskVerdict::neutral(), source: RiskSource::Neutral };
        };

        let request = CompletionRequest::json(RISK_INSTRUCTIONS, text);
        let raw = match llm.complete(&request).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(
                    event_name = "conversation.risk.provider_failed",
                    error = %error,
                    "risk model call failed; using neutral verdict"
                );
                return fallback();
            }
        };

        match extract_json_object(&raw).and_then(|object| parse_model_verdict(&object)) {
            Some(verdict) => {
                debug!(
                    event_name = "conversation.risk.model_verdict",
                    need_human = verdict.need_human,
                    negative = verdict.negative,
                    urgency = verdict.urgency.as_str(),
                    "risk model verdict accepted"
                );
                RiskAssessment { verdict, source: RiskSource::Model }
            }
            None => {
                warn!(
                    event_name = "conversation.risk.malformed_output",
                    "risk model output failed validation; using neutral verdict"
                );
                fallback()
            }
        }
    }
}

fn fallback() -> RiskAssessment {
    RiskAssessment { verdict: RiskVerdict::neutral(), source: RiskSource::Fallback }
}

/// Absent keys take their neutral value; a key of the wrong type rejects the whole object.
fn parse_model_verdict(object: &Map<String, Value>) -> Option<RiskVerdict> {
    let flag = |key: &str| match object.get(key) {
        None | Some(Value::Null) => Some(false),
        Some(Value::Bool(value)) => Some(*value),
        Some(_) => None,
    };

    let need_human = flag("need_human")?;
    let negative = flag("negative")?;
    let urgency = match object.get("urgency") {
        None | Some(Value::Null) => Urgency::Low,
        Some(Value::String(value)) => value.parse().unwrap_or(Urgency::Low),
        Some(_) => return None,
    };
    let reason = match object.get("reason") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(value)) => value.trim().to_string(),
        Some(_) => return None,
    };
    let confidence = match object.get("confidence") {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(value)) => value.as_f64()? as f32,
        Some(_) => return None,
    };
    if !confidence.is_finite() {
        return None;
    }

    Some(RiskVerdict { need_human, negative, urgency, reason, confidence: confidence.clamp(0.0, 1.0) })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use leadwise_core::domain::escalation::Urgency;
    use leadwise_core::RiskRules;

    use super::{RiskClassifier, RiskSource};
    use crate::llm::LlmClient;
    use crate::test_support::ScriptedLlm;

    fn classifier(llm: Option<Arc<ScriptedLlm>>) -> RiskClassifier {
        RiskClassifier::new(RiskRules::default(), llm.map(|llm| llm as Arc<dyn LlmClient>))
    }

    #[tokio::test]
    async fn human_request_never_reaches_the_model() {
        let llm = Arc::new(ScriptedLlm::replying(&["{\"need_human\": false}"]));
        let assessment = classifier(Some(llm.clone())).classify("хочу поговорить с менеджером").await;

        assert_eq!(assessment.source, RiskSource::Rules);
        assert!(assessment.verdict.need_human);
        assert_eq!(assessment.verdict.urgency, Urgency::High);
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn model_verdict_is_validated_and_clamped() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            "Вот ответ: {\"need_human\": false, \"negative\": true, \"urgency\": \"MEDIUM\", \"reason\": \"недоволен сроками\", \"confidence\": 1.7}",
        ]));
        let assessment = classifier(Some(llm.clone())).classify("что-то долго всё").await;

        assert_eq!(assessment.source, RiskSource::Model);
        assert!(assessment.verdict.negative);
        assert_eq!(assessment.verdict.urgency, Urgency::Medium);
        assert!((assessment.verdict.confidence - 1.0).abs() < f32::EPSILON);
        assert!(assessment.verdict.is_critical());
        assert_eq!(llm.requests()[0].max_output_tokens, 220);
    }

    #[tokio::test]
    async fn unknown_urgency_degrades_to_low() {
        let llm = Arc::new(ScriptedLlm::replying(&["{\"urgency\": \"critical\", \"confidence\": 0.2}"]));
        let assessment = classifier(Some(llm)).classify("вопрос по оплате").await;

        assert_eq!(assessment.source, RiskSource::Model);
        assert_eq!(assessment.verdict.urgency, Urgency::Low);
    }

    #[tokio::test]
    async fn wrongly_typed_field_yields_neutral_fallback() {
        let llm = Arc::new(ScriptedLlm::replying(&["{\"need_human\": \"yes\", \"urgency\": \"high\"}"]));
        let assessment = classifier(Some(llm)).classify("вопрос по оплате").await;

        assert_eq!(assessment.source, RiskSource::Fallback);
        assert!(!assessment.verdict.is_critical());
    }

    #[tokio::test]
    async fn provider_failure_and_missing_provider_are_neutral() {
        let failed =
            classifier(Some(Arc::new(ScriptedLlm::failing()))).classify("сколько стоит сайт").await;
        let absent = classifier(None).classify("сколько стоит сайт").await;

        assert_eq!(failed.source, RiskSource::Fallback);
        assert_eq!(absent.source, RiskSource::Neutral);
        assert_eq!(failed.verdict, absent.verdict);
    }
}
