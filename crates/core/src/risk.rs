use serde::{Deserialize, Serialize};

use crate::domain::escalation::Urgency;

pub const CRITICAL_NEGATIVE_CONFIDENCE: f32 = 0.6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub need_human: bool,
    pub negative: bool,
    pub urgency: Urgency,
    pub reason: String,
    pub confidence: f32,
}

impl RiskVerdict {
    pub fn neutral() -> Self {
        Self {
            need_human: false,
            negative: false,
            urgency: Urgency::Low,
            reason: String::new(),
            confidence: 0.0,
        }
    }

    /// Critical verdicts hand the conversation to a human operator.
    pub fn is_critical(&self) -> bool {
        self.need_human
            || self.urgency == Urgency::High
            || (self.negative && self.confidence >= CRITICAL_NEGATIVE_CONFIDENCE)
    }

    /// Negative but not critical: answered with an empathetic note, the dialogue continues.
    pub fn is_soft_negative(&self) -> bool {
        self.negative && !self.is_critical()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    HumanRequest,
    HardNegative,
    SoftNegative,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRulesConfig {
    pub human_request_phrases: Vec<String>,
    pub hard_negative_phrases: Vec<String>,
    pub profanity_phrases: Vec<String>,
    pub soft_negative_phrases: Vec<String>,
}

fn phrases(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

impl Default for RiskRulesConfig {
    fn default() -> Self {
        Self {
            human_request_phrases: phrases(&[
                "оператор",
                "менеджер",
                "человек",
                "живой",
                "свяжите",
                "позовите",
                "переключите",
                "не бот",
                "хочу поговорить",
                "передай руководителю",
            ]),
            hard_negative_phrases: phrases(&[
                "мошенники",
                "обман",
                "развод",
                "верните деньги",
                "обманули",
                "суд",
                "прокуратур",
                "роспотребнадзор",
                "заявление",
                "жалоба",
                "претензия",
            ]),
            profanity_phrases: phrases(&["идиот", "тупые", "сука", "блять", "хер", "долбо", "уроды"]),
            soft_negative_phrases: phrases(&[
                "плохой сервис",
                "вы достали",
                "ужас",
                "ненавижу",
                "не нравится",
                "разочарован",
            ]),
        }
    }
}

/// Ordered phrase tiers; the first matching tier decides and later tiers are not consulted.
#[derive(Clone, Debug, Default)]
pub struct RiskRules {
    config: RiskRulesConfig,
}

impl RiskRules {
    pub fn new(config: RiskRulesConfig) -> Self {
        Self { config }
    }

    pub fn matching_tier(&self, text: &str) -> Option<RiskTier> {
        let lowered = text.to_lowercase();
        let hit = |list: &[String]| list.iter().any(|phrase| lowered.contains(phrase.as_str()));

        if hit(&self.config.human_request_phrases) {
            Some(RiskTier::HumanRequest)
        } else if hit(&self.config.hard_negative_phrases) || hit(&self.config.profanity_phrases) {
            Some(RiskTier::HardNegative)
        } else if hit(&self.config.soft_negative_phrases) {
            Some(RiskTier::SoftNegative)
        } else {
            None
        }
    }

    pub fn evaluate(&self, text: &str) -> Option<RiskVerdict> {
        self.matching_tier(text).map(verdict_for_tier)
    }
}

pub fn verdict_for_tier(tier: RiskTier) -> RiskVerdict {
    match tier {
        RiskTier::HumanRequest => RiskVerdict {
            need_human: true,
            negative: false,
            urgency: Urgency::High,
            reason: "Прямой запрос на оператора".to_string(),
            confidence: 0.95,
        },
        RiskTier::HardNegative => RiskVerdict {
            need_human: true,
            negative: true,
            urgency: Urgency::High,
            reason: "Сильный негатив/конфликт".to_string(),
            confidence: 0.9,
        },
        RiskTier::SoftNegative => RiskVerdict {
            need_human: false,
            negative: true,
            urgency: Urgency::Medium,
            reason: "Негатив средней силы".to_string(),
            confidence: 0.55,
        },
    }
}
