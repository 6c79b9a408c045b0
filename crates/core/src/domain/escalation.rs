use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ConversationKey;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::str::FromStr for Urgency {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => {
                Err(DomainError::UnknownFieldValue { field: "urgency", value: other.to_string() })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub key: ConversationKey,
    pub open: bool,
    pub last_alert_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub urgency: Urgency,
    pub last_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a qualifying event writes regardless of the cooldown gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscalationMark {
    pub reason: String,
    pub urgency: Urgency,
    pub last_message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscalationMarkOutcome {
    pub should_alert: bool,
    /// Stored value after the write; unchanged from before when the gate was closed.
    pub last_alert_at: Option<DateTime<Utc>>,
}

/// True when no alert was sent yet or the previous one is at least `cooldown` old.
pub fn cooldown_elapsed(
    previous: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> bool {
    match previous {
        None => true,
        Some(previous) => now - previous >= cooldown,
    }
}

impl Escalation {
    pub fn opened(key: ConversationKey, mark: EscalationMark, now: DateTime<Utc>) -> Self {
        Self {
            key,
            open: true,
            last_alert_at: Some(now),
            reason: mark.reason,
            urgency: mark.urgency,
            last_message: mark.last_message,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a new qualifying event in place and reports whether it wins the alert.
    pub fn remark(
        &mut self,
        mark: EscalationMark,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> EscalationMarkOutcome {
        let should_alert = cooldown_elapsed(self.last_alert_at, now, cooldown);
        if should_alert {
            self.last_alert_at = Some(now);
        }
        self.open = true;
        self.reason = mark.reason;
        self.urgency = mark.urgency;
        self.last_message = mark.last_message;
        self.updated_at = now;
        EscalationMarkOutcome { should_alert, last_alert_at: self.last_alert_at }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{cooldown_elapsed, Escalation, EscalationMark, Urgency};
    use crate::domain::ConversationKey;

    fn mark(reason: &str, urgency: Urgency) -> EscalationMark {
        EscalationMark {
            reason: reason.to_string(),
            urgency,
            last_message: "где мой заказ".to_string(),
        }
    }

    #[test]
    fn cooldown_gate_only_opens_after_window() {
        let now = Utc::now();
        let window = Duration::minutes(10);

        assert!(cooldown_elapsed(None, now, window));
        assert!(!cooldown_elapsed(Some(now - Duration::minutes(9)), now, window));
        assert!(cooldown_elapsed(Some(now - Duration::minutes(10)), now, window));
    }

    #[test]
    fn remark_refreshes_details_even_when_gate_is_closed() {
        let start = Utc::now();
        let mut escalation = Escalation::opened(
            ConversationKey::new("bc-1", 5),
            mark("first", Urgency::Medium),
            start,
        );

        let outcome = escalation.remark(
            mark("second", Urgency::High),
            start + Duration::minutes(2),
            Duration::minutes(10),
        );

        assert!(!outcome.should_alert);
        assert_eq!(outcome.last_alert_at, Some(start));
        assert_eq!(escalation.reason, "second");
        assert_eq!(escalation.urgency, Urgency::High);
    }

    #[test]
    fn urgency_parses_case_insensitively() {
        assert_eq!(" HIGH ".parse::<Urgency>(), Ok(Urgency::High));
        assert!("critical".parse::<Urgency>().is_err());
    }
}
