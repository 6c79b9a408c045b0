use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::escalation::Urgency;
use crate::domain::ConversationKey;
use crate::errors::DomainError;
use crate::flows::LeadStep;

macro_rules! lead_field_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $($variant:ident => $code:literal, $label:literal;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $code)] $variant,)+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// Stable storage code.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            /// Client-facing wording, also used as the quick-reply option text.
            pub fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DomainError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($code => Ok(Self::$variant),)+
                    other => Err(DomainError::UnknownFieldValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

lead_field_enum! {
    Need, "need" {
        Bot => "bot", "бот";
        Site => "site", "сайт";
        Automation => "automation", "автоматизация";
        Other => "other", "другое";
    }
}

lead_field_enum! {
    /// Budget tiers in ascending order.
    Budget, "budget" {
        UpTo30k => "up_to_30k", "до 30k";
        From30To80k => "30k_80k", "30–80k";
        From80To150k => "80k_150k", "80–150k";
        Over150k => "150k_plus", "150k+";
    }
}

lead_field_enum! {
    /// Deadline tiers from most to least urgent.
    Deadline, "deadline" {
        Urgent => "urgent", "срочно 1–3 дня";
        Weeks => "one_two_weeks", "1–2 недели";
        Month => "within_month", "в течение месяца";
        Flexible => "flexible", "не горит";
    }
}

lead_field_enum! {
    ContactMethod, "contact_method" {
        InChat => "in_chat", "в Telegram";
        Phone => "phone", "по телефону";
        Call => "call", "созвон";
    }
}

/// Snapshot of the collected fields, stored on finalization and shown to operators.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadSummary {
    pub step: u8,
    pub need: Option<Need>,
    pub budget: Option<Budget>,
    pub deadline: Option<Deadline>,
    pub contact_method: Option<ContactMethod>,
    pub phone: Option<String>,
    pub call_time: Option<String>,
}

impl LeadSummary {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "-".to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub key: ConversationKey,
    pub step: LeadStep,
    pub need: Option<Need>,
    pub budget: Option<Budget>,
    pub deadline: Option<Deadline>,
    pub contact_method: Option<ContactMethod>,
    pub phone: Option<String>,
    pub call_time: Option<String>,
    pub summary: Option<LeadSummary>,
    pub escalation_open: bool,
    pub escalation_last_at: Option<DateTime<Utc>>,
    pub last_client_message: Option<String>,
    pub retrieved_source_urls: Vec<String>,
    pub urgency: Option<Urgency>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update: `None` leaves the stored column untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeadPatch {
    pub step: Option<LeadStep>,
    pub need: Option<Need>,
    pub budget: Option<Budget>,
    pub deadline: Option<Deadline>,
    pub contact_method: Option<ContactMethod>,
    pub phone: Option<String>,
    pub call_time: Option<String>,
    pub summary: Option<LeadSummary>,
    pub escalation_open: Option<bool>,
    pub escalation_last_at: Option<DateTime<Utc>>,
    pub last_client_message: Option<String>,
    pub retrieved_source_urls: Option<Vec<String>>,
    pub urgency: Option<Urgency>,
}

impl LeadPatch {
    pub fn step(step: LeadStep) -> Self {
        Self { step: Some(step), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl Lead {
    pub fn new(key: ConversationKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            step: LeadStep::Welcome,
            need: None,
            budget: None,
            deadline: None,
            contact_method: None,
            phone: None,
            call_time: None,
            summary: None,
            escalation_open: false,
            escalation_last_at: None,
            last_client_message: None,
            retrieved_source_urls: Vec::new(),
            urgency: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: &LeadPatch, now: DateTime<Utc>) {
        if let Some(step) = patch.step {
            self.step = step;
        }
        if let Some(need) = patch.need {
            self.need = Some(need);
        }
        if let Some(budget) = patch.budget {
            self.budget = Some(budget);
        }
        if let Some(deadline) = patch.deadline {
            self.deadline = Some(deadline);
        }
        if let Some(contact_method) = patch.contact_method {
            self.contact_method = Some(contact_method);
        }
        if let Some(phone) = &patch.phone {
            self.phone = Some(phone.clone());
        }
        if let Some(call_time) = &patch.call_time {
            self.call_time = Some(call_time.clone());
        }
        if let Some(summary) = &patch.summary {
            self.summary = Some(summary.clone());
        }
        if let Some(open) = patch.escalation_open {
            self.escalation_open = open;
        }
        if let Some(last_at) = patch.escalation_last_at {
            self.escalation_last_at = Some(last_at);
        }
        if let Some(message) = &patch.last_client_message {
            self.last_client_message = Some(message.clone());
        }
        if let Some(urls) = &patch.retrieved_source_urls {
            self.retrieved_source_urls = urls.clone();
        }
        if let Some(urgency) = patch.urgency {
            self.urgency = Some(urgency);
        }
        self.updated_at = now;
    }

    /// Clears everything collected so far; only identity and `created_at` survive.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        let created_at = self.created_at;
        *self = Self::new(self.key.clone(), now);
        self.created_at = created_at;
    }

    pub fn summary(&self) -> LeadSummary {
        LeadSummary {
            step: self.step.ordinal(),
            need: self.need,
            budget: self.budget,
            deadline: self.deadline,
            contact_method: self.contact_method,
            phone: self.phone.clone(),
            call_time: self.call_time.clone(),
        }
    }
}
