use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadPatch;
use crate::errors::DomainError;

/// Conversation step, persisted as its ordinal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LeadStep {
    Welcome,
    Need,
    Budget,
    Deadline,
    ContactMethod,
    Phone,
    CallTime,
    Done,
}

impl LeadStep {
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Welcome => 0,
            Self::Need => 1,
            Self::Budget => 2,
            Self::Deadline => 3,
            Self::ContactMethod => 4,
            Self::Phone => 5,
            Self::CallTime => 6,
            Self::Done => 7,
        }
    }

    pub fn from_ordinal(ordinal: i64) -> Result<Self, DomainError> {
        match ordinal {
            0 => Ok(Self::Welcome),
            1 => Ok(Self::Need),
            2 => Ok(Self::Budget),
            3 => Ok(Self::Deadline),
            4 => Ok(Self::ContactMethod),
            5 => Ok(Self::Phone),
            6 => Ok(Self::CallTime),
            7 => Ok(Self::Done),
            other => Err(DomainError::UnknownStep(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowAction {
    /// Reply did not normalize; ask the same question again.
    Reprompt,
    /// Ask the question of the new step.
    Prompt(LeadStep),
    /// Every required field is present.
    Finalize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: LeadStep,
    pub to: LeadStep,
    /// Fields to persist; empty on a re-prompt.
    pub patch: LeadPatch,
    pub action: FlowAction,
}

impl TransitionOutcome {
    pub fn finalizes(&self) -> bool {
        matches!(self.action, FlowAction::Finalize)
    }
}
