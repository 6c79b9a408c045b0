use thiserror::Error;

use crate::domain::lead::{ContactMethod, Lead, LeadPatch};
use crate::flows::states::{FlowAction, LeadStep, TransitionOutcome};
use crate::normalize;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("step {step:?} is answered by knowledge answering, not the guided flow")]
    NotGuided { step: LeadStep },
    #[error("step {step:?} is terminal; reset the lead before continuing")]
    TerminalStep { step: LeadStep },
}

/// Linear qualification dialogue with one branch after the contact method.
#[derive(Clone, Debug, Default)]
pub struct LeadStateMachine;

impl LeadStateMachine {
    pub fn new() -> Self {
        Self
    }

    /// First unset required field in fixed order; `Done` when nothing is missing.
    ///
    /// Not a blind increment, so fields filled out of band skip their steps.
    pub fn next_step(&self, lead: &Lead) -> LeadStep {
        if lead.need.is_none() {
            return LeadStep::Need;
        }
        if lead.budget.is_none() {
            return LeadStep::Budget;
        }
        if lead.deadline.is_none() {
            return LeadStep::Deadline;
        }
        match lead.contact_method {
            None => LeadStep::ContactMethod,
            Some(ContactMethod::Phone) if lead.phone.is_none() => LeadStep::Phone,
            Some(ContactMethod::Call) if lead.call_time.is_none() => LeadStep::CallTime,
            Some(_) => LeadStep::Done,
        }
    }

    /// Normalizes `reply` for the lead's current step and decides where to go next.
    ///
    /// The returned patch always carries the new step and the answered field; when the
    /// next step is `Done` it also carries the summary snapshot.
    pub fn apply_reply(
        &self,
        lead: &Lead,
        reply: &str,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let from = lead.step;
        let answer = match from {
            LeadStep::Welcome => return Err(FlowTransitionError::NotGuided { step: from }),
            LeadStep::Done => return Err(FlowTransitionError::TerminalStep { step: from }),
            // A sticker or photo answers nothing.
            _ if reply.trim() == normalize::NON_TEXT_PLACEHOLDER => None,
            LeadStep::Need => normalize::normalize_need(reply)
                .map(|need| LeadPatch { need: Some(need), ..LeadPatch::default() }),
            LeadStep::Budget => normalize::normalize_budget(reply)
                .map(|budget| LeadPatch { budget: Some(budget), ..LeadPatch::default() }),
            LeadStep::Deadline => normalize::normalize_deadline(reply)
                .map(|deadline| LeadPatch { deadline: Some(deadline), ..LeadPatch::default() }),
            LeadStep::ContactMethod => normalize::normalize_contact(reply).map(|method| {
                LeadPatch { contact_method: Some(method), ..LeadPatch::default() }
            }),
            LeadStep::Phone => normalize::extract_phone(reply)
                .map(|phone| LeadPatch { phone: Some(phone), ..LeadPatch::default() }),
            LeadStep::CallTime => normalize::normalize_call_time(reply)
                .map(|call_time| LeadPatch { call_time: Some(call_time), ..LeadPatch::default() }),
        };

        let Some(patch) = answer else {
            return Ok(TransitionOutcome {
                from,
                to: from,
                patch: LeadPatch::default(),
                action: FlowAction::Reprompt,
            });
        };

        Ok(self.advance(lead, patch))
    }

    /// Applies `patch` on a projection of `lead` and moves to the computed next step.
    pub fn advance(&self, lead: &Lead, mut patch: LeadPatch) -> TransitionOutcome {
        let mut projected = lead.clone();
        projected.apply(&patch, lead.updated_at);
        let to = self.next_step(&projected);
        projected.step = to;

        patch.step = Some(to);
        let action = if to == LeadStep::Done {
            patch.summary = Some(projected.summary());
            FlowAction::Finalize
        } else {
            FlowAction::Prompt(to)
        };

        TransitionOutcome { from: lead.step, to, patch, action }
    }
}
