pub mod engine;
pub mod prompts;
pub mod states;

pub use engine::{FlowTransitionError, LeadStateMachine};
pub use prompts::{menu_for, prompt_for, reprompt_for, QuickReplyMenu, ESCALATE_OPTION};
pub use states::{FlowAction, LeadStep, TransitionOutcome};
