//! Client-facing wording and the quick-reply menus of the guided flow.

use serde::{Deserialize, Serialize};

use crate::domain::lead::{Budget, ContactMethod, Deadline, Need};
use crate::flows::states::LeadStep;

/// Control option that asks for a human operator; present in every menu.
pub const ESCALATE_OPTION: &str = "👤 Позвать менеджера";

pub const ASSISTANT_INTRO: &str = "Привет! 👋 Я AI-консультант.";
pub const GREETING_REPLY: &str = "Привет! 👋 Я AI-консультант.\nПодскажите, пожалуйста, какой у вас вопрос? Можно в 1–2 предложениях 🙂";
pub const CLARIFY_FALLBACK: &str = "Извините, не совсем понимаю, о чем речь. Уточните, пожалуйста, что именно вы хотите: бот / сайт / автоматизация / другое?";
pub const FIRST_TOUCH_LEAD_IN: &str = "Спасибо за сообщение, сейчас подскажу.";
pub const NEED_QUESTION_AFTER_ANSWER: &str =
    "Чтобы точнее сориентировать по срокам и бюджету: что вам нужно? бот / сайт / автоматизация / другое";
pub const ESCALATION_ACK: &str = "Понимаю вас. Извините за неудобства 🙏\nСейчас передам вопрос руководителю/менеджеру. Пожалуйста, уточните коротко: что случилось и какой результат нужен?";
pub const EMPATHY_NOTE: &str =
    "Понимаю, что что-то пошло не так, и мне жаль 🙏 Постараюсь помочь, а если нужно, подключу менеджера.";
pub const FINALIZE_ACK: &str =
    "Спасибо! ✅ Я передал данные менеджеру. Он свяжется с вами для уточнения деталей.";
pub const OPERATOR_REGISTERED: &str = "✅ Админ-чат подключен. Теперь все уведомления о клиентах, негативе и запросах на человека будут приходить сюда.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReplyMenu {
    pub rows: Vec<Vec<String>>,
}

impl QuickReplyMenu {
    fn from_labels(labels: &[&str], per_row: usize) -> Self {
        let mut rows = labels
            .chunks(per_row.max(1))
            .map(|row| row.iter().map(|label| label.to_string()).collect())
            .collect::<Vec<Vec<String>>>();
        rows.push(vec![ESCALATE_OPTION.to_string()]);
        Self { rows }
    }

    pub fn options(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().flatten().map(String::as_str)
    }

    pub fn contains(&self, option: &str) -> bool {
        self.options().any(|candidate| candidate == option)
    }
}

/// Fixed menu per guided step; `None` outside the guided flow.
pub fn menu_for(step: LeadStep) -> Option<QuickReplyMenu> {
    let menu = match step {
        LeadStep::Need => {
            QuickReplyMenu::from_labels(&Need::ALL.iter().map(|v| v.label()).collect::<Vec<_>>(), 2)
        }
        LeadStep::Budget => QuickReplyMenu::from_labels(
            &Budget::ALL.iter().map(|v| v.label()).collect::<Vec<_>>(),
            2,
        ),
        LeadStep::Deadline => QuickReplyMenu::from_labels(
            &Deadline::ALL.iter().map(|v| v.label()).collect::<Vec<_>>(),
            1,
        ),
        LeadStep::ContactMethod => QuickReplyMenu::from_labels(
            &ContactMethod::ALL.iter().map(|v| v.label()).collect::<Vec<_>>(),
            2,
        ),
        LeadStep::Phone | LeadStep::CallTime => QuickReplyMenu::from_labels(&[], 1),
        LeadStep::Welcome | LeadStep::Done => return None,
    };
    Some(menu)
}

/// Question asked when the conversation enters `step`.
pub fn prompt_for(step: LeadStep) -> &'static str {
    match step {
        LeadStep::Need => "Подскажите, что вас интересует: бот / сайт / автоматизация / другое?",
        LeadStep::Budget => "Отлично. Скажите, пожалуйста, какой бюджет комфортен?",
        LeadStep::Deadline => "Понял. По срокам как удобно?",
        LeadStep::ContactMethod => "Как удобнее связаться для уточнения деталей?",
        LeadStep::Phone => "Ок. Напишите, пожалуйста, номер телефона (в любом формате).",
        LeadStep::CallTime => {
            "Отлично. Напишите, пожалуйста, удобное время для созвона (например: сегодня после 18:00)."
        }
        LeadStep::Welcome => GREETING_REPLY,
        LeadStep::Done => FINALIZE_ACK,
    }
}

/// Question repeated when the reply for `step` could not be normalized.
pub fn reprompt_for(step: LeadStep) -> &'static str {
    match step {
        LeadStep::Budget => "Выберите бюджет из вариантов ниже 🙂",
        LeadStep::Deadline => "Выберите срок из вариантов ниже 🙂",
        LeadStep::ContactMethod => "Выберите вариант связи 🙂",
        LeadStep::Phone => "Не вижу номер. Пришлите, пожалуйста, телефон ещё раз 🙂",
        LeadStep::CallTime => "Подскажите, пожалуйста, удобное время для созвона 🙂",
        other => prompt_for(other),
    }
}

/// Trailing question appended to a knowledge answer that leads into `step`.
pub fn follow_up_after_answer(step: LeadStep) -> &'static str {
    match step {
        LeadStep::Need => NEED_QUESTION_AFTER_ANSWER,
        other => prompt_for(other),
    }
}

#[cfg(test)]
mod tests {
    use super::{menu_for, reprompt_for, ESCALATE_OPTION};
    use crate::flows::states::LeadStep;

    #[test]
    fn every_guided_menu_offers_the_escalate_option() {
        for step in [
            LeadStep::Need,
            LeadStep::Budget,
            LeadStep::Deadline,
            LeadStep::ContactMethod,
            LeadStep::Phone,
            LeadStep::CallTime,
        ] {
            let menu = menu_for(step).expect("guided steps have menus");
            assert!(menu.contains(ESCALATE_OPTION), "{step:?} menu lacks escalate option");
        }
        assert!(menu_for(LeadStep::Welcome).is_none());
        assert!(menu_for(LeadStep::Done).is_none());
    }

    #[test]
    fn need_menu_lists_labels_two_per_row() {
        let menu = menu_for(LeadStep::Need).expect("need menu");

        assert_eq!(menu.rows[0], vec!["бот".to_string(), "сайт".to_string()]);
        assert_eq!(menu.rows.len(), 3);
    }

    #[test]
    fn reprompts_differ_from_entry_prompts_where_defined() {
        assert_eq!(reprompt_for(LeadStep::Budget), "Выберите бюджет из вариантов ниже 🙂");
        assert!(reprompt_for(LeadStep::Need).contains("бот / сайт"));
    }
}
