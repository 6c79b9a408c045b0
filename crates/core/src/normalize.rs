//! Rule-based mapping of free client text onto the enumerated lead fields.
//!
//! The field normalizers lower-case and trim their input and return `None` when
//! the text cannot be mapped, which the guided flow turns into a re-prompt.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::lead::{Budget, ContactMethod, Deadline, Need};

pub const MAX_CALL_TIME_CHARS: usize = 200;
pub const MAX_CLIENT_TEXT_CHARS: usize = 2000;
/// Stands in for stickers, photos without caption and other non-text messages.
pub const NON_TEXT_PLACEHOLDER: &str = "<не текстовое сообщение>";
const GREETINGS: &[&str] = &["привет", "здравствуйте", "добрый", "hi", "hello", "hey"];
const MAX_GREETING_CHARS: usize = 20;
const MIN_PHONE_DIGITS: usize = 9;

fn prepare(text: &str) -> Option<String> {
    let lowered = text.trim().to_lowercase().replace('-', "–");
    (!lowered.is_empty()).then_some(lowered)
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}

/// Trimmed message text capped at [`MAX_CLIENT_TEXT_CHARS`]; empty input becomes the placeholder.
pub fn clip_client_text(raw: Option<&str>) -> String {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return NON_TEXT_PLACEHOLDER.to_string();
    }
    trimmed.chars().take(MAX_CLIENT_TEXT_CHARS).collect()
}

/// A bare hello (or a non-text message) that carries no question worth retrieving for.
pub fn is_greeting_only(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() || lowered == NON_TEXT_PLACEHOLDER {
        return true;
    }
    lowered.chars().count() <= MAX_GREETING_CHARS
        && GREETINGS.iter().any(|greeting| {
            lowered == *greeting
                || lowered.strip_prefix(greeting).is_some_and(|rest| rest.starts_with(' '))
        })
}

/// Total for non-empty text: anything unrecognized is `Need::Other`.
pub fn normalize_need(text: &str) -> Option<Need> {
    prepare(text).map(|t| match_need(&t).unwrap_or(Need::Other))
}

/// Like [`normalize_need`] but only on a keyword hit, never via the `Other` fallback.
pub fn recognize_need(text: &str) -> Option<Need> {
    prepare(text).and_then(|t| match_need(&t))
}

fn match_need(t: &str) -> Option<Need> {
    if contains_any(t, &["бот", "bot"]) {
        Some(Need::Bot)
    } else if contains_any(t, &["сайт", "site", "лендинг", "landing"]) {
        Some(Need::Site)
    } else if contains_any(t, &["авто", "automat"]) {
        Some(Need::Automation)
    } else {
        None
    }
}

/// Precedence: 30 and 80, then 80 and 150, then 150 or `+`, then `до` or 30.
pub fn normalize_budget(text: &str) -> Option<Budget> {
    let t = prepare(text)?;
    let has = |needle: &str| t.contains(needle);

    if has("30") && has("80") {
        Some(Budget::From30To80k)
    } else if has("80") && has("150") {
        Some(Budget::From80To150k)
    } else if has("150") || has("+") {
        Some(Budget::Over150k)
    } else if has("до") || has("up to") || has("30") {
        Some(Budget::UpTo30k)
    } else {
        None
    }
}

pub fn normalize_deadline(text: &str) -> Option<Deadline> {
    let t = prepare(text)?;

    if contains_any(&t, &["1–3", "срочно", "дня", "urgent", "asap"]) {
        Some(Deadline::Urgent)
    } else if contains_any(&t, &["1–2", "нед", "week"]) {
        Some(Deadline::Weeks)
    } else if contains_any(&t, &["месяц", "month"]) {
        Some(Deadline::Month)
    } else if contains_any(&t, &["не гор", "no rush", "flexible"]) {
        Some(Deadline::Flexible)
    } else {
        None
    }
}

/// Total for non-empty text: defaults to answering in the chat itself.
pub fn normalize_contact(text: &str) -> Option<ContactMethod> {
    prepare(text).map(|t| match_contact(&t).unwrap_or(ContactMethod::InChat))
}

/// Like [`normalize_contact`] but only on a keyword hit, never via the `InChat` fallback.
pub fn recognize_contact(text: &str) -> Option<ContactMethod> {
    prepare(text).and_then(|t| match_contact(&t))
}

fn match_contact(t: &str) -> Option<ContactMethod> {
    if contains_any(t, &["телеграм", "telegram"]) {
        Some(ContactMethod::InChat)
    } else if contains_any(t, &["тел", "phone"]) {
        Some(ContactMethod::Phone)
    } else if contains_any(t, &["соз", "звон", "call"]) {
        Some(ContactMethod::Call)
    } else if contains_any(t, &["чат", "здесь", "сюда", "chat"]) {
        Some(ContactMethod::InChat)
    } else {
        None
    }
}

fn phone_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\+?\d[\d\s\-()]{7,}\d").ok()).as_ref()
}

/// First run of at least nine digits, separators allowed, with whitespace collapsed.
///
/// Trailing groups of fewer than two digits are dropped, so a quantity typed after
/// the number ("... 45 67 2 шт") stays out of it.
pub fn extract_phone(text: &str) -> Option<String> {
    let pattern = phone_pattern()?;
    pattern
        .find_iter(text)
        .map(|found| trim_trailing_fragments(found.as_str()))
        .find(|candidate| {
            candidate.chars().filter(char::is_ascii_digit).count() >= MIN_PHONE_DIGITS
        })
}

fn trim_trailing_fragments(candidate: &str) -> String {
    let mut groups: Vec<&str> = candidate.split_whitespace().collect();
    while groups.len() > 1
        && groups
            .last()
            .is_some_and(|group| group.chars().filter(char::is_ascii_digit).count() < 2)
    {
        groups.pop();
    }
    groups.join(" ")
}

/// Any non-empty answer, capped at [`MAX_CALL_TIME_CHARS`].
pub fn normalize_call_time(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.chars().take(MAX_CALL_TIME_CHARS).collect())
}
