//! Normalization of guest contact details.
//!
//! Guests type their email and phone into a free-form RSVP form, so both
//! values are cleaned up here before any channel decision is made.

use regex::Regex;
use std::sync::LazyLock;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.[a-z]{2,}$")
        .expect("email regex is valid")
});

static E164_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9][0-9]{7,14}$").expect("E.164 regex is valid"));

/// Returns the lowercased address if it looks deliverable.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || email.len() > 254 {
        return None;
    }
    EMAIL_RE.is_match(&email).then_some(email)
}

/// Normalizes a phone number to E.164.
///
/// National numbers (no `+` or `00` prefix) get `default_country_code`
/// prepended after the trunk `0` is dropped. Without a default country code
/// such numbers are rejected.
pub fn normalize_phone(raw: &str, default_country_code: Option<&str>) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut cleaned = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '0'..='9' => cleaned.push(c),
            '+' if i == 0 => cleaned.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }

    let number = if let Some(rest) = cleaned.strip_prefix("00") {
        format!("+{}", rest)
    } else if cleaned.starts_with('+') {
        cleaned
    } else {
        let cc = default_country_code?.trim().trim_start_matches('+');
        if cc.is_empty() || !cc.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let national = cleaned.strip_prefix('0').unwrap_or(&cleaned);
        format!("+{}{}", cc, national)
    };

    E164_RE.is_match(&number).then_some(number)
}
