//! Log redaction.
//!
//! Scrubs API keys, bearer tokens, and e-mail addresses from message text
//! before it reaches a log sink.

use regex::Regex;
use std::sync::LazyLock;

static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(sk-[a-zA-Z0-9_\-]{16,})|(Bearer\s+[a-zA-Z0-9\-\._~+/]+=*)").expect("valid api key regex")
});
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = API_KEY_RE.replace_all(input, "[REDACTED_TOKEN]");
    EMAIL_RE.replace_all(&redacted, "[REDACTED_EMAIL]").into_owned()
}

/// Redact and clip long text for log fields.
pub fn log_preview(input: &str, max_chars: usize) -> String {
    let redacted = redact_sensitive_data(input);
    if redacted.chars().count() <= max_chars {
        return redacted;
    }
    let clipped: String = redacted.chars().take(max_chars).collect();
    format!("{clipped}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction() {
        let raw = "mail ops@example.com with Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9 and sk-abcdefghijklmnop1234";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("ops@example.com"));
        assert!(!clean.contains("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9"));
        assert!(!clean.contains("sk-abcdefghijklmnop1234"));
        assert!(clean.contains("[REDACTED_EMAIL]"));
    }

    #[test]
    fn test_preview_clips() {
        assert_eq!(log_preview("hello world", 5), "hello…");
        assert_eq!(log_preview("hi", 5), "hi");
    }
}
