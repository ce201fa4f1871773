use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

/// Maximum user-supplied prompt length after sanitization.
pub const MAX_PROMPT_CHARS: usize = 5000;

/// Hardening applied to user text before it reaches prompt composition.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedInput {
    pub text: String,
    pub redactions: usize,
    pub truncated: bool,
    /// More than half of the input was removed; logged as a suspicion marker
    /// but processing continues with the sanitized text.
    pub suspicious: bool,
}

struct RedactionRule {
    label: &'static str,
    pattern: &'static str,
}

const REDACTION_RULES: &[RedactionRule] = &[
    RedactionRule {
        label: "instruction-override",
        pattern: r"(?i)\b(ignore|forget|disregard)\b[^.\n]{0,60}\binstructions?\b",
    },
    RedactionRule {
        label: "role-hijack",
        pattern: r"(?i)\b(act\s+as|pretend\s+to\s+be)\b[^.\n]{0,60}\b(admin|root|system)\b",
    },
    RedactionRule {
        label: "prompt-leak",
        pattern: r"(?i)\b(show|reveal|print)\b[^.\n]{0,60}\b(prompt|instructions)\b",
    },
    RedactionRule {
        label: "encoding",
        pattern: r"(?i)\b(base64|rot13)\b",
    },
    RedactionRule {
        label: "format-override",
        pattern: r"(?i)\brespond\s+(?:only\s+)?(?:as|in)\s+(json|xml|code)\b",
    },
    RedactionRule {
        label: "delimiter-injection",
        pattern: r#"(?i)(```|"""|''')\s*(json|xml|code|python|bash|sh)\b"#,
    },
];

fn compiled_rules() -> &'static Vec<(&'static str, Regex)> {
    static RULES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        REDACTION_RULES
            .iter()
            .filter_map(|rule| {
                Regex::new(rule.pattern)
                    .map(|regex| (rule.label, regex))
                    .ok()
            })
            .collect()
    })
}

/// Apply the prompt-injection hardening rules: pattern redaction, control
/// character stripping, triple-quote escaping and length truncation.
pub fn sanitize_prompt_input(input: &str) -> SanitizedInput {
    let original_chars = input.chars().count();

    // Control characters carry no meaning for extraction and are a common
    // smuggling channel.
    let mut text: String = input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    let mut redactions = 0_usize;
    let mut redacted_chars = 0_usize;
    for (label, regex) in compiled_rules() {
        let replacement = format!("[REDACTED {label}]");
        let matches: Vec<_> = regex
            .find_iter(&text)
            .map(|m| m.as_str().chars().count())
            .collect();
        if matches.is_empty() {
            continue;
        }
        redactions += matches.len();
        redacted_chars += matches.iter().sum::<usize>();
        text = regex.replace_all(&text, replacement.as_str()).into_owned();
    }

    // Neutralize remaining triple quotes so they cannot terminate a quoted
    // block inside the composed prompt.
    if text.contains("\"\"\"") {
        text = text.replace("\"\"\"", "\\\"\\\"\\\"");
    }

    let mut truncated = false;
    if text.chars().count() > MAX_PROMPT_CHARS {
        text = text.chars().take(MAX_PROMPT_CHARS).collect();
        text.push('…');
        truncated = true;
    }

    let suspicious = original_chars > 0 && redacted_chars.saturating_mul(2) > original_chars;

    if suspicious {
        warn!(
            original_chars,
            redacted_chars, "sanitization removed most of the input"
        );
    }

    SanitizedInput {
        text,
        redactions,
        truncated,
        suspicious,
    }
}
