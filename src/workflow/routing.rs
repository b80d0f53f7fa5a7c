//! Routing parser. Turns a step's free-text reply into a transition.
//!
//! Recognised lines (case-insensitive key, anywhere in the text, tolerant of
//! markdown emphasis and list markers):
//!
//! ```text
//! NEXT_STEP: 02-check-warranty
//! SERIAL: SN12345
//! REASON: customer quoted the serial in the second paragraph
//! ```
//!
//! A directive at the start of a line wins. Failing that, `NEXT_STEP` is also
//! accepted mid-line after a word boundary (`Decision: NEXT_STEP: ...`).
//! A reply without a usable `NEXT_STEP` routes to `DONE` and is flagged as a
//! fallback. Parsing never fails.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::workflow::types::TERMINAL_STEP;

static NEXT_STEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t*>`_#-]*NEXT[_ ]STEP[*_`]*[ \t]*:[*_` \t]*([A-Za-z0-9][A-Za-z0-9_.\-]*)")
        .expect("NEXT_STEP pattern is valid")
});

static INLINE_NEXT_STEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bNEXT[_ ]STEP[*_`]*[ \t]*:[*_` \t]*([A-Za-z0-9][A-Za-z0-9_.\-]*)")
        .expect("inline NEXT_STEP pattern is valid")
});

static SERIAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t*>`_#-]*SERIAL[*_`]*[ \t]*:[*_` \t]*([^\s*`]+)")
        .expect("SERIAL pattern is valid")
});

static REASON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t*>`_#-]*REASON[*_`]*[ \t]*:[ \t]*(.*?)[ \t]*\r?$")
        .expect("REASON pattern is valid")
});

/// Placeholder values models write when they found no serial.
const EMPTY_SERIALS: &[&str] = &["none", "n/a", "na", "unknown", "null", "-"];

/// Routing fields extracted from one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub next_step: String,
    /// `serial` and `reason` when present.
    pub metadata: HashMap<String, String>,
    /// True when `NEXT_STEP` was missing and `next_step` is the `DONE` fallback.
    pub fallback: bool,
}

/// Stateless, deterministic parser for step replies.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingParser;

impl RoutingParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str) -> RoutingDecision {
        let mut metadata = HashMap::new();

        if let Some(serial) = first_capture(&SERIAL_RE, text)
            .map(|s| s.trim_end_matches([',', ';', '.']))
            .filter(|s| !s.is_empty() && !EMPTY_SERIALS.contains(&s.to_ascii_lowercase().as_str()))
        {
            metadata.insert("serial".to_string(), serial.to_string());
        }

        if let Some(reason) = first_capture(&REASON_RE, text).filter(|r| !r.is_empty()) {
            metadata.insert("reason".to_string(), reason.to_string());
        }

        let directive = first_capture(&NEXT_STEP_RE, text)
            .or_else(|| first_capture(&INLINE_NEXT_STEP_RE, text));

        match directive {
            Some(step) => RoutingDecision {
                next_step: normalize_step(step),
                metadata,
                fallback: false,
            },
            None => {
                warn!(
                    preview = %preview(text, 200),
                    "No NEXT_STEP directive in step reply, defaulting to {TERMINAL_STEP}"
                );
                RoutingDecision {
                    next_step: TERMINAL_STEP.to_string(),
                    metadata,
                    fallback: true,
                }
            }
        }
    }
}

fn first_capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Step names are case-sensitive, except the terminal sentinel.
fn normalize_step(step: &str) -> String {
    let step = step.trim_end_matches('.');
    if step.eq_ignore_ascii_case(TERMINAL_STEP) {
        TERMINAL_STEP.to_string()
    } else {
        step.to_string()
    }
}

/// Single-line preview for log output.
fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_chars {
        let truncated: String = collapsed.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> RoutingDecision {
        RoutingParser::new().parse(text)
    }

    #[test]
    fn extracts_next_step() {
        let d = parse("Looked at the email.\nNEXT_STEP: 02-check-warranty\n");
        assert_eq!(d.next_step, "02-check-warranty");
        assert!(!d.fallback);
        assert!(d.metadata.is_empty());
    }

    #[test]
    fn key_is_case_insensitive() {
        assert_eq!(parse("next_step: 03a-valid-warranty").next_step, "03a-valid-warranty");
        assert_eq!(parse("Next_Step:DONE").next_step, "DONE");
    }

    #[test]
    fn done_token_is_normalized() {
        let d = parse("NEXT_STEP: done");
        assert_eq!(d.next_step, TERMINAL_STEP);
        assert!(!d.fallback);
    }

    #[test]
    fn missing_directive_falls_back_to_done() {
        let d = parse("I could not decide what to do.");
        assert_eq!(d.next_step, TERMINAL_STEP);
        assert!(d.fallback);
    }

    #[test]
    fn empty_and_garbage_input_never_panics() {
        for text in ["", "\n\n", "NEXT_STEP:", "NEXT_STEP:   \nSERIAL:", "::::", "\u{0}\u{feff}NEXT"] {
            let d = parse(text);
            assert_eq!(d.next_step, TERMINAL_STEP);
            assert!(d.fallback);
        }
    }

    #[test]
    fn extracts_serial_and_reason() {
        let d = parse(
            "Found it.\nSERIAL: SN12345\nREASON: serial in signature block\nNEXT_STEP: 02-check-warranty",
        );
        assert_eq!(d.metadata["serial"], "SN12345");
        assert_eq!(d.metadata["reason"], "serial in signature block");
        assert_eq!(d.next_step, "02-check-warranty");
    }

    #[test]
    fn placeholder_serial_is_ignored() {
        let d = parse("SERIAL: N/A\nNEXT_STEP: 04-request-serial");
        assert!(!d.metadata.contains_key("serial"));
    }

    #[test]
    fn tolerates_markdown_decoration() {
        let d = parse("**NEXT_STEP:** `03b-invalid-warranty`\n- **SERIAL**: ABC-999,\n");
        assert_eq!(d.next_step, "03b-invalid-warranty");
        assert_eq!(d.metadata["serial"], "ABC-999");
    }

    #[test]
    fn inline_directive_after_word_boundary() {
        let d = parse("Decision: NEXT_STEP: 02-check-warranty");
        assert_eq!(d.next_step, "02-check-warranty");
        assert!(!d.fallback);

        assert!(parse("MY_NEXT_STEP: 02-check-warranty").fallback);
    }

    #[test]
    fn line_start_directive_beats_inline_one() {
        let d = parse("Decision: NEXT_STEP: 03b-invalid-warranty\nNEXT_STEP: 03a-valid-warranty");
        assert_eq!(d.next_step, "03a-valid-warranty");
    }

    #[test]
    fn first_directive_wins() {
        let d = parse("NEXT_STEP: 02-check-warranty\nNEXT_STEP: DONE");
        assert_eq!(d.next_step, "02-check-warranty");
    }

    #[test]
    fn parsing_is_deterministic() {
        let text = "SERIAL: X1\nREASON: because\nNEXT_STEP: 05-escalate";
        assert_eq!(parse(text), parse(text));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let p = preview("héllo wörld  \n again", 7);
        assert_eq!(p, "héllo w...");
    }
}
