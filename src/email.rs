//! Inbound customer email, as handed over by the MIME-parsing collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parsed customer email entering the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    /// Message-ID header (or provider message id).
    pub message_id: String,
    /// Provider thread id, used to reply in-thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Sender address.
    pub from: String,
    pub subject: String,
    /// Plain-text body with quoted history already stripped.
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEmail {
    pub fn new(
        message_id: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            thread_id: None,
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Bare address from a `Name <addr>` style header value.
    pub fn sender_address(&self) -> &str {
        extract_address(&self.from)
    }
}

/// Extract `addr` from `Display Name <addr>`; returns the trimmed input otherwise.
pub fn extract_address(raw: &str) -> &str {
    let trimmed = raw.trim();
    match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(start), Some(end)) if start < end => trimmed[start + 1..end].trim(),
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_address_handles_display_name() {
        assert_eq!(
            extract_address("Jane Doe <jane@example.com>"),
            "jane@example.com"
        );
        assert_eq!(extract_address("  jane@example.com "), "jane@example.com");
        assert_eq!(extract_address("broken <jane@example.com"), "broken <jane@example.com");
    }

    #[test]
    fn builder_sets_thread() {
        let email = InboundEmail::new("m1", "a@b.c", "Hi", "Body").with_thread_id("t1");
        assert_eq!(email.thread_id.as_deref(), Some("t1"));
        assert_eq!(email.sender_address(), "a@b.c");
    }
}
