//! Per-email workflow context.
//!
//! Steps never mutate a context. The executor borrows a snapshot, the step's
//! output travels in `StepExecutionResult::metadata`, and the orchestrator
//! produces the next snapshot with `StepContext::merge`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::email::InboundEmail;
use crate::functions::types::FunctionCall;
use crate::workflow::types::StepExecutionResult;

/// Everything learned about one email so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    // Source email
    pub subject: String,
    pub body: String,
    pub from_address: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    // Derived by steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warranty_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_description: Option<String>,

    /// Every call made across the whole workflow, append-only.
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
    /// Step-specific extras.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StepContext {
    /// Fresh context for an inbound email.
    pub fn from_email(email: &InboundEmail) -> Self {
        Self {
            subject: email.subject.clone(),
            body: email.body.clone(),
            from_address: email.sender_address().to_string(),
            message_id: email.message_id.clone(),
            thread_id: email.thread_id.clone(),
            ..Default::default()
        }
    }

    /// Fold a step's output into a new context.
    ///
    /// `serial` → `serial_number`; `warranty_status` / `warranty_data` →
    /// `warranty_data`; `ticket_id` → `ticket_id`; anything else lands in
    /// `metadata` verbatim, last write wins. `issue_description` is one of
    /// those, and `StepContext::issue_description` mirrors it.
    /// The step's function calls are appended to the audit trail.
    pub fn merge(mut self, result: &StepExecutionResult) -> Self {
        // Sorted so that when both warranty keys are present the outcome
        // does not depend on hash order.
        let mut entries: Vec<_> = result.metadata.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (key, value) in entries {
            match key.as_str() {
                "serial" => self.serial_number = Some(value_as_string(value)),
                "warranty_status" | "warranty_data" => self.warranty_data = Some(value.clone()),
                "ticket_id" => self.ticket_id = Some(value_as_string(value)),
                other => {
                    if other == "issue_description" {
                        self.issue_description = Some(value_as_string(value));
                    }
                    self.metadata.insert(key.clone(), value.clone());
                }
            }
        }

        self.function_calls
            .extend(result.function_calls.iter().cloned());

        debug!(
            step = %result.step_name,
            keys = result.metadata.len(),
            calls = result.function_calls.len(),
            "Merged step result into context"
        );
        self
    }
}

/// Strings come through unquoted, anything else as compact JSON.
fn value_as_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
