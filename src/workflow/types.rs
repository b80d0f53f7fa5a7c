//! Step and orchestration result types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::functions::types::FunctionCall;
use crate::workflow::context::StepContext;

/// The `next_step` value that ends a workflow.
pub const TERMINAL_STEP: &str = "DONE";

/// Output of one executed step. Never mutated after the executor returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionResult {
    pub step_name: String,
    /// Step to run next, or `TERMINAL_STEP`.
    pub next_step: String,
    /// Raw text of the model's final reply.
    pub response_text: String,
    /// Key/value pairs extracted from the reply and from successful calls.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Calls made during this step only.
    pub function_calls: Vec<FunctionCall>,
    /// True when no `NEXT_STEP` directive was found and routing fell back to `DONE`.
    #[serde(default)]
    pub routing_fallback: bool,
    /// Set when the step could not run to completion and was terminated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepExecutionResult {
    pub fn is_terminal(&self) -> bool {
        self.next_step == TERMINAL_STEP
    }

    /// Whether this result ended the workflow without a clean routing decision.
    pub fn is_degraded(&self) -> bool {
        self.routing_fallback || self.error.is_some()
    }

    /// Terminal result for a step that failed before producing a usable reply.
    pub fn failed(
        step_name: impl Into<String>,
        error: impl Into<String>,
        function_calls: Vec<FunctionCall>,
    ) -> Self {
        let error = error.into();
        let mut metadata = HashMap::new();
        metadata.insert(
            "error".to_string(),
            serde_json::Value::String(error.clone()),
        );
        Self {
            step_name: step_name.into(),
            next_step: TERMINAL_STEP.to_string(),
            response_text: String::new(),
            metadata,
            function_calls,
            routing_fallback: false,
            error: Some(error),
        }
    }
}

/// Where a step name routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTarget<'a> {
    Step(&'a crate::workflow::registry::StepDefinition),
    Terminal,
}

/// Final output of a workflow run for one email.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub run_id: Uuid,
    /// Every executed step, in order.
    pub steps: Vec<StepExecutionResult>,
    /// Name of the last step executed.
    pub final_step: String,
    /// False when the last step failed and was terminated.
    pub completed: bool,
    /// True when the run ended on a routing fallback or a step failure.
    pub degraded: bool,
    pub total_steps: usize,
    /// Context after merging the last step; carries the full call audit trail.
    pub context: StepContext,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OrchestrationResult {
    /// Summarize a run from its executed steps and the context after the last merge.
    pub fn from_steps(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        steps: Vec<StepExecutionResult>,
        context: StepContext,
    ) -> Self {
        let last = steps.last();
        let final_step = last.map(|r| r.step_name.clone()).unwrap_or_default();
        let completed = last.is_none_or(|r| r.error.is_none());
        let degraded = last.is_some_and(|r| r.is_degraded());
        Self {
            run_id,
            total_steps: steps.len(),
            steps,
            final_step,
            completed,
            degraded,
            context,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Mark a run that was cut short by a fatal error.
    pub(crate) fn aborted(mut self) -> Self {
        self.completed = false;
        self.degraded = true;
        self
    }

    /// True iff any step in the run sent an email successfully.
    pub fn email_sent(&self) -> bool {
        crate::functions::types::email_sent(&self.context.function_calls)
    }
}
