//! Step executor. Runs exactly one step against a context snapshot.
//!
//! Flow per step:
//! 1. Load the step's instruction text (system prompt)
//! 2. Build the step input from the context
//! 3. Plain completion, or the function-calling loop when the step declares functions
//! 4. Parse routing directives from the final text
//!
//! Model and instruction failures end the workflow with a terminal failed
//! result instead of an error. Only protocol violations propagate, together
//! with the calls the step made before the violation.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::DEFAULT_MAX_FUNCTION_ITERATIONS;
use crate::error::{CallingLoopError, StepError};
use crate::functions::calling_loop::{FunctionCallingLoop, LoopOutcome};
use crate::functions::dispatcher::FunctionDispatcher;
use crate::functions::types::{FunctionCall, FunctionName};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::workflow::context::StepContext;
use crate::workflow::instructions::InstructionSource;
use crate::workflow::registry::StepDefinition;
use crate::workflow::routing::{RoutingDecision, RoutingParser};
use crate::workflow::types::{StepExecutionResult, TERMINAL_STEP};

/// Temperature for plain step completions.
const STEP_TEMPERATURE: f32 = 0.2;

/// Max body characters included in a step's input.
const MAX_BODY_CHARS: usize = 4000;

/// Executes single steps.
pub struct StepExecutor {
    llm: Arc<dyn LlmProvider>,
    instructions: Arc<dyn InstructionSource>,
    dispatcher: FunctionDispatcher,
    parser: RoutingParser,
    max_function_iterations: usize,
}

impl StepExecutor {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        instructions: Arc<dyn InstructionSource>,
        dispatcher: FunctionDispatcher,
    ) -> Self {
        Self {
            llm,
            instructions,
            dispatcher,
            parser: RoutingParser::new(),
            max_function_iterations: DEFAULT_MAX_FUNCTION_ITERATIONS,
        }
    }

    pub fn with_max_function_iterations(mut self, max: usize) -> Self {
        self.max_function_iterations = max;
        self
    }

    /// Run `step` against `context`.
    pub async fn execute(
        &self,
        step: &StepDefinition,
        context: &StepContext,
    ) -> Result<StepExecutionResult, StepError> {
        let instructions = match self.instructions.load(&step.name).await {
            Ok(text) => text,
            Err(e) => {
                error!(step = %step.name, error = %e, "Failed to load step instructions");
                return Ok(StepExecutionResult::failed(&step.name, e.to_string(), vec![]));
            }
        };
        let input = build_step_input(step, context);

        let (text, calls, soft_completed) = if step.uses_functions() {
            let calling_loop = FunctionCallingLoop::new(Arc::clone(&self.llm))
                .with_max_iterations(self.max_function_iterations);
            let declarations = step.function_declarations();

            let result = match calling_loop
                .run(&instructions, &input, &declarations, &self.dispatcher)
                .await
            {
                Ok(result) => result,
                Err(CallingLoopError::ProtocolViolation { source, calls }) => {
                    return Err(StepError::ProtocolViolation {
                        step: step.name.clone(),
                        source,
                        calls,
                    });
                }
                Err(CallingLoopError::Llm(e)) => {
                    error!(step = %step.name, error = %e, "Step model call failed");
                    return Ok(StepExecutionResult::failed(&step.name, e.to_string(), vec![]));
                }
            };

            let soft = result.outcome == LoopOutcome::SoftCompleted;
            if let LoopOutcome::ModelError(message) = result.outcome {
                return Ok(StepExecutionResult::failed(
                    &step.name,
                    message,
                    result.function_calls,
                ));
            }
            (result.final_text, result.function_calls, soft)
        } else {
            let request = CompletionRequest::new(vec![
                ChatMessage::system(&*instructions),
                ChatMessage::user(input),
            ])
            .with_temperature(STEP_TEMPERATURE);

            match self.llm.complete(request).await {
                Ok(response) => (response.content, Vec::new(), false),
                Err(e) => {
                    error!(step = %step.name, error = %e, "Step model call failed");
                    return Ok(StepExecutionResult::failed(&step.name, e.to_string(), vec![]));
                }
            }
        };

        let decision = if soft_completed {
            RoutingDecision {
                next_step: TERMINAL_STEP.to_string(),
                metadata: HashMap::new(),
                fallback: false,
            }
        } else {
            self.parser.parse(&text)
        };

        let mut metadata = metadata_from_calls(&calls);
        metadata.extend(
            decision
                .metadata
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v))),
        );

        info!(
            step = %step.name,
            next_step = %decision.next_step,
            calls = calls.len(),
            fallback = decision.fallback,
            "Step executed"
        );

        Ok(StepExecutionResult {
            step_name: step.name.clone(),
            next_step: decision.next_step,
            response_text: text,
            metadata,
            function_calls: calls,
            routing_fallback: decision.fallback,
            error: None,
        })
    }
}

/// Metadata implied by successful calls. Text directives override these.
fn metadata_from_calls(calls: &[FunctionCall]) -> HashMap<String, serde_json::Value> {
    let mut metadata = HashMap::new();
    for call in calls.iter().filter(|c| c.success) {
        let result = call.result.clone().unwrap_or(serde_json::Value::Null);
        match call.name {
            FunctionName::CheckWarranty => {
                if let Some(serial) = call.arguments.get("serial_number") {
                    metadata.insert("serial".to_string(), serial.clone());
                }
                metadata.insert("warranty_data".to_string(), result);
            }
            FunctionName::CreateTicket => {
                if let Some(id) = result.get("ticket_id") {
                    metadata.insert("ticket_id".to_string(), id.clone());
                }
            }
            FunctionName::SendEmail => {
                metadata.insert("email_sent".to_string(), serde_json::Value::Bool(true));
                if let Some(id) = result.get("message_id") {
                    metadata.insert("sent_message_id".to_string(), id.clone());
                }
            }
        }
    }
    metadata
}

/// Build the user message for a step from the context snapshot.
fn build_step_input(step: &StepDefinition, context: &StepContext) -> String {
    let mut input = String::with_capacity(1024);

    let _ = writeln!(input, "Step: {}", step.name);
    let _ = writeln!(input, "From: {}", context.from_address);
    let _ = writeln!(input, "Subject: {}", context.subject);
    if let Some(ref thread_id) = context.thread_id {
        let _ = writeln!(input, "Thread ID: {thread_id}");
    }

    let mut known = Vec::new();
    if let Some(ref serial) = context.serial_number {
        known.push(format!("Serial number: {serial}"));
    }
    if let Some(ref warranty) = context.warranty_data {
        known.push(format!("Warranty: {warranty}"));
    }
    if let Some(ref ticket) = context.ticket_id {
        known.push(format!("Ticket ID: {ticket}"));
    }
    if let Some(ref issue) = context.issue_description {
        known.push(format!("Issue: {issue}"));
    }
    let mut extras: Vec<_> = context
        .metadata
        .iter()
        .filter(|(key, _)| key.as_str() != "issue_description")
        .collect();
    extras.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in extras {
        match value {
            serde_json::Value::String(s) => known.push(format!("{key}: {s}")),
            other => known.push(format!("{key}: {other}")),
        }
    }
    if !known.is_empty() {
        input.push_str("\nKnown so far:\n");
        for line in known {
            let _ = writeln!(input, "  {line}");
        }
    }

    if !context.function_calls.is_empty() {
        input.push_str("\nActions already taken:\n");
        for call in &context.function_calls {
            let status = if call.success { "ok" } else { "failed" };
            let _ = writeln!(input, "  - {} ({status})", call.name);
        }
    }

    let body: String = context.body.chars().take(MAX_BODY_CHARS).collect();
    let _ = write!(input, "\nEmail:\n{body}\n");
    let _ = write!(
        input,
        "\nEnd your reply with a line `NEXT_STEP: <step name or {TERMINAL_STEP}>`."
    );

    input
}
