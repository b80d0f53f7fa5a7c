//! Function-calling loop: a bounded multi-turn conversation with the model.
//!
//! Send the prompt, and while the model asks for a function, dispatch it and
//! send the result back as the next turn. Calls are strictly sequential: the
//! result of call N reaches the model before call N+1 is requested.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_MAX_FUNCTION_ITERATIONS;
use crate::error::{CallingLoopError, LlmError};
use crate::functions::dispatcher::FunctionDispatcher;
use crate::functions::types::{FunctionCall, email_sent};
use crate::llm::{
    ChatMessage, LlmProvider, ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

/// Temperature for step conversations; routing output should be stable.
const STEP_TEMPERATURE: f32 = 0.2;

/// How a function-calling conversation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The model replied without requesting a function.
    Completed,
    /// Empty reply after a function call, but an email already went out.
    SoftCompleted,
    /// Empty reply after a function call with nothing sent.
    EmptyResponse,
    /// Turn limit reached while the model was still requesting functions.
    MaxIterations,
    /// A later model turn failed; calls made so far are kept.
    ModelError(String),
}

/// Output of one function-calling conversation.
#[derive(Debug, Clone)]
pub struct FunctionCallingResult {
    /// Text of the final reply (empty when the loop stopped early).
    pub final_text: String,
    /// Calls made during this conversation, in order.
    pub function_calls: Vec<FunctionCall>,
    /// Model requests sent, including the initial one.
    pub total_turns: usize,
    /// True iff a `send_email` call in `function_calls` succeeded.
    pub email_sent: bool,
    pub outcome: LoopOutcome,
}

impl FunctionCallingResult {
    fn finish(
        final_text: String,
        function_calls: Vec<FunctionCall>,
        total_turns: usize,
        outcome: LoopOutcome,
    ) -> Self {
        let email_sent = email_sent(&function_calls);
        Self {
            final_text,
            function_calls,
            total_turns,
            email_sent,
            outcome,
        }
    }
}

/// Drives one step's conversation with a function-calling provider.
pub struct FunctionCallingLoop {
    llm: Arc<dyn LlmProvider>,
    max_iterations: usize,
}

impl FunctionCallingLoop {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_iterations: DEFAULT_MAX_FUNCTION_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Run the conversation.
    ///
    /// Errors only when the provider cannot do function calling, the first
    /// model request fails, or the model requests an unknown function.
    pub async fn run(
        &self,
        system_instruction: &str,
        user_message: &str,
        functions: &[ToolDefinition],
        dispatcher: &FunctionDispatcher,
    ) -> Result<FunctionCallingResult, CallingLoopError> {
        if !self.llm.supports_function_calling() {
            return Err(LlmError::FunctionCallingUnsupported {
                provider: self.llm.model_name().to_string(),
            }
            .into());
        }

        let mut messages = vec![
            ChatMessage::system(system_instruction),
            ChatMessage::user(user_message),
        ];
        let mut calls: Vec<FunctionCall> = Vec::new();

        let mut response = self.send(&messages, functions).await?;
        let mut turns = 1;

        loop {
            let Some(requested) = response.tool_calls.first().cloned() else {
                let text = response.content.unwrap_or_default();
                if text.trim().is_empty() && !calls.is_empty() {
                    let outcome = if email_sent(&calls) {
                        info!(turns, "Empty reply after email was sent, treating as complete");
                        LoopOutcome::SoftCompleted
                    } else {
                        warn!(
                            turns,
                            calls = calls.len(),
                            "Model returned an empty reply after a function call"
                        );
                        LoopOutcome::EmptyResponse
                    };
                    return Ok(FunctionCallingResult::finish(
                        String::new(),
                        calls,
                        turns,
                        outcome,
                    ));
                }
                debug!(turns, calls = calls.len(), "Function-calling loop completed");
                return Ok(FunctionCallingResult::finish(
                    text,
                    calls,
                    turns,
                    LoopOutcome::Completed,
                ));
            };

            if turns >= self.max_iterations {
                warn!(
                    turns,
                    max_iterations = self.max_iterations,
                    pending = %requested.name,
                    "Function-calling turn limit reached, stopping"
                );
                return Ok(FunctionCallingResult::finish(
                    String::new(),
                    calls,
                    turns,
                    LoopOutcome::MaxIterations,
                ));
            }

            if response.tool_calls.len() > 1 {
                warn!(
                    requested = response.tool_calls.len(),
                    executing = %requested.name,
                    "Model requested several functions at once; executing only the first"
                );
            }

            let call = match dispatcher
                .execute(&requested.name, requested.arguments.clone())
                .await
            {
                Ok(call) => call,
                Err(e) => {
                    error!(
                        error = %e,
                        completed_calls = calls.len(),
                        email_sent = email_sent(&calls),
                        "Model requested a function outside the supported set"
                    );
                    return Err(CallingLoopError::ProtocolViolation { source: e, calls });
                }
            };

            messages.push(ChatMessage::assistant_with_tool_calls(
                response.content.clone(),
                vec![requested.clone()],
            ));
            messages.push(ChatMessage::tool_result(
                &requested.id,
                &requested.name,
                call.response_payload().to_string(),
            ));
            calls.push(call);

            turns += 1;
            response = match self.send(&messages, functions).await {
                Ok(r) => r,
                Err(e) => {
                    error!(
                        error = %e,
                        turns,
                        calls = calls.len(),
                        "Model request failed mid-conversation"
                    );
                    return Ok(FunctionCallingResult::finish(
                        String::new(),
                        calls,
                        turns,
                        LoopOutcome::ModelError(e.to_string()),
                    ));
                }
            };
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        functions: &[ToolDefinition],
    ) -> Result<ToolCompletionResponse, LlmError> {
        let request = ToolCompletionRequest::new(messages.to_vec(), functions.to_vec())
            .with_temperature(STEP_TEMPERATURE);
        self.llm.complete_with_tools(request).await
    }
}
