//! Error types for the support workflow engine.

use std::path::PathBuf;
use std::time::Duration;

use crate::functions::types::FunctionCall;
use crate::workflow::types::OrchestrationResult;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Function calling error: {0}")]
    CallingLoop(#[from] CallingLoopError),

    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Instruction error: {0}")]
    Instruction(#[from] InstructionError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} does not support function calling")]
    FunctionCallingUnsupported { provider: String },
}

impl LlmError {
    /// Whether the layer invoking the provider may retry this failure.
    ///
    /// The workflow core never retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. } | Self::RateLimited { .. } | Self::Timeout { .. }
        )
    }
}

/// Failures reported by tool collaborators (warranty, ticketing, email).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Service {service} unavailable: {reason}")]
    Unavailable { service: String, reason: String },

    #[error("Service {service} rejected the request: {reason}")]
    Rejected { service: String, reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },
}

/// Protocol violations detected while dispatching a function call.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },
}

/// Errors that end a function-calling conversation before it starts
/// or on a protocol violation.
#[derive(Debug, thiserror::Error)]
pub enum CallingLoopError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// `calls` holds the calls completed earlier in the same conversation.
    #[error("Protocol violation after {} call(s): {source}", .calls.len())]
    ProtocolViolation {
        #[source]
        source: DispatchError,
        calls: Vec<FunctionCall>,
    },
}

/// Errors that abort a single step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// `calls` holds the calls the step completed before the violation.
    #[error("Protocol violation in step {step}: {source}")]
    ProtocolViolation {
        step: String,
        #[source]
        source: DispatchError,
        calls: Vec<FunctionCall>,
    },
}

/// Step instruction loading errors.
#[derive(Debug, thiserror::Error)]
pub enum InstructionError {
    #[error("No instructions for step {step} at {}", .path.display())]
    NotFound { step: String, path: PathBuf },

    #[error("Failed to read instructions for step {step}: {source}")]
    Io {
        step: String,
        #[source]
        source: std::io::Error,
    },
}

/// A step routed to a name the registry does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Step {from} routed to unknown step {step}")]
pub struct UnknownStepError {
    pub step: String,
    pub from: String,
}

/// Errors that abort a whole workflow run.
///
/// Every variant carries the run up to the point of failure, so the caller
/// still sees the steps executed and every function call already made.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Circuit breaker tripped: more than {max_steps} steps (last step: {last_step})")]
    CircuitBreaker {
        max_steps: usize,
        last_step: String,
        partial: Box<OrchestrationResult>,
    },

    #[error("Step {from} routed to unknown step {step}")]
    UnknownStep {
        step: String,
        from: String,
        partial: Box<OrchestrationResult>,
    },

    #[error("Protocol violation in step {step}: {source}")]
    ProtocolViolation {
        step: String,
        #[source]
        source: DispatchError,
        partial: Box<OrchestrationResult>,
    },
}

impl WorkflowError {
    /// Stable code for supervisors routing the email to manual review.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CircuitBreaker { .. } => "CIRCUIT_BREAKER",
            Self::UnknownStep { .. } => "UNKNOWN_STEP",
            Self::ProtocolViolation { .. } => "PROTOCOL_VIOLATION",
        }
    }

    /// The run as far as it got.
    pub fn partial(&self) -> &OrchestrationResult {
        match self {
            Self::CircuitBreaker { partial, .. }
            | Self::UnknownStep { partial, .. }
            | Self::ProtocolViolation { partial, .. } => partial,
        }
    }

    pub fn into_partial(self) -> OrchestrationResult {
        match self {
            Self::CircuitBreaker { partial, .. }
            | Self::UnknownStep { partial, .. }
            | Self::ProtocolViolation { partial, .. } => *partial,
        }
    }

    /// Function calls made before the run was aborted, across all steps.
    pub fn function_calls(&self) -> &[FunctionCall] {
        &self.partial().context.function_calls
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
