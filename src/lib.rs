//! Support Flow: a step-based, model-directed workflow engine for inbound
//! customer email.

pub mod config;
pub mod email;
pub mod error;
pub mod functions;
pub mod llm;
pub mod logging;
pub mod workflow;

pub use config::OrchestratorConfig;
pub use email::InboundEmail;
pub use error::{Error, Result, WorkflowError};
pub use workflow::{OrchestrationResult, StepOrchestrator};
