//! Step-based workflow engine.
//!
//! One inbound email flows through:
//! 1. `StepOrchestrator::orchestrate()`: validates routing, bounds total steps
//! 2. `StepExecutor::execute()`: runs one step (instructions plus model calls)
//! 3. `RoutingParser::parse()`: `NEXT_STEP` / `SERIAL` / `REASON` directives
//! 4. `StepContext::merge()`: next context snapshot
//!
//! Step-to-step order is strictly sequential; there is no parallel step execution.

pub mod context;
pub mod executor;
pub mod instructions;
pub mod orchestrator;
pub mod registry;
pub mod routing;
pub mod types;

pub use context::StepContext;
pub use executor::StepExecutor;
pub use instructions::{FileInstructionStore, InstructionCache, InstructionSource, StaticInstructions};
pub use orchestrator::StepOrchestrator;
pub use registry::{StepDefinition, StepRegistry};
pub use routing::{RoutingDecision, RoutingParser};
pub use types::{OrchestrationResult, StepExecutionResult, StepTarget, TERMINAL_STEP};
