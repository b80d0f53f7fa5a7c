//! Step orchestrator, the per-email state machine.
//!
//! Starting from an externally chosen step, run the step, merge its result
//! into a new context snapshot, and follow its `NEXT_STEP` until `DONE`.
//! Every routed name is checked against the registry before it runs, and the
//! total number of steps is bounded by a circuit breaker.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_MAX_STEPS, OrchestratorConfig};
use crate::email::InboundEmail;
use crate::error::{StepError, WorkflowError};
use crate::functions::dispatcher::FunctionDispatcher;
use crate::llm::LlmProvider;
use crate::workflow::context::StepContext;
use crate::workflow::executor::StepExecutor;
use crate::workflow::instructions::InstructionSource;
use crate::workflow::registry::StepRegistry;
use crate::workflow::types::{OrchestrationResult, StepExecutionResult, StepTarget};

/// Placeholder "previous step" for routing errors on the initial step.
const ENTRY: &str = "<entry>";

/// Drives one email's workflow from its initial step to `DONE`.
///
/// Holds no per-email state: every `orchestrate` call builds its own
/// context, so concurrent emails never share one.
pub struct StepOrchestrator {
    executor: StepExecutor,
    registry: StepRegistry,
    max_steps: usize,
}

impl StepOrchestrator {
    pub fn new(executor: StepExecutor, registry: StepRegistry) -> Self {
        Self {
            executor,
            registry,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Wire an orchestrator from configuration and collaborators.
    pub fn from_config(
        config: &OrchestratorConfig,
        llm: Arc<dyn LlmProvider>,
        instructions: Arc<dyn InstructionSource>,
        dispatcher: FunctionDispatcher,
        registry: StepRegistry,
    ) -> Self {
        let executor = StepExecutor::new(llm, instructions, dispatcher)
            .with_max_function_iterations(config.max_function_iterations);
        Self::new(executor, registry).with_max_steps(config.max_steps)
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Run the workflow for `email` starting at `initial_step`.
    ///
    /// Errors abort the run: the circuit breaker, routing to an unregistered
    /// step, or a protocol violation from the dispatcher. Each carries the
    /// run so far, including every function call already made.
    pub async fn orchestrate(
        &self,
        email: &InboundEmail,
        initial_step: &str,
    ) -> Result<OrchestrationResult, WorkflowError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!(
            %run_id,
            message_id = %email.message_id,
            from = %email.sender_address(),
            initial_step,
            "Starting workflow"
        );

        let mut context = StepContext::from_email(email);
        let mut steps = Vec::new();
        let mut current = initial_step.to_string();
        let mut previous = ENTRY.to_string();
        let mut step_count = 0usize;

        let partial = move |steps: Vec<StepExecutionResult>, context: StepContext| {
            Box::new(OrchestrationResult::from_steps(run_id, started_at, steps, context).aborted())
        };

        loop {
            let definition = match self.registry.resolve(&current, &previous) {
                Ok(StepTarget::Terminal) => break,
                Ok(StepTarget::Step(definition)) => definition,
                Err(e) => {
                    error!(%run_id, step = %current, from = %previous, "Routed to unknown step");
                    return Err(WorkflowError::UnknownStep {
                        step: e.step,
                        from: e.from,
                        partial: partial(steps, context),
                    });
                }
            };

            step_count += 1;
            if step_count > self.max_steps {
                error!(
                    %run_id,
                    max_steps = self.max_steps,
                    last_step = %previous,
                    next_step = %current,
                    function_calls = context.function_calls.len(),
                    "Circuit breaker tripped"
                );
                return Err(WorkflowError::CircuitBreaker {
                    max_steps: self.max_steps,
                    last_step: previous,
                    partial: partial(steps, context),
                });
            }

            info!(%run_id, step = %current, step_number = step_count, "Executing step");
            let result = match self.executor.execute(definition, &context).await {
                Ok(result) => result,
                Err(StepError::ProtocolViolation {
                    step,
                    source,
                    calls,
                }) => {
                    error!(
                        %run_id,
                        step = %step,
                        error = %source,
                        step_calls = calls.len(),
                        "Aborting workflow on protocol violation"
                    );
                    let aborted = StepExecutionResult::failed(&step, source.to_string(), calls);
                    context = context.merge(&aborted);
                    steps.push(aborted);
                    return Err(WorkflowError::ProtocolViolation {
                        step,
                        source,
                        partial: partial(steps, context),
                    });
                }
            };

            if result.routing_fallback {
                warn!(%run_id, step = %current, "Step ended without a routing directive");
            }

            context = context.merge(&result);
            previous = std::mem::replace(&mut current, result.next_step.clone());
            steps.push(result);
        }

        let summary = OrchestrationResult::from_steps(run_id, started_at, steps, context);

        info!(
            %run_id,
            final_step = %summary.final_step,
            total_steps = summary.total_steps,
            completed = summary.completed,
            degraded = summary.degraded,
            function_calls = summary.context.function_calls.len(),
            "Workflow finished"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionRequest, CompletionResponse, FinishReason};
    use crate::workflow::instructions::StaticInstructions;
    use crate::workflow::registry::StepDefinition;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Replies based on the step named in the user message, recording each input.
    struct RoutingLlm {
        replies: HashMap<&'static str, &'static str>,
        inputs: Mutex<Vec<String>>,
    }

    impl RoutingLlm {
        fn new(replies: &[(&'static str, &'static str)]) -> Arc<Self> {
            Arc::new(Self {
                replies: replies.iter().copied().collect(),
                inputs: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for RoutingLlm {
        fn model_name(&self) -> &str {
            "routing-mock"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let input = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let step = input
                .lines()
                .next()
                .and_then(|l| l.strip_prefix("Step: "))
                .unwrap_or_default()
                .to_string();
            self.inputs.lock().unwrap().push(input);
            Ok(CompletionResponse {
                content: self.replies.get(step.as_str()).copied().unwrap_or("").to_string(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn orchestrator(llm: Arc<RoutingLlm>, steps: &[&str]) -> StepOrchestrator {
        let mut instructions = StaticInstructions::new();
        let mut registry = StepRegistry::new();
        for step in steps {
            instructions = instructions.with_step(*step, format!("Instructions for {step}"));
            registry.register(StepDefinition::new(*step));
        }
        let executor = StepExecutor::new(llm, Arc::new(instructions), FunctionDispatcher::new());
        StepOrchestrator::new(executor, registry)
    }

    fn email() -> InboundEmail {
        InboundEmail::new("m-1", "jane@example.com", "Blender broke", "Serial SN12345")
    }

    #[tokio::test]
    async fn follows_routing_to_done() {
        let llm = RoutingLlm::new(&[
            ("01-extract-serial", "SERIAL: SN12345\nNEXT_STEP: 02-check-warranty"),
            ("02-check-warranty", "WARRANTY ok\nNEXT_STEP: 03a-valid-warranty"),
            ("03a-valid-warranty", "All good.\nNEXT_STEP: DONE"),
        ]);
        let orch = orchestrator(
            llm.clone(),
            &["01-extract-serial", "02-check-warranty", "03a-valid-warranty"],
        );

        let result = orch.orchestrate(&email(), "01-extract-serial").await.unwrap();

        assert_eq!(result.steps.len(), 3);
        assert_eq!(result.total_steps, 3);
        assert_eq!(result.final_step, "03a-valid-warranty");
        assert!(result.completed);
        assert!(!result.degraded);
        assert_eq!(result.context.serial_number.as_deref(), Some("SN12345"));

        // Step 2 saw the serial merged from step 1.
        let inputs = llm.inputs.lock().unwrap();
        assert!(inputs[1].contains("Serial number: SN12345"));
        assert!(!inputs[0].contains("Serial number:"));
    }

    #[tokio::test]
    async fn self_loop_trips_circuit_breaker() {
        let llm = RoutingLlm::new(&[("loop", "NEXT_STEP: loop")]);
        let orch = orchestrator(llm.clone(), &["loop"]).with_max_steps(4);

        let err = orch.orchestrate(&email(), "loop").await.unwrap_err();

        assert_eq!(err.code(), "CIRCUIT_BREAKER");
        assert_eq!(llm.inputs.lock().unwrap().len(), 4);

        let partial = err.into_partial();
        assert_eq!(partial.total_steps, 4);
        assert_eq!(partial.final_step, "loop");
        assert!(!partial.completed);
        assert!(partial.degraded);
    }

    #[tokio::test]
    async fn unknown_routed_step_is_error() {
        let llm = RoutingLlm::new(&[("01-extract-serial", "NEXT_STEP: 07-imaginary")]);
        let orch = orchestrator(llm, &["01-extract-serial"]);

        let err = orch.orchestrate(&email(), "01-extract-serial").await.unwrap_err();
        match err {
            WorkflowError::UnknownStep {
                step,
                from,
                partial,
            } => {
                assert_eq!(step, "07-imaginary");
                assert_eq!(from, "01-extract-serial");
                assert_eq!(partial.steps.len(), 1);
                assert_eq!(partial.steps[0].next_step, "07-imaginary");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unknown_initial_step_is_error() {
        let orch = orchestrator(RoutingLlm::new(&[]), &["01-extract-serial"]);
        let err = orch.orchestrate(&email(), "00-missing").await.unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_STEP");
        assert_eq!(err.partial().total_steps, 0);
        assert_eq!(err.partial().context.from_address, "jane@example.com");
    }

    #[tokio::test]
    async fn missing_directive_terminates_degraded() {
        let llm = RoutingLlm::new(&[("01-extract-serial", "I am not sure what to do.")]);
        let orch = orchestrator(llm, &["01-extract-serial"]);

        let result = orch.orchestrate(&email(), "01-extract-serial").await.unwrap();

        assert_eq!(result.total_steps, 1);
        assert!(result.completed);
        assert!(result.degraded);
        assert!(result.steps[0].routing_fallback);
    }

    #[tokio::test]
    async fn initial_done_runs_nothing() {
        let orch = orchestrator(RoutingLlm::new(&[]), &["01-extract-serial"]);
        let result = orch.orchestrate(&email(), "DONE").await.unwrap();
        assert_eq!(result.total_steps, 0);
        assert!(result.completed);
        assert!(result.final_step.is_empty());
    }

    #[tokio::test]
    async fn from_config_applies_bounds() {
        let llm = RoutingLlm::new(&[("loop", "NEXT_STEP: loop")]);
        let config = OrchestratorConfig::default().with_max_steps(2);
        let orch = StepOrchestrator::from_config(
            &config,
            llm.clone(),
            Arc::new(StaticInstructions::new().with_step("loop", "again")),
            FunctionDispatcher::new(),
            StepRegistry::new().with_step(StepDefinition::new("loop")),
        );

        assert!(orch.registry().contains("loop"));
        let err = orch.orchestrate(&email(), "loop").await.unwrap_err();
        assert!(matches!(err, WorkflowError::CircuitBreaker { max_steps: 2, .. }));
        assert_eq!(llm.inputs.lock().unwrap().len(), 2);
    }
}
