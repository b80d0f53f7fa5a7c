//! Step registry: the set of steps the model is allowed to route to.

use std::collections::HashMap;

use crate::error::UnknownStepError;
use crate::functions::types::FunctionName;
use crate::llm::ToolDefinition;
use crate::workflow::types::{StepTarget, TERMINAL_STEP};

/// A known step and the functions it may call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDefinition {
    pub name: String,
    pub functions: Vec<FunctionName>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_functions(mut self, functions: impl IntoIterator<Item = FunctionName>) -> Self {
        for function in functions {
            if !self.functions.contains(&function) {
                self.functions.push(function);
            }
        }
        self
    }

    pub fn uses_functions(&self) -> bool {
        !self.functions.is_empty()
    }

    /// Declarations offered to the model during this step.
    pub fn function_declarations(&self) -> Vec<ToolDefinition> {
        self.functions.iter().map(|f| f.definition()).collect()
    }
}

/// Registry of known steps.
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, StepDefinition>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step, replacing any previous definition with the same name.
    ///
    /// The terminal sentinel is never registrable.
    pub fn register(&mut self, step: StepDefinition) {
        if step.name.eq_ignore_ascii_case(TERMINAL_STEP) {
            tracing::warn!("Ignoring registration of reserved step name {}", step.name);
            return;
        }
        tracing::debug!(step = %step.name, functions = step.functions.len(), "Registered step");
        self.steps.insert(step.name.clone(), step);
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.register(step);
        self
    }

    pub fn get(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sorted step names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a routed step name. `from` names the step that routed here, for errors.
    pub fn resolve(&self, name: &str, from: &str) -> Result<StepTarget<'_>, UnknownStepError> {
        if name == TERMINAL_STEP {
            return Ok(StepTarget::Terminal);
        }
        self.get(name)
            .map(StepTarget::Step)
            .ok_or_else(|| UnknownStepError {
                step: name.to_string(),
                from: from.to_string(),
            })
    }
}
