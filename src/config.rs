//! Configuration types.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Default circuit-breaker bound on steps per email.
pub const DEFAULT_MAX_STEPS: usize = 10;

/// Default bound on model turns inside one step's function-calling loop.
pub const DEFAULT_MAX_FUNCTION_ITERATIONS: usize = 10;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of steps executed for one email before the circuit breaker trips.
    pub max_steps: usize,
    /// Maximum model turns per function-calling conversation.
    pub max_function_iterations: usize,
    /// Directory holding `<step>.md` instruction files.
    pub instructions_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_function_iterations: DEFAULT_MAX_FUNCTION_ITERATIONS,
            instructions_dir: PathBuf::from("./instructions"),
        }
    }
}

impl OrchestratorConfig {
    /// Build config from `SUPPORT_FLOW_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_steps = read_bound("SUPPORT_FLOW_MAX_STEPS", defaults.max_steps)?;
        let max_function_iterations = read_bound(
            "SUPPORT_FLOW_MAX_FUNCTION_ITERATIONS",
            defaults.max_function_iterations,
        )?;
        let instructions_dir = std::env::var("SUPPORT_FLOW_INSTRUCTIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.instructions_dir);

        Ok(Self {
            max_steps,
            max_function_iterations,
            instructions_dir,
        })
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_function_iterations(mut self, max: usize) -> Self {
        self.max_function_iterations = max;
        self
    }

    pub fn with_instructions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.instructions_dir = dir.into();
        self
    }
}

fn read_bound(key: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => parse_bound(key, &raw),
        Err(_) => Ok(default),
    }
}

/// Parse a positive step/turn bound.
fn parse_bound(key: &str, raw: &str) -> Result<usize, ConfigError> {
    let value: usize = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}' is not a number: {e}"),
    })?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}
