//! The closed set of functions a step may ask the model to call.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::llm::ToolDefinition;

/// Functions the dispatcher knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionName {
    CheckWarranty,
    CreateTicket,
    SendEmail,
}

impl FunctionName {
    pub const ALL: [FunctionName; 3] = [Self::CheckWarranty, Self::CreateTicket, Self::SendEmail];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckWarranty => "check_warranty",
            Self::CreateTicket => "create_ticket",
            Self::SendEmail => "send_email",
        }
    }

    /// Declaration offered to the model. Argument names here are the ones the
    /// dispatcher reads back, so keep the two in step.
    pub fn definition(&self) -> ToolDefinition {
        let (description, parameters) = match self {
            Self::CheckWarranty => (
                "Look up the warranty status for a product serial number.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "serial_number": {
                            "type": "string",
                            "description": "Product serial number as written by the customer"
                        }
                    },
                    "required": ["serial_number"]
                }),
            ),
            Self::CreateTicket => (
                "Create a support ticket in the CRM for this customer issue.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "subject": {
                            "type": "string",
                            "description": "Short ticket title"
                        },
                        "description": {
                            "type": "string",
                            "description": "Full description of the customer's issue"
                        },
                        "customer_email": {
                            "type": "string",
                            "description": "Customer email address"
                        },
                        "priority": {
                            "type": "string",
                            "enum": ["low", "normal", "high", "urgent"],
                            "description": "Ticket priority (default: normal)"
                        }
                    },
                    "required": ["subject", "description"]
                }),
            ),
            Self::SendEmail => (
                "Send an email reply to the customer.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "to": {
                            "type": "string",
                            "description": "Recipient email address"
                        },
                        "subject": {
                            "type": "string",
                            "description": "Email subject line"
                        },
                        "body": {
                            "type": "string",
                            "description": "Plain-text email body"
                        },
                        "thread_id": {
                            "type": "string",
                            "description": "Thread to reply in, if replying"
                        }
                    },
                    "required": ["to", "subject", "body"]
                }),
            ),
        };

        ToolDefinition {
            name: self.as_str().to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunctionName {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "check_warranty" => Ok(Self::CheckWarranty),
            "create_ticket" => Ok(Self::CreateTicket),
            "send_email" => Ok(Self::SendEmail),
            other => Err(DispatchError::UnknownFunction {
                name: other.to_string(),
            }),
        }
    }
}

// ── Typed arguments ─────────────────────────────────────────────────

/// A bad argument in a model-supplied call. Recorded on the call, never raised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    #[error("missing required argument '{0}'")]
    Missing(&'static str),

    #[error("argument '{field}' {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckWarrantyArgs {
    pub serial_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl FromStr for TicketPriority {
    type Err = ArgumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" | "medium" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(ArgumentError::Invalid {
                field: "priority",
                message: format!("has unsupported value '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTicketArgs {
    pub subject: String,
    pub description: String,
    pub customer_email: Option<String>,
    pub priority: Option<TicketPriority>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEmailArgs {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
}

/// A validated request for one of the known functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionRequest {
    CheckWarranty(CheckWarrantyArgs),
    CreateTicket(CreateTicketArgs),
    SendEmail(SendEmailArgs),
}

impl FunctionRequest {
    /// Build the typed request for `name` from the model's JSON arguments.
    pub fn from_arguments(
        name: FunctionName,
        args: &serde_json::Value,
    ) -> Result<Self, ArgumentError> {
        match name {
            FunctionName::CheckWarranty => Ok(Self::CheckWarranty(CheckWarrantyArgs {
                serial_number: require_str(args, "serial_number")?,
            })),
            FunctionName::CreateTicket => Ok(Self::CreateTicket(CreateTicketArgs {
                subject: require_str(args, "subject")?,
                description: require_str(args, "description")?,
                customer_email: optional_str(args, "customer_email")?,
                priority: optional_str(args, "priority")?
                    .map(|p| p.parse())
                    .transpose()?,
            })),
            FunctionName::SendEmail => Ok(Self::SendEmail(SendEmailArgs {
                to: require_str(args, "to")?,
                subject: require_str(args, "subject")?,
                body: require_str(args, "body")?,
                thread_id: optional_str(args, "thread_id")?,
            })),
        }
    }
}

/// Required non-blank string argument.
fn require_str(args: &serde_json::Value, field: &'static str) -> Result<String, ArgumentError> {
    optional_str(args, field)?.ok_or(ArgumentError::Missing(field))
}

/// Optional string argument; blank counts as absent.
fn optional_str(
    args: &serde_json::Value,
    field: &'static str,
) -> Result<Option<String>, ArgumentError> {
    match args.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.trim().to_string())),
        // Models sometimes send numeric serials unquoted.
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(ArgumentError::Invalid {
            field,
            message: format!("must be a string, got {other}"),
        }),
    }
}

// ── Call record ─────────────────────────────────────────────────────

/// Audit record of one dispatched function call, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: FunctionName,
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl FunctionCall {
    /// Payload sent back to the model as the function's result.
    pub fn response_payload(&self) -> serde_json::Value {
        if self.success {
            serde_json::json!({
                "success": true,
                "result": self.result.clone().unwrap_or(serde_json::Value::Null),
            })
        } else {
            serde_json::json!({
                "success": false,
                "error": self.error_message.clone().unwrap_or_default(),
            })
        }
    }

    pub fn is_successful(&self, name: FunctionName) -> bool {
        self.name == name && self.success
    }
}

/// True iff some call is a successful `send_email`.
pub fn email_sent(calls: &[FunctionCall]) -> bool {
    calls.iter().any(|c| c.is_successful(FunctionName::SendEmail))
}
