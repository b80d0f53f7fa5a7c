//! Tool collaborators the dispatcher executes against.
//!
//! Implementations are treated as stateless request/response services. Any
//! connection pooling or retry is theirs to manage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::functions::types::{CreateTicketArgs, SendEmailArgs};

/// Warranty lookup result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarrantyStatus {
    /// e.g. "valid", "expired", "not_found".
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Vendor-specific extras, passed through to the model untouched.
    #[serde(default, flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl WarrantyStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            expiration_date: None,
            product: None,
            details: serde_json::Map::new(),
        }
    }
}

#[async_trait]
pub trait WarrantyService: Send + Sync {
    async fn check_warranty(&self, serial_number: &str) -> Result<WarrantyStatus, ServiceError>;
}

#[async_trait]
pub trait TicketService: Send + Sync {
    /// Create a ticket and return its id. Not idempotent.
    async fn create_ticket(&self, ticket: &CreateTicketArgs) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send an email and return the provider message id. Not idempotent.
    async fn send_email(&self, email: &SendEmailArgs) -> Result<String, ServiceError>;
}
