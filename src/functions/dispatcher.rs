//! Function dispatcher. Executes model-requested calls against tool collaborators.
//!
//! Every known call produces exactly one `FunctionCall` record. Bad arguments,
//! missing collaborators and collaborator failures all become `success = false`
//! records so the conversation can continue. Only an unknown function name is
//! raised, before anything is recorded.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::functions::services::{EmailSender, TicketService, WarrantyService};
use crate::functions::types::{FunctionCall, FunctionName, FunctionRequest};

/// Routes function calls to the injected collaborators.
#[derive(Clone, Default)]
pub struct FunctionDispatcher {
    warranty: Option<Arc<dyn WarrantyService>>,
    tickets: Option<Arc<dyn TicketService>>,
    email: Option<Arc<dyn EmailSender>>,
}

impl FunctionDispatcher {
    /// Dispatcher with no collaborators configured.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_warranty_service(mut self, service: Arc<dyn WarrantyService>) -> Self {
        self.warranty = Some(service);
        self
    }

    pub fn with_ticket_service(mut self, service: Arc<dyn TicketService>) -> Self {
        self.tickets = Some(service);
        self
    }

    pub fn with_email_sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.email = Some(sender);
        self
    }

    /// Whether the collaborator behind `name` is configured.
    pub fn is_available(&self, name: FunctionName) -> bool {
        match name {
            FunctionName::CheckWarranty => self.warranty.is_some(),
            FunctionName::CreateTicket => self.tickets.is_some(),
            FunctionName::SendEmail => self.email.is_some(),
        }
    }

    /// Execute `name` with the model-supplied `arguments`.
    ///
    /// Does not deduplicate: calling twice with the same ticket or email
    /// arguments creates two tickets or sends two emails.
    pub async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<FunctionCall, DispatchError> {
        let function: FunctionName = name.parse()?;

        let start = Instant::now();
        let outcome = match FunctionRequest::from_arguments(function, &arguments) {
            Ok(request) => self.run(request).await,
            Err(e) => Err(e.to_string()),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let call = match outcome {
            Ok(result) => {
                debug!(function = %function, duration_ms, "Function call succeeded");
                FunctionCall {
                    name: function,
                    arguments,
                    result: Some(result),
                    success: true,
                    duration_ms,
                    error_message: None,
                }
            }
            Err(message) => {
                warn!(
                    function = %function,
                    duration_ms,
                    error = %message,
                    "Function call failed"
                );
                FunctionCall {
                    name: function,
                    arguments,
                    result: None,
                    success: false,
                    duration_ms,
                    error_message: Some(message),
                }
            }
        };

        Ok(call)
    }

    async fn run(&self, request: FunctionRequest) -> Result<serde_json::Value, String> {
        match request {
            FunctionRequest::CheckWarranty(args) => {
                let service = self
                    .warranty
                    .as_ref()
                    .ok_or_else(|| not_configured(FunctionName::CheckWarranty))?;
                let status = service
                    .check_warranty(&args.serial_number)
                    .await
                    .map_err(|e| format!("Warranty lookup failed: {e}"))?;
                serde_json::to_value(status)
                    .map_err(|e| format!("Failed to serialize warranty status: {e}"))
            }
            FunctionRequest::CreateTicket(args) => {
                let service = self
                    .tickets
                    .as_ref()
                    .ok_or_else(|| not_configured(FunctionName::CreateTicket))?;
                let ticket_id = service
                    .create_ticket(&args)
                    .await
                    .map_err(|e| format!("Ticket creation failed: {e}"))?;
                Ok(serde_json::json!({ "ticket_id": ticket_id }))
            }
            FunctionRequest::SendEmail(args) => {
                let sender = self
                    .email
                    .as_ref()
                    .ok_or_else(|| not_configured(FunctionName::SendEmail))?;
                let message_id = sender
                    .send_email(&args)
                    .await
                    .map_err(|e| format!("Email send failed: {e}"))?;
                Ok(serde_json::json!({ "message_id": message_id, "to": args.to }))
            }
        }
    }
}

fn not_configured(function: FunctionName) -> String {
    format!("{function} is not available: no backing service configured")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::functions::services::WarrantyStatus;
    use crate::functions::types::{CreateTicketArgs, SendEmailArgs};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct StubWarranty;

    #[async_trait]
    impl WarrantyService for StubWarranty {
        async fn check_warranty(&self, serial: &str) -> Result<WarrantyStatus, ServiceError> {
            if serial == "SN-MISSING" {
                return Err(ServiceError::NotFound {
                    entity: "serial".into(),
                    id: serial.into(),
                });
            }
            let mut status = WarrantyStatus::new("valid");
            status.expiration_date = Some("2027-01-01".into());
            Ok(status)
        }
    }

    #[derive(Default)]
    struct RecordingTickets {
        created: Mutex<Vec<CreateTicketArgs>>,
    }

    #[async_trait]
    impl TicketService for RecordingTickets {
        async fn create_ticket(&self, ticket: &CreateTicketArgs) -> Result<String, ServiceError> {
            let mut created = self.created.lock().unwrap();
            created.push(ticket.clone());
            Ok(format!("TCK-{}", created.len()))
        }
    }

    struct FailingEmail;

    #[async_trait]
    impl EmailSender for FailingEmail {
        async fn send_email(&self, _email: &SendEmailArgs) -> Result<String, ServiceError> {
            Err(ServiceError::Unavailable {
                service: "gmail".into(),
                reason: "connection reset".into(),
            })
        }
    }

    #[tokio::test]
    async fn unknown_function_raises() {
        let dispatcher = FunctionDispatcher::new();
        let err = dispatcher.execute("unknown_fn", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Unknown function: unknown_fn"));
    }

    #[tokio::test]
    async fn missing_argument_is_recorded_failure() {
        let dispatcher = FunctionDispatcher::new().with_warranty_service(Arc::new(StubWarranty));
        let call = dispatcher.execute("check_warranty", json!({})).await.unwrap();
        assert!(!call.success);
        assert!(call.error_message.unwrap().contains("serial_number"));
        assert!(call.result.is_none());
    }

    #[tokio::test]
    async fn check_warranty_success() {
        let dispatcher = FunctionDispatcher::new().with_warranty_service(Arc::new(StubWarranty));
        let call = dispatcher
            .execute("check_warranty", json!({"serial_number": "SN12345"}))
            .await
            .unwrap();
        assert!(call.success);
        assert_eq!(call.name, FunctionName::CheckWarranty);
        let result = call.result.unwrap();
        assert_eq!(result["status"], "valid");
        assert_eq!(result["expiration_date"], "2027-01-01");
    }

    #[tokio::test]
    async fn service_error_becomes_failure_record() {
        let dispatcher = FunctionDispatcher::new().with_warranty_service(Arc::new(StubWarranty));
        let call = dispatcher
            .execute("check_warranty", json!({"serial_number": "SN-MISSING"}))
            .await
            .unwrap();
        assert!(!call.success);
        assert!(call.error_message.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn unconfigured_service_is_failure_record() {
        let dispatcher = FunctionDispatcher::new();
        assert!(!dispatcher.is_available(FunctionName::SendEmail));
        let call = dispatcher
            .execute(
                "send_email",
                json!({"to": "a@b.c", "subject": "Re: help", "body": "Hello"}),
            )
            .await
            .unwrap();
        assert!(!call.success);
        assert!(call.error_message.unwrap().contains("no backing service"));
    }

    #[tokio::test]
    async fn send_email_failure_is_not_raised() {
        let dispatcher = FunctionDispatcher::new().with_email_sender(Arc::new(FailingEmail));
        let call = dispatcher
            .execute(
                "send_email",
                json!({"to": "a@b.c", "subject": "Re: help", "body": "Hello"}),
            )
            .await
            .unwrap();
        assert!(!call.success);
        assert!(call.error_message.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn create_ticket_is_not_deduplicated() {
        let tickets = Arc::new(RecordingTickets::default());
        let dispatcher = FunctionDispatcher::new().with_ticket_service(tickets.clone());
        let args = json!({"subject": "Broken", "description": "Won't turn on"});

        let first = dispatcher.execute("create_ticket", args.clone()).await.unwrap();
        let second = dispatcher.execute("create_ticket", args).await.unwrap();

        assert_eq!(first.result.unwrap()["ticket_id"], "TCK-1");
        assert_eq!(second.result.unwrap()["ticket_id"], "TCK-2");
        assert_eq!(tickets.created.lock().unwrap().len(), 2);
    }
}
