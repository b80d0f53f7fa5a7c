//! Function calling: the supported function set, the dispatcher that runs
//! calls against tool collaborators, and the multi-turn conversation loop.

pub mod calling_loop;
pub mod dispatcher;
pub mod services;
pub mod types;

pub use calling_loop::{FunctionCallingLoop, FunctionCallingResult, LoopOutcome};
pub use dispatcher::FunctionDispatcher;
pub use services::{EmailSender, TicketService, WarrantyService, WarrantyStatus};
pub use types::{FunctionCall, FunctionName, FunctionRequest, email_sent};
