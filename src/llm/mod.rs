//! LLM integration.
//!
//! The engine only talks to models through the `LlmProvider` trait. Vendor
//! clients (and their timeouts and retries) live with the host application.

pub mod provider;

pub use provider::*;
