//! API Module
//!
//! REST surface through which the orchestrator requests volume
//! provisioning and deletion.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
