//! Shared domain types for the session bridge: the agent-core contract,
//! stream tokens, errors, trace events and configuration.

pub mod agent;
pub mod config;
pub mod error;
pub mod stream;
pub mod trace;
