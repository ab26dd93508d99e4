pub mod bootstrap;
pub mod bridge;
pub mod cli;
pub mod echo;
pub mod runtime;

pub use bridge::{BridgeClient, SessionBridge};
