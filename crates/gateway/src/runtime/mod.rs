//! Turn execution across runtimes.
//!
//! [`relay`] runs agent turns on the owner runtime and streams their output;
//! [`cross_loop`] moves work and results between the owner runtime and
//! transport-owned [`ForeignLoop`]s.

pub mod cross_loop;
pub mod relay;

pub use cross_loop::{CrossLoopExecutor, ForeignLoop, OwnerTask};
pub use relay::TurnStream;
