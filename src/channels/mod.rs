//! Execution channels: the only way work reaches a worker.

pub mod channel;
pub mod local;

pub use channel::*;
pub use local::{LocalChannel, LocalChannelFactory};
