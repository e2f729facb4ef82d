//! Progress events for tasksync
//!
//! This crate provides the progress event taxonomy and the sink abstraction
//! the orchestrator reports through.

mod sink;
mod types;

pub use sink::{ChannelSink, NoopSink, ProgressSink, SinkError};
pub use types::*;
