//! # relay-task
//!
//! Command execution and task orchestration for Relay.
//!
//! ## Features
//!
//! - `bridge`: spawns the command-execution CLI and streams its output
//! - `orchestrator`: task lifecycle with a concurrency bound and FIFO queue
//! - `engine`: one handle owning the supervisor, bridge and orchestrator
//!
//! Task state changes are published as [`TaskEvent`]s. Use
//! [`TaskOrchestrator::watch`] for lossless delivery, or
//! [`TaskOrchestrator::subscribe`] for a bounded broadcast.

pub mod bridge;
pub mod engine;
pub mod event;
pub mod orchestrator;
pub mod state;
pub mod task;

pub use bridge::{
    BridgeEvent, BridgeEventKind, CommandBridge, CorrelationId, ExecuteOptions, ExecutionResult,
    ProcessExit,
};
pub use engine::Engine;
pub use event::{OutputStream, TaskEvent};
pub use orchestrator::{Execution, ExecutionStatus, OrchestratorStats, TaskOrchestrator};
pub use state::TaskStatus;
pub use task::{Task, TaskId, TaskPriority};
