//! Core contract shared between the channel runtime and its collaborators.
//!
//! This crate defines the session event model, the retry schedule, the
//! channel lifecycle state machine, and the stable error type. It performs no
//! I/O and spawns no tasks.

/// Stable channel error type and retry classification.
pub mod error;
/// Backoff schedule consumed by the reconnect policy.
pub mod retry;
/// Channel lifecycle state machine.
pub mod state_machine;
/// Session event model (ids, topics, payloads, control events).
pub mod types;

pub use error::ChannelError;
pub use retry::{RetrySchedule, RetryScheduleError};
pub use state_machine::{ChannelLifecycleState, ChannelStateMachine};
pub use types::{SessionEvent, SessionEventId, TopicId};
