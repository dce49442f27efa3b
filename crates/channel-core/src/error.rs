use thiserror::Error;

use crate::state_machine::ChannelLifecycleState;

/// Errors surfaced by channel operations and the transport seam.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Transient transport failure, recovered by the reconnect policy while
    /// retry budget remains.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The activation handshake failed; the cached failure is surfaced to
    /// every pending and future send.
    #[error("activation handshake failed: {0}")]
    ActivationFailed(String),
    /// Retrying was abandoned because the session became invalid or the
    /// channel was disconnected during a backoff wait.
    #[error("reconnect abandoned: {0}")]
    RetriesAbandoned(String),
    /// The session-validity oracle reported the session as expired.
    #[error("session expired")]
    SessionExpired,
    /// The channel was closed or is dead; nothing is delivered anymore.
    #[error("channel is closed")]
    Closed,
    /// A lifecycle transition was requested from an incompatible state.
    #[error("cannot run '{action}' while channel is in state {state:?}")]
    InvalidTransition {
        /// State the channel was in when the transition was requested.
        state: ChannelLifecycleState,
        /// Short name of the rejected action.
        action: String,
    },
}

impl ChannelError {
    /// Build a transient transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Build a cached activation failure.
    pub fn activation_failed(message: impl Into<String>) -> Self {
        Self::ActivationFailed(message.into())
    }

    /// Whether the reconnect policy may recover from this error locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
