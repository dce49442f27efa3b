use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// High-level channel lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelLifecycleState {
    /// Constructed, no send or subscriber has created demand yet.
    Idle,
    /// Activation handshake is in flight.
    Activating,
    /// Handshake complete, sends flow to the transport.
    Open,
    /// Explicit disconnect requested; sends queue but do not flow.
    Paused,
    /// Inbound stream failed, a backoff wait is in progress.
    Retrying,
    /// Retries abandoned or session invalid; no recovery without
    /// reconstructing the channel.
    Dead,
}

/// Validates lifecycle transitions for one channel instance.
///
/// `Dead` is absorbing; every transition out of it is rejected.
#[derive(Debug, Clone)]
pub struct ChannelStateMachine {
    state: ChannelLifecycleState,
}

impl Default for ChannelStateMachine {
    fn default() -> Self {
        Self {
            state: ChannelLifecycleState::Idle,
        }
    }
}

impl ChannelStateMachine {
    /// Current lifecycle state.
    pub fn state(&self) -> ChannelLifecycleState {
        self.state
    }

    /// First send or subscriber arrived; the handshake starts.
    pub fn begin_activation(&mut self) -> Result<ChannelLifecycleState, ChannelError> {
        self.transition_from(
            &[ChannelLifecycleState::Idle],
            ChannelLifecycleState::Activating,
            "begin_activation",
        )
    }

    /// Activation handshake resolved successfully.
    pub fn activation_complete(&mut self) -> Result<ChannelLifecycleState, ChannelError> {
        self.transition_from(
            &[ChannelLifecycleState::Activating],
            ChannelLifecycleState::Open,
            "activation_complete",
        )
    }

    /// Explicit disconnect requested while sends were flowing.
    pub fn pause(&mut self) -> Result<ChannelLifecycleState, ChannelError> {
        self.transition_from(
            &[ChannelLifecycleState::Open],
            ChannelLifecycleState::Paused,
            "pause",
        )
    }

    /// Explicit reconnect requested after a pause.
    pub fn resume(&mut self) -> Result<ChannelLifecycleState, ChannelError> {
        self.transition_from(
            &[ChannelLifecycleState::Paused],
            ChannelLifecycleState::Open,
            "resume",
        )
    }

    /// The transport stream failed and a backoff wait begins.
    pub fn connection_lost(&mut self) -> Result<ChannelLifecycleState, ChannelError> {
        self.transition_from(
            &[ChannelLifecycleState::Open],
            ChannelLifecycleState::Retrying,
            "connection_lost",
        )
    }

    /// A reconnect attempt succeeded.
    pub fn reconnected(&mut self) -> Result<ChannelLifecycleState, ChannelError> {
        self.transition_from(
            &[ChannelLifecycleState::Retrying],
            ChannelLifecycleState::Open,
            "reconnected",
        )
    }

    /// Terminal stop: retries abandoned, session invalid, or channel closed.
    pub fn kill(&mut self) -> ChannelLifecycleState {
        self.state = ChannelLifecycleState::Dead;
        self.state
    }

    fn transition_from(
        &mut self,
        expected: &[ChannelLifecycleState],
        next: ChannelLifecycleState,
        action: &str,
    ) -> Result<ChannelLifecycleState, ChannelError> {
        if !expected.contains(&self.state) {
            return Err(ChannelError::InvalidTransition {
                state: self.state,
                action: action.to_owned(),
            });
        }
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_happy_path_lifecycle() {
        let mut sm = ChannelStateMachine::default();
        assert_eq!(sm.state(), ChannelLifecycleState::Idle);

        sm.begin_activation().expect("idle channel can activate");
        assert_eq!(sm.state(), ChannelLifecycleState::Activating);

        sm.activation_complete().expect("handshake completes");
        assert_eq!(sm.state(), ChannelLifecycleState::Open);

        sm.pause().expect("open channel can pause");
        sm.resume().expect("paused channel can resume");
        assert_eq!(sm.state(), ChannelLifecycleState::Open);

        sm.connection_lost().expect("open channel can lose transport");
        assert_eq!(sm.state(), ChannelLifecycleState::Retrying);

        sm.reconnected().expect("retrying channel can recover");
        assert_eq!(sm.state(), ChannelLifecycleState::Open);
    }

    #[test]
    fn rejects_activation_twice() {
        let mut sm = ChannelStateMachine::default();
        sm.begin_activation().expect("first activation starts");

        let err = sm
            .begin_activation()
            .expect_err("activation must not restart");
        assert_eq!(
            err,
            ChannelError::InvalidTransition {
                state: ChannelLifecycleState::Activating,
                action: "begin_activation".to_owned(),
            }
        );
    }

    #[test]
    fn rejects_resume_without_pause() {
        let mut sm = ChannelStateMachine::default();
        sm.begin_activation().expect("activation starts");
        sm.activation_complete().expect("handshake completes");

        let err = sm.resume().expect_err("resume requires a pause first");
        assert!(matches!(err, ChannelError::InvalidTransition { .. }));
    }

    #[test]
    fn dead_is_absorbing() {
        let mut sm = ChannelStateMachine::default();
        sm.begin_activation().expect("activation starts");
        assert_eq!(sm.kill(), ChannelLifecycleState::Dead);

        assert!(sm.begin_activation().is_err());
        assert!(sm.activation_complete().is_err());
        assert!(sm.pause().is_err());
        assert!(sm.reconnected().is_err());
        assert_eq!(sm.state(), ChannelLifecycleState::Dead);
    }
}
