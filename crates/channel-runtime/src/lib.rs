//! Resilient, multiplexed session event channel.
//!
//! [`SessionEventChannel`] presents one logical event stream to the rest of
//! the application while hiding transport churn underneath: a one-time
//! activation handshake gates all traffic, an escalating two-level reconnect
//! policy keeps the stream alive across transport failures, and topic-scoped
//! sub-streams multiplex over the single connection.

pub mod activation;
pub mod channel;
pub mod funnel;
pub mod multiplex;
pub mod router;

mod dispatch;
mod reconnect;

pub use activation::{ActivationGate, ActivationHook, activation_hook};
pub use channel::{ChannelConfig, InitSubscription, SessionEventChannel};
pub use funnel::{ErrorFunnel, TransportFailure};
pub use multiplex::TopicStream;
pub use router::{EventRouter, Subscription};
