//! Collaborator seams injected into the channel runtime.
//!
//! The channel does not define wire bytes: a [`Transport`] hands it already
//! decoded [`SessionEvent`]s and accepts them for sending. The two oracles
//! ([`SessionValidity`], [`NetworkState`]) are read-only, externally owned,
//! and may be shared across channel instances.

use async_trait::async_trait;
use channel_core::{ChannelError, SessionEvent};
use tokio::sync::{mpsc, watch};

/// One established connection over the underlying transport.
#[async_trait]
pub trait TransportConnection: Send {
    /// Send one event to the peer.
    async fn send(&mut self, event: SessionEvent) -> Result<(), ChannelError>;

    /// Receive the next inbound event.
    ///
    /// `None` means the peer closed the connection cleanly.
    async fn recv(&mut self) -> Option<Result<SessionEvent, ChannelError>>;

    /// Close the connection.
    async fn close(&mut self);
}

/// Connection factory; the channel reopens through this seam on every retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh connection.
    async fn open(&self) -> Result<Box<dyn TransportConnection>, ChannelError>;
}

/// Session-expiry oracle.
///
/// The reconnect policy treats an expired session as a terminal stop
/// condition, even mid-backoff, which is why a watch signal accompanies the
/// polled flag.
pub trait SessionValidity: Send + Sync {
    /// Current expiry status.
    fn expired(&self) -> bool;

    /// Watch signal that flips to `true` once the session expires.
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Network-reachability oracle.
pub trait NetworkState: Send + Sync {
    /// Whether the network is currently considered reachable.
    fn online(&self) -> bool;

    /// Watch signal tracking reachability changes.
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Watch-backed [`SessionValidity`] implementation.
#[derive(Debug)]
pub struct SessionExpiryFlag {
    expired: watch::Sender<bool>,
}

impl SessionExpiryFlag {
    /// Create an oracle reporting a valid session.
    pub fn new() -> Self {
        let (expired, _) = watch::channel(false);
        Self { expired }
    }

    /// Mark the session as expired. Irreversible.
    pub fn expire(&self) {
        self.expired.send_replace(true);
    }
}

impl Default for SessionExpiryFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionValidity for SessionExpiryFlag {
    fn expired(&self) -> bool {
        *self.expired.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.expired.subscribe()
    }
}

/// Watch-backed [`NetworkState`] implementation.
#[derive(Debug)]
pub struct NetworkStateFlag {
    online: watch::Sender<bool>,
}

impl NetworkStateFlag {
    /// Create an oracle reporting a reachable network.
    pub fn new() -> Self {
        let (online, _) = watch::channel(true);
        Self { online }
    }

    /// Update the reachability flag.
    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }
}

impl Default for NetworkStateFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkState for NetworkStateFlag {
    fn online(&self) -> bool {
        *self.online.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

/// In-memory transport whose peer side is fully scriptable.
///
/// Every `open` call surfaces a fresh [`LoopbackPeer`] on the paired
/// [`LoopbackEndpoint`]; the peer observes what the channel sends and injects
/// inbound events, failures, or a hang-up. Used by the smoke binary and by
/// runtime tests.
pub struct LoopbackTransport {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
}

impl LoopbackTransport {
    /// Create a transport and the endpoint accepting its connections.
    pub fn new() -> (Self, LoopbackEndpoint) {
        let (peers, accept) = mpsc::unbounded_channel();
        (Self { peers }, LoopbackEndpoint { accept })
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self) -> Result<Box<dyn TransportConnection>, ChannelError> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        self.peers
            .send(LoopbackPeer {
                sent: outbound_rx,
                inject: inbound_tx,
            })
            .map_err(|_| ChannelError::transport("loopback endpoint dropped"))?;

        Ok(Box::new(LoopbackConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        }))
    }
}

/// Accepting side of a [`LoopbackTransport`].
pub struct LoopbackEndpoint {
    accept: mpsc::UnboundedReceiver<LoopbackPeer>,
}

impl LoopbackEndpoint {
    /// Wait for the next connection opened by the channel.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.accept.recv().await
    }
}

/// Peer side of one loopback connection.
pub struct LoopbackPeer {
    sent: mpsc::UnboundedReceiver<SessionEvent>,
    inject: mpsc::UnboundedSender<Result<SessionEvent, ChannelError>>,
}

impl LoopbackPeer {
    /// Next event the channel sent over this connection.
    pub async fn sent(&mut self) -> Option<SessionEvent> {
        self.sent.recv().await
    }

    /// Inject an inbound event towards the channel.
    pub fn push(&self, event: SessionEvent) {
        let _ = self.inject.send(Ok(event));
    }

    /// Inject a transport failure towards the channel.
    pub fn fail(&self, error: ChannelError) {
        let _ = self.inject.send(Err(error));
    }
}

struct LoopbackConnection {
    outbound: mpsc::UnboundedSender<SessionEvent>,
    inbound: mpsc::UnboundedReceiver<Result<SessionEvent, ChannelError>>,
}

#[async_trait]
impl TransportConnection for LoopbackConnection {
    async fn send(&mut self, event: SessionEvent) -> Result<(), ChannelError> {
        self.outbound
            .send(event)
            .map_err(|_| ChannelError::transport("loopback peer hung up"))
    }

    async fn recv(&mut self) -> Option<Result<SessionEvent, ChannelError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

#[cfg(test)]
mod tests {
    use channel_core::SessionEventId;

    use super::*;

    #[tokio::test]
    async fn loopback_roundtrips_both_directions() {
        let (transport, mut endpoint) = LoopbackTransport::new();
        let mut conn = transport.open().await.expect("open should work");
        let mut peer = endpoint.accept().await.expect("peer should surface");

        conn.send(SessionEvent::new("ping"))
            .await
            .expect("send should work");
        let observed = peer.sent().await.expect("peer should observe the send");
        assert_eq!(observed.id, SessionEventId::new("ping"));

        peer.push(SessionEvent::new("pong"));
        let inbound = conn
            .recv()
            .await
            .expect("stream should stay open")
            .expect("event should be ok");
        assert_eq!(inbound.id, SessionEventId::new("pong"));
    }

    #[tokio::test]
    async fn hang_up_closes_the_inbound_stream() {
        let (transport, mut endpoint) = LoopbackTransport::new();
        let mut conn = transport.open().await.expect("open should work");
        let peer = endpoint.accept().await.expect("peer should surface");

        drop(peer);
        assert!(conn.recv().await.is_none());
        assert!(conn.send(SessionEvent::new("late")).await.is_err());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let (transport, mut endpoint) = LoopbackTransport::new();
        let mut conn = transport.open().await.expect("open should work");
        let peer = endpoint.accept().await.expect("peer should surface");

        peer.fail(ChannelError::transport("socket reset"));
        let received = conn.recv().await.expect("stream should yield the error");
        assert_eq!(received, Err(ChannelError::transport("socket reset")));
    }

    #[tokio::test]
    async fn expiry_flag_flips_watchers() {
        let oracle = SessionExpiryFlag::new();
        let mut watch = SessionValidity::watch(&oracle);
        assert!(!oracle.expired());

        oracle.expire();
        assert!(oracle.expired());
        watch
            .wait_for(|expired| *expired)
            .await
            .expect("watch should observe expiry");
    }

    #[test]
    fn network_flag_tracks_reachability() {
        let oracle = NetworkStateFlag::new();
        assert!(oracle.online());
        oracle.set_online(false);
        assert!(!oracle.online());
    }
}
