use std::sync::Arc;

use channel_core::SessionEvent;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::activation::ActivationGate;

/// Serializes outbound events through the pause and activation gates.
///
/// A single worker drains `emit` submissions one at a time: each event is
/// held while the channel is paused, then held until the activation gate
/// resolves, then forwarded to the connection writer. FIFO order is preserved
/// across all three stages. Events still queued when the channel dies are
/// dropped; there is no dead-letter queue.
pub(crate) struct DispatchWorker {
    pub(crate) emit_rx: mpsc::UnboundedReceiver<SessionEvent>,
    pub(crate) outbound_tx: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) paused_rx: watch::Receiver<bool>,
    pub(crate) gate: Arc<ActivationGate>,
    pub(crate) shutdown: CancellationToken,
}

impl DispatchWorker {
    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.emit_rx.recv() => match received {
                    Some(event) => event,
                    None => break,
                },
            };

            // Hold while paused; resuming keeps original order.
            let unpaused = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                changed = self.paused_rx.wait_for(|paused| !paused) => changed.is_ok(),
            };
            if !unpaused {
                break;
            }

            // Hold until the handshake resolves; a cached failure rejects
            // the event.
            let activated = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                outcome = self.gate.activate() => outcome,
            };
            if let Err(error) = activated {
                debug!(id = %event.id, error = %error, "dropping outbound event after failed activation");
                continue;
            }

            if self.outbound_tx.send(event).is_err() {
                break;
            }
        }
        trace!("outbound dispatch worker exiting");
    }
}
