use std::{sync::Arc, time::Duration};

use channel_core::ChannelError;
use tokio::{
    sync::{broadcast, mpsc},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Debounced notification describing a burst of transport failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    /// Last error observed in the burst.
    pub error: ChannelError,
    /// Number of errors collapsed into this notification.
    pub burst: u32,
}

/// Centralizes transport errors and rate-limits log output.
///
/// Every reported error feeds a debounce worker: errors arriving within one
/// quiet window of each other collapse into a single warning and a single
/// observable [`TransportFailure`], so one reconnect storm produces one log
/// line instead of N.
pub struct ErrorFunnel {
    report: mpsc::UnboundedSender<ChannelError>,
    notify: broadcast::Sender<TransportFailure>,
}

impl ErrorFunnel {
    /// Spawn the debounce worker with the given quiet window.
    pub fn spawn(window: Duration, shutdown: CancellationToken) -> Arc<Self> {
        let (report, reports) = mpsc::unbounded_channel();
        let (notify, _) = broadcast::channel(16);
        tokio::spawn(debounce(reports, notify.clone(), window, shutdown));
        Arc::new(Self { report, notify })
    }

    /// Report a transport error into the funnel.
    pub fn report(&self, error: ChannelError) {
        let _ = self.report.send(error);
    }

    /// Subscribe to debounced failure notifications.
    pub fn notifications(&self) -> broadcast::Receiver<TransportFailure> {
        self.notify.subscribe()
    }
}

async fn debounce(
    mut reports: mpsc::UnboundedReceiver<ChannelError>,
    notify: broadcast::Sender<TransportFailure>,
    window: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = shutdown.cancelled() => return,
            received = reports.recv() => match received {
                Some(error) => error,
                None => return,
            },
        };

        let mut last = first;
        let mut burst: u32 = 1;
        loop {
            match timeout(window, reports.recv()).await {
                Ok(Some(error)) => {
                    last = error;
                    burst = burst.saturating_add(1);
                }
                // Reporters are gone or the window stayed quiet: flush.
                Ok(None) | Err(_) => break,
            }
        }

        warn!(error = %last, burst, "transport error");
        let _ = notify.send(TransportFailure { error: last, burst });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn collapses_error_burst_into_one_notification() {
        let funnel = ErrorFunnel::spawn(Duration::from_secs(1), CancellationToken::new());
        let mut notifications = funnel.notifications();

        for n in 0..5 {
            funnel.report(ChannelError::transport(format!("reset {n}")));
        }

        let failure = notifications
            .recv()
            .await
            .expect("burst should produce one notification");
        assert_eq!(failure.burst, 5);
        assert_eq!(failure.error, ChannelError::transport("reset 4"));

        // A later, separate error starts a new burst.
        funnel.report(ChannelError::transport("late"));
        let failure = notifications
            .recv()
            .await
            .expect("new burst should notify again");
        assert_eq!(failure.burst, 1);
        assert_eq!(failure.error, ChannelError::transport("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn separated_errors_notify_individually() {
        let funnel = ErrorFunnel::spawn(Duration::from_millis(100), CancellationToken::new());
        let mut notifications = funnel.notifications();

        funnel.report(ChannelError::transport("first"));
        let first = notifications.recv().await.expect("first notification");
        assert_eq!(first.burst, 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        funnel.report(ChannelError::transport("second"));
        let second = notifications.recv().await.expect("second notification");
        assert_eq!(second.burst, 1);
        assert_eq!(second.error, ChannelError::transport("second"));
    }
}
