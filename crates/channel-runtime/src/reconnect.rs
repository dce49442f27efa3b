use std::{sync::Arc, time::Duration};

use channel_core::{ChannelError, ChannelLifecycleState, RetrySchedule, SessionEvent};
use channel_transport::{NetworkState, SessionValidity, Transport, TransportConnection};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    activation::ActivationGate,
    channel::{InitHooks, StateHandle},
    funnel::ErrorFunnel,
};

/// Owns the transport connection and drives the two-level reconnect policy.
///
/// Inner layer: bounded retry on an escalating schedule, abandoned terminally
/// when the session expires or the channel is disconnected during a backoff
/// wait. Outer layer: once a burst's budget is spent, one cooldown pause and
/// a fresh burst with the attempt counter reset, forever.
pub(crate) struct ReconnectDriver {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) session: Arc<dyn SessionValidity>,
    pub(crate) network: Arc<dyn NetworkState>,
    pub(crate) gate: Arc<ActivationGate>,
    pub(crate) funnel: Arc<ErrorFunnel>,
    pub(crate) schedule: RetrySchedule,
    pub(crate) outbound_rx: mpsc::UnboundedReceiver<SessionEvent>,
    pub(crate) inbound_tx: broadcast::Sender<SessionEvent>,
    pub(crate) demand_rx: watch::Receiver<bool>,
    pub(crate) paused_rx: watch::Receiver<bool>,
    pub(crate) state: Arc<StateHandle>,
    pub(crate) init_hooks: Arc<InitHooks>,
    pub(crate) shutdown: CancellationToken,
}

enum PumpExit {
    Shutdown,
    Failed(ChannelError),
}

enum BackoffOutcome {
    Continue,
    Terminal,
}

impl ReconnectDriver {
    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        // Nothing happens until the first emit or subscriber creates demand.
        let demanded = tokio::select! {
            _ = self.shutdown.cancelled() => false,
            changed = self.demand_rx.wait_for(|demanded| *demanded) => changed.is_ok(),
        };
        if !demanded {
            return;
        }

        if let Err(error) = self.state.apply(|sm| sm.begin_activation()) {
            debug!(error = %error, "reconnect driver not starting");
            return;
        }

        let activated = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            outcome = self.gate.activate() => outcome,
        };
        if let Err(error) = activated {
            // A failed handshake parks the inbound pipeline without killing
            // the channel; the handshake is not retried here.
            warn!(error = %error, "activation failed; inbound stream not started");
            return;
        }
        let _ = self.state.apply(|sm| sm.activation_complete());

        // Outer unconditional reconnect loop.
        loop {
            let mut attempt: u32 = 0;

            // Inner bounded retry burst.
            loop {
                let opened = tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        self.state.kill();
                        return;
                    }
                    opened = self.transport.open() => opened,
                };

                let exit = match opened {
                    Ok(conn) => {
                        if self.state.current() == ChannelLifecycleState::Retrying {
                            let _ = self.state.apply(|sm| sm.reconnected());
                        }
                        info!("transport connection established");
                        // Collaborators resynchronize connection-bound state.
                        self.init_hooks.fire();
                        self.pump(conn).await
                    }
                    Err(error) => PumpExit::Failed(error),
                };

                match exit {
                    PumpExit::Shutdown => {
                        self.state.kill();
                        return;
                    }
                    PumpExit::Failed(error) => {
                        debug!(online = self.network.online(), error = %error, "transport stream failed");
                        self.funnel.report(error);
                        attempt += 1;

                        if self.session.expired() {
                            warn!("session expired; reconnect abandoned");
                            self.state.kill();
                            return;
                        }
                        if *self.paused_rx.borrow() {
                            warn!("channel disconnected; reconnect abandoned");
                            self.state.kill();
                            return;
                        }
                        if self.state.current() == ChannelLifecycleState::Open {
                            let _ = self.state.apply(|sm| sm.connection_lost());
                        }

                        if !self.schedule.within_budget(attempt) {
                            break;
                        }

                        let delay = self.schedule.delay_for_attempt(attempt);
                        warn!(
                            attempt,
                            max_attempts = self.schedule.max_attempts(),
                            delay_ms = delay.as_millis() as u64,
                            "reconnect attempt scheduled"
                        );
                        if matches!(self.backoff(delay).await, BackoffOutcome::Terminal) {
                            return;
                        }
                    }
                }
            }

            // Budget spent: one cooldown pause, then a fresh burst.
            let cooldown = self.schedule.cooldown();
            info!(
                cooldown_ms = cooldown.as_millis() as u64,
                "retry budget exhausted; starting a fresh reconnect cycle"
            );
            if matches!(self.backoff(cooldown).await, BackoffOutcome::Terminal) {
                return;
            }
        }
    }

    /// Drive one live connection: drain the outbound queue into it and fan
    /// inbound events out to the merged stream. Single writer per direction.
    async fn pump(&mut self, mut conn: Box<dyn TransportConnection>) -> PumpExit {
        let mut outbound_open = true;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    conn.close().await;
                    return PumpExit::Shutdown;
                }
                inbound = conn.recv() => match inbound {
                    Some(Ok(event)) => {
                        let _ = self.inbound_tx.send(event);
                    }
                    Some(Err(error)) => return PumpExit::Failed(error),
                    None => {
                        return PumpExit::Failed(ChannelError::transport(
                            "connection closed by peer",
                        ));
                    }
                },
                outbound = self.outbound_rx.recv(), if outbound_open => match outbound {
                    Some(event) => {
                        if let Err(error) = conn.send(event).await {
                            return PumpExit::Failed(error);
                        }
                    }
                    None => outbound_open = false,
                },
            }
        }
    }

    /// Cancellable backoff wait. Shutdown, session expiry, and an explicit
    /// disconnect all cancel the pending timer and end recovery terminally.
    async fn backoff(&mut self, delay: Duration) -> BackoffOutcome {
        let mut expiry_rx = self.session.watch();
        let mut paused_rx = self.paused_rx.clone();

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                self.state.kill();
                BackoffOutcome::Terminal
            }
            _ = expiry_rx.wait_for(|expired| *expired) => {
                warn!("session expired during backoff; reconnect abandoned");
                self.state.kill();
                BackoffOutcome::Terminal
            }
            _ = paused_rx.wait_for(|paused| *paused) => {
                warn!("channel disconnected during backoff; reconnect abandoned");
                self.state.kill();
                BackoffOutcome::Terminal
            }
            _ = tokio::time::sleep(delay) => BackoffOutcome::Continue,
        }
    }
}
