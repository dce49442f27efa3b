use std::{future::Future, pin::Pin, sync::Arc};

use channel_core::ChannelError;
use tokio::sync::OnceCell;

/// Caller-supplied one-shot readiness handshake (the `on_activate` hook).
pub type ActivationHook =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send>> + Send + Sync>;

/// Wrap an async closure into an [`ActivationHook`].
pub fn activation_hook<F, Fut>(hook: F) -> ActivationHook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ChannelError>> + Send + 'static,
{
    Arc::new(move || Box::pin(hook()))
}

/// Runs the handshake exactly once and caches its outcome for all callers.
///
/// Concurrent callers await the single in-flight run; once resolved, success
/// and failure are both cached for the life of the channel. A failed
/// handshake is never retried here: restarting it is the caller's
/// responsibility, by reconstructing the channel.
pub struct ActivationGate {
    hook: ActivationHook,
    outcome: OnceCell<Result<(), ChannelError>>,
}

impl ActivationGate {
    /// Build a gate around the supplied handshake.
    pub fn new(hook: ActivationHook) -> Self {
        Self {
            hook,
            outcome: OnceCell::new(),
        }
    }

    /// Run the handshake if nobody has yet, otherwise return the cached
    /// outcome.
    pub async fn activate(&self) -> Result<(), ChannelError> {
        self.outcome.get_or_init(|| (self.hook)()).await.clone()
    }

    /// Cached outcome, if the handshake already resolved.
    pub fn outcome(&self) -> Option<Result<(), ChannelError>> {
        self.outcome.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    fn counting_gate(runs: Arc<AtomicU32>) -> Arc<ActivationGate> {
        Arc::new(ActivationGate::new(activation_hook(move || {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }
        })))
    }

    #[tokio::test(start_paused = true)]
    async fn runs_handshake_exactly_once_for_concurrent_callers() {
        let runs = Arc::new(AtomicU32::new(0));
        let gate = counting_gate(Arc::clone(&runs));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move { gate.activate().await }));
        }
        for handle in handles {
            handle
                .await
                .expect("task should not panic")
                .expect("activation should succeed");
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn caches_handshake_failure() {
        let runs = Arc::new(AtomicU32::new(0));
        let runs_in_hook = Arc::clone(&runs);
        let gate = ActivationGate::new(activation_hook(move || {
            runs_in_hook.fetch_add(1, Ordering::SeqCst);
            async { Err(ChannelError::activation_failed("denied")) }
        }));

        let first = gate.activate().await;
        let second = gate.activate().await;

        assert_eq!(first, Err(ChannelError::activation_failed("denied")));
        assert_eq!(second, first);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            gate.outcome(),
            Some(Err(ChannelError::activation_failed("denied")))
        );
    }

    #[tokio::test]
    async fn exposes_no_outcome_before_first_run() {
        let gate = ActivationGate::new(activation_hook(|| async { Ok(()) }));
        assert!(gate.outcome().is_none());

        gate.activate().await.expect("activation should succeed");
        assert_eq!(gate.outcome(), Some(Ok(())));
    }
}
