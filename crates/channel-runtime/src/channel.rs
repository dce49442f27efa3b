use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use channel_core::{
    ChannelError, ChannelLifecycleState, ChannelStateMachine, RetrySchedule, SessionEvent,
    SessionEventId, TopicId,
};
use channel_transport::{NetworkState, SessionValidity, Transport};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    activation::{ActivationGate, ActivationHook},
    dispatch::DispatchWorker,
    funnel::{ErrorFunnel, TransportFailure},
    multiplex::TopicStream,
    reconnect::ReconnectDriver,
    router::{CallbackSlot, EventRouter, Subscription},
};

/// Runtime tuning values for one channel instance.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Backoff schedule and inner retry budget for the reconnect policy.
    pub retry_schedule: RetrySchedule,
    /// Quiet window for transport-error log debouncing.
    pub error_debounce: Duration,
    /// Buffer size of the merged inbound fan-out stream.
    pub event_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            retry_schedule: RetrySchedule::default(),
            error_debounce: Duration::from_secs(1),
            event_buffer: 256,
        }
    }
}

/// Lifecycle cell shared between the channel handle and its workers.
pub(crate) struct StateHandle {
    sm: Mutex<ChannelStateMachine>,
    tx: watch::Sender<ChannelLifecycleState>,
}

impl StateHandle {
    fn new() -> (Arc<Self>, watch::Receiver<ChannelLifecycleState>) {
        let (tx, rx) = watch::channel(ChannelLifecycleState::Idle);
        let handle = Arc::new(Self {
            sm: Mutex::new(ChannelStateMachine::default()),
            tx,
        });
        (handle, rx)
    }

    pub(crate) fn current(&self) -> ChannelLifecycleState {
        self.lock().state()
    }

    pub(crate) fn apply(
        &self,
        transition: impl FnOnce(&mut ChannelStateMachine) -> Result<ChannelLifecycleState, ChannelError>,
    ) -> Result<ChannelLifecycleState, ChannelError> {
        let mut sm = self.lock();
        let next = transition(&mut sm)?;
        self.tx.send_replace(next);
        Ok(next)
    }

    pub(crate) fn kill(&self) {
        let next = self.lock().kill();
        self.tx.send_replace(next);
    }

    fn lock(&self) -> MutexGuard<'_, ChannelStateMachine> {
        self.sm.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

type InitHook = Box<dyn FnMut() + Send>;

/// Callbacks fired on every successful transport open.
///
/// Hooks run with the registry lock released, so a hook may detach itself or
/// a sibling while firing.
#[derive(Default)]
pub(crate) struct InitHooks {
    hooks: Mutex<HashMap<Uuid, Arc<CallbackSlot<InitHook>>>>,
}

impl InitHooks {
    pub(crate) fn fire(&self) {
        let slots: Vec<_> = self.lock().values().map(Arc::clone).collect();
        for slot in slots {
            slot.invoke(|hook| hook());
        }
    }

    fn attach(&self, hook: InitHook) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().insert(id, CallbackSlot::new(hook));
        id
    }

    fn detach(&self, id: Uuid) {
        let slot = self.lock().remove(&id);
        if let Some(slot) = slot {
            slot.detach();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<CallbackSlot<InitHook>>>> {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Guard detaching an init hook on `unsubscribe` or drop.
pub struct InitSubscription {
    hooks: Arc<InitHooks>,
    id: Uuid,
    detached: bool,
}

impl InitSubscription {
    /// Detach now; the hook is never invoked again after this returns.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.detached {
            self.detached = true;
            self.hooks.detach(self.id);
        }
    }
}

impl Drop for InitSubscription {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Resilient, multiplexed event channel over one injected transport.
///
/// The channel keeps the inbound stream alive across transport failures,
/// gates outbound traffic behind a one-time activation handshake, and fans
/// the single inbound stream out to id-filtered subscribers and topic-scoped
/// sub-streams. It owns its workers and its reconnect state; the transport
/// and the two oracles are injected and may outlive it.
///
/// Must be spawned inside a tokio runtime. Dropping the handle cancels any
/// pending reconnect timer and releases the transport.
pub struct SessionEventChannel {
    emit_tx: mpsc::UnboundedSender<SessionEvent>,
    router: Arc<EventRouter>,
    gate: Arc<ActivationGate>,
    funnel: Arc<ErrorFunnel>,
    init_hooks: Arc<InitHooks>,
    paused_tx: watch::Sender<bool>,
    demand_tx: watch::Sender<bool>,
    state: Arc<StateHandle>,
    state_rx: watch::Receiver<ChannelLifecycleState>,
    shutdown: CancellationToken,
}

impl SessionEventChannel {
    /// Wire the channel workers and return the handle.
    ///
    /// Nothing touches the network until the first `emit` or subscriber
    /// creates demand; the activation handshake then runs exactly once.
    pub fn spawn(
        config: ChannelConfig,
        transport: Arc<dyn Transport>,
        session: Arc<dyn SessionValidity>,
        network: Arc<dyn NetworkState>,
        on_activate: ActivationHook,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let gate = Arc::new(ActivationGate::new(on_activate));
        let funnel = ErrorFunnel::spawn(config.error_debounce, shutdown.child_token());
        let init_hooks = Arc::new(InitHooks::default());

        let (emit_tx, emit_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, _) = broadcast::channel(config.event_buffer.max(1));
        let (paused_tx, paused_rx) = watch::channel(false);
        let (demand_tx, demand_rx) = watch::channel(false);
        let (state, state_rx) = StateHandle::new();

        let router = EventRouter::new();
        router.start(inbound_tx.subscribe(), shutdown.child_token());

        DispatchWorker {
            emit_rx,
            outbound_tx,
            paused_rx: paused_rx.clone(),
            gate: Arc::clone(&gate),
            shutdown: shutdown.child_token(),
        }
        .spawn();

        ReconnectDriver {
            transport,
            session,
            network,
            gate: Arc::clone(&gate),
            funnel: Arc::clone(&funnel),
            schedule: config.retry_schedule,
            outbound_rx,
            inbound_tx,
            demand_rx,
            paused_rx,
            state: Arc::clone(&state),
            init_hooks: Arc::clone(&init_hooks),
            shutdown: shutdown.child_token(),
        }
        .spawn();

        Self {
            emit_tx,
            router,
            gate,
            funnel,
            init_hooks,
            paused_tx,
            demand_tx,
            state,
            state_rx,
            shutdown,
        }
    }

    /// Fire-and-forget send.
    ///
    /// The event is queued immediately and delivered in submission order once
    /// the pause and activation gates allow it. Fails fast with the cached
    /// activation failure or once the channel is dead; events already queued
    /// when the channel dies are dropped silently.
    pub fn emit(&self, event: SessionEvent) -> Result<(), ChannelError> {
        if self.state.current() == ChannelLifecycleState::Dead {
            return Err(ChannelError::Closed);
        }
        if let Some(Err(error)) = self.gate.outcome() {
            return Err(error);
        }

        self.mark_demand();
        self.emit_tx.send(event).map_err(|_| ChannelError::Closed)
    }

    /// Subscribe to merged inbound events carrying `id`.
    pub fn on_event(
        &self,
        id: SessionEventId,
        callback: impl FnMut(SessionEvent) + Send + 'static,
    ) -> Subscription {
        self.mark_demand();
        self.router
            .subscribe(move |event| event.id == id, callback)
    }

    /// Subscribe to events carrying `id`, mapped before delivery.
    pub fn on_event_map<T>(
        &self,
        id: SessionEventId,
        map: impl Fn(&SessionEvent) -> T + Send + 'static,
        mut callback: impl FnMut(T) + Send + 'static,
    ) -> Subscription {
        self.mark_demand();
        self.router.subscribe(
            move |event| event.id == id,
            move |event| callback(map(&event)),
        )
    }

    /// Subscribe to every merged inbound event.
    pub fn on(&self, callback: impl FnMut(SessionEvent) + Send + 'static) -> Subscription {
        self.on_filtered(|_| true, callback)
    }

    /// Subscribe to merged inbound events matching `predicate`.
    pub fn on_filtered(
        &self,
        predicate: impl Fn(&SessionEvent) -> bool + Send + 'static,
        callback: impl FnMut(SessionEvent) + Send + 'static,
    ) -> Subscription {
        self.mark_demand();
        self.router.subscribe(predicate, callback)
    }

    /// Topic-scoped sub-stream with automatic subscribe/unsubscribe control
    /// events.
    pub fn multiplex(&self, topic: impl Into<TopicId>) -> TopicStream {
        self.mark_demand();
        TopicStream::attach(&self.router, self.emit_tx.clone(), topic.into())
    }

    /// Resume outbound dispatch after a `disconnect`.
    pub fn connect(&self) {
        if self.state.current() == ChannelLifecycleState::Paused {
            let _ = self.state.apply(|sm| sm.resume());
        }
        self.paused_tx.send_replace(false);
    }

    /// Pause outbound dispatch without destroying the channel.
    ///
    /// Queued events resume, in order, after a later `connect`. A disconnect
    /// issued during a reconnect backoff abandons recovery terminally.
    pub fn disconnect(&self) {
        self.paused_tx.send_replace(true);
        if self.state.current() == ChannelLifecycleState::Open {
            let _ = self.state.apply(|sm| sm.pause());
        }
    }

    /// Register a hook fired on every successful transport open, so
    /// collaborators can resynchronize connection-bound state.
    pub fn on_init(&self, hook: impl FnMut() + Send + 'static) -> InitSubscription {
        let id = self.init_hooks.attach(Box::new(hook));
        InitSubscription {
            hooks: Arc::clone(&self.init_hooks),
            id,
            detached: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelLifecycleState {
        self.state.current()
    }

    /// Watch lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<ChannelLifecycleState> {
        self.state_rx.clone()
    }

    /// Subscribe to debounced transport-failure notifications.
    pub fn failure_notifications(&self) -> broadcast::Receiver<TransportFailure> {
        self.funnel.notifications()
    }

    /// Tear the channel down: cancels pending reconnect timers, stops all
    /// workers, and releases the transport.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.state.kill();
    }

    fn mark_demand(&self) {
        self.demand_tx.send_replace(true);
    }
}

impl Drop for SessionEventChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
