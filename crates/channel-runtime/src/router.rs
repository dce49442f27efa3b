use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, ThreadId},
};

use channel_core::SessionEvent;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use uuid::Uuid;

type RouteFilter = Box<dyn Fn(&SessionEvent) -> bool + Send>;
type RouteCallback = Box<dyn FnMut(SessionEvent) + Send>;

/// One registered callback with its own invocation lock.
///
/// Invocations never hold a registry lock, so a running callback may attach
/// or detach registrations, including its own. `detach` waits out an
/// invocation in flight on another thread; after it returns the callback can
/// never run again and is dropped.
pub(crate) struct CallbackSlot<T> {
    state: Mutex<SlotState<T>>,
    idle: Condvar,
}

struct SlotState<T> {
    callback: Option<T>,
    running_on: Option<ThreadId>,
    detached: bool,
}

impl<T> CallbackSlot<T> {
    pub(crate) fn new(callback: T) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState {
                callback: Some(callback),
                running_on: None,
                detached: false,
            }),
            idle: Condvar::new(),
        })
    }

    /// Run the callback unless the slot was detached meanwhile.
    pub(crate) fn invoke(&self, run: impl FnOnce(&mut T)) {
        let mut callback = {
            let mut state = self.lock_state();
            let Some(callback) = state.callback.take() else {
                return;
            };
            state.running_on = Some(thread::current().id());
            callback
        };

        run(&mut callback);

        let mut state = self.lock_state();
        // A detach issued during the invocation wins; the callback is
        // dropped here instead of being put back.
        if !state.detached {
            state.callback = Some(callback);
        }
        state.running_on = None;
        drop(state);
        self.idle.notify_all();
    }

    /// Drop the callback, waiting out an invocation running on another
    /// thread. A detach from inside the running callback itself returns
    /// immediately instead of waiting on its own invocation.
    pub(crate) fn detach(&self) {
        let current = thread::current().id();
        let mut state = self.lock_state();
        state.detached = true;
        state.callback = None;
        while matches!(state.running_on, Some(running) if running != current) {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Route {
    filter: RouteFilter,
    slot: Arc<CallbackSlot<RouteCallback>>,
}

/// Fan-out registry over the merged inbound stream.
///
/// One dispatch task drains the stream, snapshots the matching routes, and
/// invokes each callback with the registry lock released, so callbacks may
/// freely subscribe and unsubscribe. `Subscription` teardown removes the
/// route and waits out an invocation in flight, so after `unsubscribe`
/// returns no further invocations can happen for that subscription.
/// Control-layer events are never delivered to registered routes.
pub struct EventRouter {
    routes: Mutex<HashMap<Uuid, Route>>,
}

impl EventRouter {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn the dispatch task draining `events` into registered routes.
    pub fn start(self: &Arc<Self>, events: broadcast::Receiver<SessionEvent>, shutdown: CancellationToken) {
        let router = Arc::clone(self);
        let mut events = events;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => router.deliver(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event router lagged behind inbound stream");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            trace!("event router dispatch task exiting");
        });
    }

    /// Attach a filtered callback, returning its teardown guard.
    pub fn subscribe(
        self: &Arc<Self>,
        filter: impl Fn(&SessionEvent) -> bool + Send + 'static,
        callback: impl FnMut(SessionEvent) + Send + 'static,
    ) -> Subscription {
        let id = Uuid::new_v4();
        self.lock_routes().insert(
            id,
            Route {
                filter: Box::new(filter),
                slot: CallbackSlot::new(Box::new(callback) as RouteCallback),
            },
        );

        Subscription {
            router: Arc::clone(self),
            id,
            detached: false,
        }
    }

    fn deliver(&self, event: SessionEvent) {
        if event.is_control() {
            trace!(id = %event.id, "skipping control event for regular subscribers");
            return;
        }

        // Snapshot matching slots, then invoke with the registry lock
        // released so callbacks can tear down their own registrations.
        let matched: Vec<Arc<CallbackSlot<RouteCallback>>> = {
            let routes = self.lock_routes();
            routes
                .values()
                .filter(|route| (route.filter)(&event))
                .map(|route| Arc::clone(&route.slot))
                .collect()
        };

        for slot in matched {
            let event = event.clone();
            slot.invoke(move |callback| callback(event));
        }
    }

    fn detach(&self, id: Uuid) {
        let slot = self.lock_routes().remove(&id).map(|route| route.slot);
        if let Some(slot) = slot {
            slot.detach();
        }
    }

    fn lock_routes(&self) -> MutexGuard<'_, HashMap<Uuid, Route>> {
        self.routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Guard detaching a router subscription on `unsubscribe` or drop.
pub struct Subscription {
    router: Arc<EventRouter>,
    id: Uuid,
    detached: bool,
}

impl Subscription {
    /// Detach now; no further callback invocations happen after this returns.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.detached {
            self.detached = true;
            self.router.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
