//! Single-process pub/sub.
//!
//! Handlers run synchronously, in registration order, on the sender's
//! task; they must only update in-memory state and wake waiters, never
//! run I/O. Cross-process propagation is the store's business: when a
//! remote notification arrives, the owner feeds it back through
//! [`EventBus::dispatch_incoming_event`].
//!
//! Waiters *coalesce*: once signaled, a waiter retains its first event
//! and ignores everything else until [`Waiter::clear`] is called.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

type Handler<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Identifier of a registered handler, used to disconnect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct BusInner<E> {
    handlers: Vec<(HandlerId, Handler<E>)>,
    next_id: u64,
    /// Non-zero while a `send` has the handlers checked out.
    dispatch_depth: usize,
    /// Ids disconnected while checked out; applied on restore.
    tombstones: Vec<HandlerId>,
}

/// The per-process event bus.
pub struct EventBus<E> {
    inner: Arc<Mutex<BusInner<E>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                handlers: Vec::new(),
                next_id: 0,
                dispatch_depth: 0,
                tombstones: Vec::new(),
            })),
        }
    }
}

impl<E: Clone + Send + Sync + 'static> EventBus<E> {

    /// Register a handler; it stays connected until [`Self::disconnect`].
    pub fn connect(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> HandlerId {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = HandlerId(inner.next_id);
        inner.next_id += 1;
        inner.handlers.push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Unknown ids are ignored.
    pub fn disconnect(&self, id: HandlerId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.handlers.retain(|(handler_id, _)| *handler_id != id);
        if inner.dispatch_depth > 0 {
            // The handler may sit in a batch currently dispatching
            inner.tombstones.push(id);
        }
    }

    /// Publish an event to every connected handler, synchronously and
    /// in registration order.
    pub fn send(&self, event: &E) {
        // Handlers may themselves connect/disconnect, so the lock
        // cannot be held across the calls.
        let handlers: Vec<(HandlerId, Handler<E>)> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.dispatch_depth += 1;
            std::mem::take(&mut inner.handlers)
        };
        for (_, handler) in &handlers {
            handler(event);
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.dispatch_depth -= 1;
        // Preserve registration order: handlers added during dispatch
        // come after the pre-existing ones. Handlers disconnected
        // during dispatch stay gone.
        let mut restored: Vec<_> = handlers
            .into_iter()
            .filter(|(id, _)| !inner.tombstones.contains(id))
            .collect();
        restored.append(&mut inner.handlers);
        inner.handlers = restored;
        if inner.dispatch_depth == 0 {
            inner.tombstones.clear();
        }
    }

    /// Feed an event received from another process into the local bus.
    pub fn dispatch_incoming_event(&self, event: &E) {
        self.send(event);
    }

    /// Register a coalescing waiter for events matching `filter`.
    pub fn waiter_on(&self, filter: impl Fn(&E) -> bool + Send + Sync + 'static) -> Waiter<E> {
        let state = Arc::new(WaiterState {
            slot: Mutex::new(None),
            notify: Notify::new(),
        });
        let captured = state.clone();
        let id = self.connect(move |event| {
            if !filter(event) {
                return;
            }
            let mut slot = captured.slot.lock().unwrap_or_else(|e| e.into_inner());
            // Coalescing: keep the first event, drop the rest until clear()
            if slot.is_none() {
                *slot = Some(event.clone());
                captured.notify.notify_waiters();
                captured.notify.notify_one();
            }
        });
        Waiter {
            bus: self.clone(),
            id,
            state,
        }
    }

    /// Register a waiter matching the first of several filters.
    pub fn waiter_on_first(
        &self,
        filters: Vec<Box<dyn Fn(&E) -> bool + Send + Sync>>,
    ) -> Waiter<E> {
        self.waiter_on(move |event| filters.iter().any(|filter| filter(event)))
    }

    /// Open a scope that disconnects all its registrations on drop.
    pub fn connection_context(&self) -> ConnectionContext<E> {
        ConnectionContext {
            bus: self.clone(),
            ids: Mutex::new(Vec::new()),
        }
    }
}

struct WaiterState<E> {
    slot: Mutex<Option<E>>,
    notify: Notify,
}

/// A registered, coalescing waiter. Disconnects itself on drop.
pub struct Waiter<E: Clone + Send + Sync + 'static> {
    bus: EventBus<E>,
    id: HandlerId,
    state: Arc<WaiterState<E>>,
}

impl<E: Clone + Send + Sync + 'static> Waiter<E> {
    /// The retained event, if the waiter has been signaled.
    pub fn peek(&self) -> Option<E> {
        self.state
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Suspend until an event is retained, then return it. The event
    /// stays retained until [`Self::clear`].
    pub async fn wait(&self) -> E {
        loop {
            let notified = self.state.notify.notified();
            if let Some(event) = self.peek() {
                return event;
            }
            notified.await;
        }
    }

    /// Drop the retained event so the next matching one is captured.
    pub fn clear(&self) {
        self.state
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

impl<E: Clone + Send + Sync + 'static> Drop for Waiter<E> {
    fn drop(&mut self) {
        self.bus.disconnect(self.id);
    }
}

/// Scopes handler registrations to a connection's lifetime.
pub struct ConnectionContext<E: Clone + Send + Sync + 'static> {
    bus: EventBus<E>,
    ids: Mutex<Vec<HandlerId>>,
}

impl<E: Clone + Send + Sync + 'static> ConnectionContext<E> {
    /// Register a handler owned by this context.
    pub fn connect(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> HandlerId {
        let id = self.bus.connect(handler);
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id);
        id
    }
}

impl<E: Clone + Send + Sync + 'static> Drop for ConnectionContext<E> {
    fn drop(&mut self) {
        let ids = std::mem::take(&mut *self.ids.lock().unwrap_or_else(|e| e.into_inner()));
        for id in ids {
            self.bus.disconnect(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Ping(u32),
        Pong(u32),
    }

    #[test]
    fn default_bus_accepts_handlers() {
        let bus: EventBus<TestEvent> = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let captured = hits.clone();
        bus.connect(move |_| {
            captured.fetch_add(1, Ordering::SeqCst);
        });
        bus.send(&TestEvent::Ping(0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = log.clone();
            bus.connect(move |_| log.lock().unwrap().push(tag));
        }
        bus.send(&TestEvent::Ping(1));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn disconnect_stops_delivery() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let captured = hits.clone();
        let id = bus.connect(move |_| {
            captured.fetch_add(1, Ordering::SeqCst);
        });
        bus.send(&TestEvent::Ping(1));
        bus.disconnect(id);
        bus.send(&TestEvent::Ping(2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_inside_a_handler_sticks() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let captured = hits.clone();
        let id = bus.connect(move |_| {
            captured.fetch_add(1, Ordering::SeqCst);
        });
        let disconnector_bus = bus.clone();
        bus.connect(move |_| {
            disconnector_bus.disconnect(id);
        });

        // First send: the counting handler fires once, then its
        // neighbor disconnects it mid-dispatch.
        bus.send(&TestEvent::Ping(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.send(&TestEvent::Ping(2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waiter_coalesces_until_cleared() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let waiter = bus.waiter_on(|event| matches!(event, TestEvent::Ping(_)));

        bus.send(&TestEvent::Ping(1));
        // A second identical event before clear() is ignored
        bus.send(&TestEvent::Ping(1));
        bus.send(&TestEvent::Ping(2));
        assert_eq!(waiter.wait().await, TestEvent::Ping(1));
        assert_eq!(waiter.peek(), Some(TestEvent::Ping(1)));

        waiter.clear();
        assert_eq!(waiter.peek(), None);
        bus.send(&TestEvent::Ping(3));
        assert_eq!(waiter.wait().await, TestEvent::Ping(3));
    }

    #[tokio::test]
    async fn waiter_filter_skips_unrelated_events() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let waiter = bus.waiter_on(|event| matches!(event, TestEvent::Pong(_)));
        bus.send(&TestEvent::Ping(7));
        assert_eq!(waiter.peek(), None);
        bus.send(&TestEvent::Pong(7));
        assert_eq!(waiter.wait().await, TestEvent::Pong(7));
    }

    #[tokio::test]
    async fn waiter_on_first_matches_any_filter() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let waiter = bus.waiter_on_first(vec![
            Box::new(|event: &TestEvent| matches!(event, TestEvent::Ping(9))),
            Box::new(|event: &TestEvent| matches!(event, TestEvent::Pong(9))),
        ]);
        bus.send(&TestEvent::Pong(9));
        assert_eq!(waiter.wait().await, TestEvent::Pong(9));
    }

    #[test]
    fn connection_context_disconnects_on_drop() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let context = bus.connection_context();
            let captured = hits.clone();
            context.connect(move |_| {
                captured.fetch_add(1, Ordering::SeqCst);
            });
            bus.send(&TestEvent::Ping(1));
        }
        bus.send(&TestEvent::Ping(2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
