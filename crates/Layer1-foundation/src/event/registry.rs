//! Listener Registry - synchronous, typed observer registry
//!
//! Events are delivered in registration order from within the call that
//! emitted them. No lock is held while a listener runs, so listeners may
//! subscribe, unsubscribe or emit again.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

// ============================================================================
// Event trait
// ============================================================================

/// An event with a closed set of kinds, used for filtering
pub trait Event {
    type Kind: Copy + Eq + std::fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

// ============================================================================
// ListenerId
// ============================================================================

/// Listener ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

// ============================================================================
// EventFilter
// ============================================================================

/// Kind filter. `None` accepts every kind.
#[derive(Debug, Clone)]
pub struct EventFilter<K> {
    pub kinds: Option<Vec<K>>,
}

impl<K> Default for EventFilter<K> {
    fn default() -> Self {
        Self { kinds: None }
    }
}

impl<K: Copy + Eq> EventFilter<K> {
    /// Accept every event
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept only the given kinds
    pub fn kinds(kinds: impl IntoIterator<Item = K>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
        }
    }

    pub fn matches(&self, kind: K) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&kind),
            None => true,
        }
    }
}

// ============================================================================
// ListenerRegistry
// ============================================================================

/// Listener callback
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct RegisteredListener<E: Event> {
    id: ListenerId,
    callback: Listener<E>,
    filter: EventFilter<E::Kind>,
    once: bool,
}

/// Registry of listeners for one event source
pub struct ListenerRegistry<E: Event> {
    listeners: Mutex<Vec<RegisteredListener<E>>>,
    listener_counter: AtomicU64,
    event_count: AtomicU64,
}

impl<E: Event> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            listener_counter: AtomicU64::new(0),
            event_count: AtomicU64::new(0),
        }
    }

    /// Register a listener for every event passing `filter`
    pub fn subscribe(&self, filter: EventFilter<E::Kind>, callback: Listener<E>) -> ListenerId {
        self.register(filter, callback, false)
    }

    /// Register a listener removed after its first delivery
    pub fn subscribe_once(&self, filter: EventFilter<E::Kind>, callback: Listener<E>) -> ListenerId {
        self.register(filter, callback, true)
    }

    fn register(&self, filter: EventFilter<E::Kind>, callback: Listener<E>, once: bool) -> ListenerId {
        let id = ListenerId(self.listener_counter.fetch_add(1, Ordering::SeqCst));
        trace!(listener_id = %id, once, "Registering listener");

        self.listeners.lock().push(RegisteredListener {
            id,
            callback,
            filter,
            once,
        });
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        before != listeners.len()
    }

    /// Deliver `event` to every matching listener
    pub fn emit(&self, event: &E) {
        self.event_count.fetch_add(1, Ordering::SeqCst);
        let kind = event.kind();

        // Snapshot under the lock, deliver without it
        let targets: Vec<Listener<E>> = {
            let mut listeners = self.listeners.lock();
            let targets = listeners
                .iter()
                .filter(|l| l.filter.matches(kind))
                .map(|l| l.callback.clone())
                .collect();
            listeners.retain(|l| !(l.once && l.filter.matches(kind)));
            targets
        };

        for callback in targets {
            callback(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Total number of emitted events
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

impl<E: Event> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Ping,
        Pong,
    }

    struct Probe(Kind);

    impl Event for Probe {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            self.0
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Listener<Probe>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let callback: Listener<Probe> = Arc::new(move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let registry = ListenerRegistry::new();
        let (count, callback) = counter();
        let id = registry.subscribe(EventFilter::all(), callback);

        registry.emit(&Probe(Kind::Ping));
        registry.emit(&Probe(Kind::Pong));
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.emit(&Probe(Kind::Ping));
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(registry.event_count(), 3);
    }

    #[test]
    fn test_filter_by_kind() {
        let registry = ListenerRegistry::new();
        let (count, callback) = counter();
        registry.subscribe(EventFilter::kinds([Kind::Pong]), callback);

        registry.emit(&Probe(Kind::Ping));
        registry.emit(&Probe(Kind::Pong));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_listener_removed_after_match() {
        let registry = ListenerRegistry::new();
        let (count, callback) = counter();
        registry.subscribe_once(EventFilter::kinds([Kind::Pong]), callback);

        registry.emit(&Probe(Kind::Ping));
        assert_eq!(registry.listener_count(), 1);
        registry.emit(&Probe(Kind::Pong));
        registry.emit(&Probe(Kind::Pong));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let registry = Arc::new(ListenerRegistry::<Probe>::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&registry);
        let id_slot = slot.clone();
        let id = registry.subscribe(
            EventFilter::all(),
            Arc::new(move |_| {
                if let (Some(registry), Some(id)) = (weak.upgrade(), *id_slot.lock()) {
                    registry.unsubscribe(id);
                }
            }),
        );
        *slot.lock() = Some(id);

        registry.emit(&Probe(Kind::Ping));
        assert_eq!(registry.listener_count(), 0);
    }
}
