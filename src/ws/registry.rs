//! Typed callback registry
//!
//! One ordered map per event kind from subscription id to handler. Ids are
//! handed out in increasing order, so iterating the map is registration
//! order. Handlers are invoked with no lock held and each call is isolated:
//! a panicking handler is logged and the rest still run.

use crate::ws::message::InboundMessage;
use crate::ws::transport::{CloseEvent, ErrorEvent, OpenEvent};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

/// Shared handler for events of type `E`
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Stable id of one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Event category a subscription belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Open,
    Close,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Open => "open",
            EventKind::Close => "close",
            EventKind::Error => "error",
        }
    }
}

/// Handlers for one event kind
pub struct Registry<E> {
    next_id: u64,
    handlers: BTreeMap<SubscriptionId, Handler<E>>,
}

impl<E> Registry<E> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            handlers: BTreeMap::new(),
        }
    }

    /// Register a handler, returning its id
    pub fn insert(&mut self, handler: Handler<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.insert(id, handler);
        id
    }

    /// Remove a handler. Returns false if it was already gone.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub fn get(&self, id: SubscriptionId) -> Option<Handler<E>> {
        self.handlers.get(&id).cloned()
    }

    /// Ids in registration order
    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<E> Default for Registry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke every handler in `registry` with `event`.
///
/// The id list is taken up front and each handler is looked up again right
/// before its call, so one removed by an earlier handler is skipped.
/// Returns the number of handlers that ran to completion.
pub fn dispatch<E>(registry: &Mutex<Registry<E>>, kind: EventKind, event: &E) -> usize {
    let ids = registry.lock().ids();
    let mut completed = 0;

    for id in ids {
        let handler = match registry.lock().get(id) {
            Some(handler) => handler,
            None => continue,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(()) => completed += 1,
            Err(cause) => {
                let detail = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    target: "ws",
                    event = kind.as_str(),
                    subscription = id.0,
                    panic = %detail,
                    "subscriber panicked"
                );
            }
        }
    }

    completed
}

/// The four subscriber sets of a client
#[derive(Default)]
pub struct Subscribers {
    pub message: Mutex<Registry<InboundMessage>>,
    pub open: Mutex<Registry<OpenEvent>>,
    pub close: Mutex<Registry<CloseEvent>>,
    pub error: Mutex<Registry<ErrorEvent>>,
}

impl Subscribers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn remove(&self, kind: EventKind, id: SubscriptionId) -> bool {
        match kind {
            EventKind::Message => self.message.lock().remove(id),
            EventKind::Open => self.open.lock().remove(id),
            EventKind::Close => self.close.lock().remove(id),
            EventKind::Error => self.error.lock().remove(id),
        }
    }

    /// Number of live registrations of `kind`
    pub fn count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Message => self.message.lock().len(),
            EventKind::Open => self.open.lock().len(),
            EventKind::Close => self.close.lock().len(),
            EventKind::Error => self.error.lock().len(),
        }
    }
}

/// Token returned by `SocketClient::on_*`.
///
/// Dropping it leaves the handler registered; call `unsubscribe` to remove it.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, kind: EventKind, subscribers: &Arc<Subscribers>) -> Self {
        Self {
            id,
            kind,
            subscribers: Arc::downgrade(subscribers),
        }
    }

    /// Remove the handler. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(self.kind, self.id);
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn recorder(log: &Arc<Mutex<Vec<u32>>>, tag: u32) -> Handler<u32> {
        let log = log.clone();
        Arc::new(move |event: &u32| log.lock().push(tag * 100 + *event))
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Mutex::new(Registry::new());
        registry.lock().insert(recorder(&log, 1));
        registry.lock().insert(recorder(&log, 2));
        registry.lock().insert(recorder(&log, 3));

        let ran = dispatch(&registry, EventKind::Message, &7);
        assert_eq!(ran, 3);
        assert_eq!(*log.lock(), vec![107, 207, 307]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        let id = registry.insert(recorder(&log, 1));

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Mutex::new(Registry::new());
        registry.lock().insert(recorder(&log, 1));
        registry
            .lock()
            .insert(Arc::new(|_: &u32| panic!("handler failure")));
        registry.lock().insert(recorder(&log, 3));

        let ran = dispatch(&registry, EventKind::Open, &1);
        assert_eq!(ran, 2);
        assert_eq!(*log.lock(), vec![101, 301]);
    }

    #[test]
    fn test_handler_removed_mid_dispatch_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(Mutex::new(Registry::<u32>::new()));

        // The second handler's id is known in advance: ids start at 0
        let remover = {
            let registry = registry.clone();
            Arc::new(move |_: &u32| {
                registry.lock().remove(SubscriptionId(1));
            })
        };
        registry.lock().insert(remover);
        registry.lock().insert(recorder(&log, 2));

        dispatch(&registry, EventKind::Close, &1);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_subscription_unsubscribe_twice() {
        let subscribers = Subscribers::new();
        let id = subscribers
            .error
            .lock()
            .insert(Arc::new(|_: &ErrorEvent| {}));
        let subscription = Subscription::new(id, EventKind::Error, &subscribers);

        assert_eq!(subscribers.count(EventKind::Error), 1);
        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(subscribers.count(EventKind::Error), 0);
    }

    #[test]
    fn test_unsubscribe_after_owner_dropped() {
        let subscribers = Subscribers::new();
        let id = subscribers.open.lock().insert(Arc::new(|_: &OpenEvent| {}));
        let subscription = Subscription::new(id, EventKind::Open, &subscribers);
        drop(subscribers);

        subscription.unsubscribe();
    }

    proptest! {
        /// Whatever is registered and removed, dispatch reaches exactly the
        /// survivors, once each, in registration order.
        #[test]
        fn prop_dispatch_reaches_only_survivors(
            removed in proptest::collection::vec(any::<bool>(), 0..32)
        ) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let registry = Mutex::new(Registry::new());

            let ids: Vec<_> = (0..removed.len() as u32)
                .map(|tag| registry.lock().insert(recorder(&log, tag)))
                .collect();
            for (id, gone) in ids.iter().zip(&removed) {
                if *gone {
                    registry.lock().remove(*id);
                    // Second removal must be harmless
                    registry.lock().remove(*id);
                }
            }

            dispatch(&registry, EventKind::Message, &0);

            let expected: Vec<u32> = removed
                .iter()
                .enumerate()
                .filter(|(_, gone)| !**gone)
                .map(|(tag, _)| tag as u32 * 100)
                .collect();
            prop_assert_eq!(log.lock().clone(), expected);
        }
    }
}
