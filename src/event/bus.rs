//! # Bus Implementation
//!
//! The Bus is a topic-based publish/subscribe channel with synchronous fan-out.
//! Handlers are plain callbacks invoked on the emitting thread; a handler that
//! wants to do asynchronous work spawns it and returns, the bus never awaits.
//!
//! ## Subscriber ids
//!
//! Subscriptions live in a sparse, append-only slot list. A subscription's
//! index in that list is its [`SubscriberId`]. Removing a subscription leaves a
//! tombstone in its slot instead of compacting the list, so every id that was
//! ever handed out keeps pointing at the same slot and no id is reused.
//!
//! ## Emission while mutating
//!
//! `emit` walks the slot list by index and only holds the slot lock long
//! enough to clone the current slot. Handlers are therefore free to call `on`
//! and `off` on the same bus:
//!
//! - an `off` for an index the current pass has not reached yet prevents that
//!   handler from firing in this pass
//! - an `on` appends behind the cursor and is visited by this pass if its
//!   topic matches

use std::{borrow::Borrow, fmt::Debug, sync::Arc};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::registry::{Registry, RegistryResult};

/// Registry identifier of the default application bus.
pub const DEFAULT_BUS_NAME: &str = "_BUS";

/// Stable handle of a subscription, its index in the slot list.
pub type SubscriberId = usize;

pub type EventHandler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscription<T, E> {
    topic: T,
    handler: EventHandler<E>,
}

type Slot<T, E> = Option<Arc<Subscription<T, E>>>;

pub struct Bus<T, E> {
    slots: RwLock<Vec<Slot<T, E>>>,
}

impl<T, E> Bus<T, E>
where
    T: PartialEq + Debug + Send + Sync + 'static,
    E: 'static,
{
    /// Creates a standalone bus that is not registered anywhere.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Returns the bus registered under `identifier`, creating it on first
    /// access. Every caller using the same registry and identifier receives the
    /// same instance.
    ///
    /// # Errors
    ///
    /// `RegistryError::TypeMismatch` if the identifier already holds a value
    /// that is not a `Bus<T, E>` (e.g. a bus with other topic/event types).
    pub fn shared(registry: &Registry, identifier: &str) -> RegistryResult<Arc<Self>> {
        registry.get_or_insert_with(identifier, Self::new)
    }

    /// Subscribes `handler` to `topic` and returns the new subscriber id.
    ///
    /// Ids start at 0 on a fresh bus and increase by one per subscription.
    pub fn on<F>(&self, topic: impl Into<T>, handler: F) -> SubscriberId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.on_with_id(topic, |_| handler)
    }

    /// Like [`Bus::on`], but builds the handler from the id it is about to be
    /// registered under. Handlers that unsubscribe themselves need their own id
    /// before the first event can reach them.
    ///
    /// `make_handler` runs without the slot lock held and may use the bus.
    /// The subscription goes live once it returns.
    pub fn on_with_id<F, H>(&self, topic: impl Into<T>, make_handler: F) -> SubscriberId
    where
        F: FnOnce(SubscriberId) -> H,
        H: Fn(&E) + Send + Sync + 'static,
    {
        let topic = topic.into();
        // Reserve the id; the slot stays a tombstone until the handler is built.
        let id = {
            let mut slots = self.slots.write();
            slots.push(None);
            slots.len() - 1
        };
        let handler: EventHandler<E> = Arc::new(make_handler(id));
        debug!(subscriber_id = id, ?topic, "Subscribing");
        if let Some(slot) = self.slots.write().get_mut(id) {
            *slot = Some(Arc::new(Subscription { topic, handler }));
        }
        id
    }

    /// Removes the subscription `id`.
    ///
    /// Unknown and already removed ids are ignored. Returns whether a live
    /// subscription was removed.
    pub fn off(&self, id: SubscriberId) -> bool {
        let removed = self
            .slots
            .write()
            .get_mut(id)
            .and_then(Option::take)
            .is_some();
        if removed {
            debug!(subscriber_id = id, "Unsubscribed");
        }
        removed
    }

    /// Invokes, in registration order, every live handler subscribed to
    /// `topic` with `event`. Returns the number of handlers invoked.
    pub fn emit<Q>(&self, topic: &Q, event: &E) -> usize
    where
        T: Borrow<Q>,
        Q: PartialEq + Debug + ?Sized,
    {
        let mut invoked = 0;
        let mut index = 0;
        // The lock is released before each handler runs.
        while let Some(slot) = self.slot(index) {
            index += 1;
            let Some(subscription) = slot else { continue };
            if <T as Borrow<Q>>::borrow(&subscription.topic) == topic {
                (subscription.handler)(event);
                invoked += 1;
            }
        }
        trace!(?topic, invoked, "Emitted");
        invoked
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.slots.read().iter().filter(|slot| slot.is_some()).count()
    }

    /// Number of subscriber ids issued so far, including removed ones.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        matches!(self.slots.read().get(id), Some(Some(_)))
    }

    fn slot(&self, index: usize) -> Option<Slot<T, E>> {
        self.slots.read().get(index).cloned()
    }
}

impl<T, E> Default for Bus<T, E>
where
    T: PartialEq + Debug + Send + Sync + 'static,
    E: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Debug for Bus<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read();
        f.debug_struct("Bus")
            .field("issued", &slots.len())
            .field(
                "subscribers",
                &slots.iter().filter(|slot| slot.is_some()).count(),
            )
            .finish()
    }
}
