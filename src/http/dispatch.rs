//! Publish/subscribe registry for entity streaming notifications.
//!
//! Entity buffers announce every raw chunk they pull off the wire
//! ([`Signal::RawData`]) and the end of the entity ([`Signal::EndData`]).
//! Observers register a receiver for a `(signal, sender)` pattern, either
//! side of which may be the wildcard `Any`.
//!
//! [`Dispatcher::connect`] hands back a [`Subscription`]. The subscriber
//! owns it, and dropping it removes the receiver. The registry itself only
//! keeps weak references, so a receiver whose handle is gone is treated as a
//! no-op and pruned on the next delivery.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use bytes::Bytes;
use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    RawData,
    EndData,
}

/// Identity of a notification sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SenderId(u64);

impl SenderId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SenderId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of a registered receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Connect-time pattern: a concrete key or the `Any` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern<T> {
    Any,
    Only(T),
}

/// Disconnect-time selector: every registration, or one specific key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Select<T> {
    All,
    Only(T),
}

impl<T: PartialEq> Select<T> {
    fn matches(&self, value: &T) -> bool {
        match self {
            Select::All => true,
            Select::Only(wanted) => wanted == value,
        }
    }
}

/// What a receiver tells the sender after seeing a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Continue,
    /// Ask the sender to abort whatever triggered the notification.
    Abort,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub signal: Signal,
    pub sender: SenderId,
    /// Raw bytes for [`Signal::RawData`]; empty for [`Signal::EndData`].
    pub info: Bytes,
}

/// Outcome of one receiver. Errors returned by a receiver are captured here
/// instead of being propagated to the sender.
pub type Delivery = anyhow::Result<Reply>;

pub type Receiver = dyn Fn(&Notification) -> anyhow::Result<Reply> + Send + Sync;
type Key = (Pattern<Signal>, Pattern<SenderId>);

#[derive(Default)]
struct Registry {
    connections: HashMap<Key, BTreeMap<SubscriptionId, Weak<Receiver>>>,
}

impl Registry {
    fn remove(
        &mut self,
        receiver: Select<SubscriptionId>,
        signal: Select<Pattern<Signal>>,
        sender: Select<Pattern<SenderId>>,
    ) {
        self.connections.retain(|(sig, snd), receivers| {
            if signal.matches(sig) && sender.matches(snd) {
                match receiver {
                    Select::All => receivers.clear(),
                    Select::Only(id) => {
                        receivers.remove(&id);
                    }
                }
                // dead handles go too while we are here
                receivers.retain(|_, weak| weak.strong_count() > 0);
            }
            !receivers.is_empty()
        });
    }
}

/// Handle to a notification registry. Clones share the same registry.
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<RwLock<Registry>>,
}

static GLOBAL: Lazy<Dispatcher> = Lazy::new(Dispatcher::new);
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Dispatcher {
        GLOBAL.clone()
    }

    /// Registers `receiver` for notifications matching `signal` and
    /// `sender`. The receiver stays connected for as long as the returned
    /// [`Subscription`] is alive.
    pub fn connect<F>(
        &self,
        signal: Pattern<Signal>,
        sender: Pattern<SenderId>,
        receiver: F,
    ) -> Subscription
    where
        F: Fn(&Notification) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        let receiver: Arc<Receiver> = Arc::new(receiver);

        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .connections
            .entry((signal, sender))
            .or_default()
            .insert(id, Arc::downgrade(&receiver));

        tracing::trace!(subscription = id.0, ?signal, ?sender, "receiver connected");

        Subscription {
            id,
            _receiver: receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Registers a receiver the caller keeps alive itself. The registry only
    /// holds a weak reference: once the caller drops its `Arc`, deliveries
    /// skip the receiver and the entry is pruned on the next `send`.
    pub fn connect_weak(
        &self,
        signal: Pattern<Signal>,
        sender: Pattern<SenderId>,
        receiver: &Arc<Receiver>,
    ) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .connections
            .entry((signal, sender))
            .or_default()
            .insert(id, Arc::downgrade(receiver));
        id
    }

    /// Removes registrations. Each argument either names one key or selects
    /// every key with [`Select::All`].
    pub fn disconnect(
        &self,
        receiver: Select<SubscriptionId>,
        signal: Select<Pattern<Signal>>,
        sender: Select<Pattern<SenderId>>,
    ) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(receiver, signal, sender);
    }

    /// Delivers a notification to every receiver registered under
    /// `{signal, Any} x {sender, Any}` and collects their replies.
    ///
    /// Receivers run without the registry lock held, so they may connect or
    /// disconnect freely.
    pub fn send(&self, signal: Signal, sender: SenderId, info: Bytes) -> Vec<Delivery> {
        let mut matched: BTreeMap<SubscriptionId, Weak<Receiver>> = BTreeMap::new();
        {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            for sig in [Pattern::Only(signal), Pattern::Any] {
                for snd in [Pattern::Only(sender), Pattern::Any] {
                    if let Some(receivers) = registry.connections.get(&(sig, snd)) {
                        matched.extend(receivers.iter().map(|(id, weak)| (*id, weak.clone())));
                    }
                }
            }
        }

        let notification = Notification {
            signal,
            sender,
            info,
        };

        let mut replies = Vec::with_capacity(matched.len());
        let mut dead = Vec::new();
        for (id, weak) in matched {
            match weak.upgrade() {
                Some(receiver) => replies.push(receiver(&notification)),
                None => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            for id in dead {
                registry.remove(Select::Only(id), Select::All, Select::All);
            }
        }

        replies
    }

    /// Number of live registrations.
    pub fn connection_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connections
            .values()
            .flat_map(|receivers| receivers.values())
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_connected(&self, id: SubscriptionId) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connections
            .values()
            .any(|receivers| receivers.contains_key(&id))
    }
}

/// True if any receiver asked for the operation to stop.
pub fn aborted(replies: &[Delivery]) -> bool {
    replies
        .iter()
        .any(|reply| matches!(reply, Ok(Reply::Abort)))
}

/// Owning handle for a connected receiver; dropping it disconnects.
pub struct Subscription {
    id: SubscriptionId,
    _receiver: Arc<Receiver>,
    registry: Weak<RwLock<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(Select::Only(self.id), Select::All, Select::All);
        }
    }
}
