//! Subscription registry and change delivery
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Fan-out of link state events to consumers
//! - SC-5: DoS Protection - Bounded per-subscriber buffers
//!
//! Delivery is a blocking handoff: `notify` awaits every matching
//! subscriber's bounded channel in turn, so a subscriber that never reads
//! stalls delivery to everyone else and delays the next kernel receive.

use crate::change::{Change, Filter};
use crate::change_set::ChangeSet;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};

/// Process-unique identifier of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end of a subscription
///
/// Yields the changes for one interface that pass the subscription's filter.
/// Dropping it lets the registry prune the subscription on the next
/// delivery attempt.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    interface: String,
    rx: mpsc::Receiver<Change>,
}

impl Subscription {
    /// Identifier accepted by [`crate::Watcher::unsubscribe`]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Interface this subscription watches
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Wait for the next change
    ///
    /// Returns `None` once the subscription has been removed from the
    /// registry (or the registry dropped) and every buffered change has been
    /// read.
    pub async fn recv(&mut self) -> Option<Change> {
        self.rx.recv().await
    }

    /// Take a buffered change without waiting
    pub fn try_recv(&mut self) -> Option<Change> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Change;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Change>> {
        self.rx.poll_recv(cx)
    }
}

#[derive(Debug)]
struct Entry {
    id: SubscriptionId,
    filter: Filter,
    tx: mpsc::Sender<Change>,
}

/// A pending handoff computed under the registry lock
struct Delivery {
    id: SubscriptionId,
    tx: mpsc::Sender<Change>,
    changes: Vec<Change>,
}

/// Table of active subscriptions keyed by interface name
///
/// The lock only guards table reads and writes; it is never held while a
/// change is being handed to a subscriber.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    capacity: usize,
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<String, Vec<Entry>>>,
}

impl SubscriptionRegistry {
    /// Create a registry whose subscriptions buffer up to `capacity` changes
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Per-subscriber buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register interest in changes for one interface
    pub fn subscribe(&self, interface: impl Into<String>, filter: Filter) -> Subscription {
        let interface = interface.into();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);

        debug!(%id, interface = %interface, filter = ?filter, "Registered subscription");

        self.subscriptions
            .lock()
            .entry(interface.clone())
            .or_default()
            .push(Entry { id, filter, tx });

        Subscription { id, interface, rx }
    }

    /// Remove a subscription; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.lock();
        let mut removed = false;
        subs.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        if removed {
            debug!(%id, "Removed subscription");
        }
        removed
    }

    /// Number of registered subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a change set to every matching subscription
    ///
    /// Changes for an interface are handed over in batch order. Returns the
    /// number of changes delivered.
    #[instrument(skip_all, fields(interfaces = changes.len()))]
    pub async fn notify(&self, changes: &ChangeSet) -> usize {
        let deliveries = self.plan(changes);

        let mut delivered = 0;
        for delivery in deliveries {
            for change in delivery.changes {
                if delivery.tx.send(change).await.is_err() {
                    // Receiver dropped since planning.
                    self.unsubscribe(delivery.id);
                    break;
                }
                delivered += 1;
            }
        }

        trace!(delivered, "Delivered change set");
        delivered
    }

    /// Match a change set against the table, pruning closed subscriptions
    fn plan(&self, changes: &ChangeSet) -> Vec<Delivery> {
        let mut subs = self.subscriptions.lock();
        let mut deliveries = Vec::new();

        for (interface, list) in changes {
            let Some(entries) = subs.get_mut(interface) else {
                continue;
            };

            entries.retain(|e| {
                let open = !e.tx.is_closed();
                if !open {
                    debug!(id = %e.id, interface = %interface, "Pruned closed subscription");
                }
                open
            });

            for entry in entries.iter() {
                let matched: Vec<Change> = list
                    .iter()
                    .copied()
                    .filter(|c| entry.filter.matches(*c))
                    .collect();
                if !matched.is_empty() {
                    deliveries.push(Delivery {
                        id: entry.id,
                        tx: entry.tx.clone(),
                        changes: matched,
                    });
                }
            }

            if entries.is_empty() {
                subs.remove(interface);
            }
        }

        deliveries
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(1)
    }
}
