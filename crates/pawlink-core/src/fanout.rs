//! Status fan-out: delivers every [`StatusEvent`] to every attached
//! front-end.
//!
//! Each front-end owns a bounded `mpsc` channel. Publishing never blocks:
//! a front-end whose buffer is full, or whose receiver has been dropped, is
//! detached and simply misses the event. Delivery order per front-end equals
//! publish order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::codec::StatusEvent;

/// Identifies one attached front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationHandle(u64);

impl RegistrationHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "front-end #{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    entries: BTreeMap<u64, mpsc::Sender<StatusEvent>>,
}

/// One-to-many delivery of status events.
///
/// Cheap to clone; clones share the same set of registrations.
#[derive(Debug, Clone)]
pub struct FanOut {
    registry: Arc<Mutex<Registry>>,
    capacity: usize,
}

impl FanOut {
    /// Create a fan-out whose [`subscribe`](Self::subscribe) channels hold
    /// up to `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a front-end's delivery channel.
    ///
    /// Attaching a sender for a channel that is already attached returns the
    /// existing handle, so a single `detach` always fully removes it.
    pub fn attach(&self, tx: mpsc::Sender<StatusEvent>) -> RegistrationHandle {
        let mut registry = self.registry();
        if let Some(id) = registry
            .entries
            .iter()
            .find(|(_, existing)| existing.same_channel(&tx))
            .map(|(id, _)| *id)
        {
            return RegistrationHandle(id);
        }
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.insert(id, tx);
        debug!(front_end = id, attached = registry.entries.len(), "Front-end attached");
        RegistrationHandle(id)
    }

    /// Create a bounded channel, attach it, and return its receiving end.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let handle = self.attach(tx);
        Subscription {
            handle,
            rx,
            fanout: self.clone(),
        }
    }

    /// Remove a registration. Returns `false` if it was not attached.
    pub fn detach(&self, handle: RegistrationHandle) -> bool {
        let removed = self.registry().entries.remove(&handle.0).is_some();
        if removed {
            debug!(front_end = handle.0, "Front-end detached");
        }
        removed
    }

    pub fn is_attached(&self, handle: RegistrationHandle) -> bool {
        self.registry().entries.contains_key(&handle.0)
    }

    /// Number of currently attached front-ends.
    pub fn attached(&self) -> usize {
        self.registry().entries.len()
    }

    /// Deliver `event` to every front-end attached at the time of the call.
    ///
    /// Returns the number of front-ends that accepted the event.
    pub fn publish(&self, event: StatusEvent) -> usize {
        let snapshot: Vec<(u64, mpsc::Sender<StatusEvent>)> = self
            .registry()
            .entries
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut stale = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(front_end = id, "Front-end buffer full, detaching");
                    stale.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(front_end = id, "Front-end channel closed, detaching");
                    stale.push(id);
                }
            }
        }

        if !stale.is_empty() {
            let mut registry = self.registry();
            for id in stale {
                registry.entries.remove(&id);
            }
        }

        delivered
    }
}

/// The receiving end of a [`FanOut::subscribe`] registration.
///
/// Dropping the subscription detaches it. If the subscriber falls behind and
/// is detached, `recv` drains what was buffered and then returns `None`.
#[derive(Debug)]
pub struct Subscription {
    handle: RegistrationHandle,
    rx: mpsc::Receiver<StatusEvent>,
    fanout: FanOut,
}

impl Subscription {
    pub fn handle(&self) -> RegistrationHandle {
        self.handle
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.fanout.detach(self.handle);
    }
}
