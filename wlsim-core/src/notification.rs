//! Publish/subscribe bus for simulation events.
//!
//! The bus lives as long as its [`Game`](crate::Game). Subscribers are
//! outside collaborators (UI, AI, test probes); the simulation never assumes
//! anybody listens. A [`Subscription`] unsubscribes when dropped.
//!
//! ```ignore
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let _sub = game.notes().subscribe(move |note| sink.lock().unwrap().push(note.clone()));
//! ```

use crate::geometry::Coords;
use crate::object::{Serial, Time};
use crate::player::{Message, PlayerNumber};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use wldata::DescriptionIndex;

#[derive(Debug, Clone, PartialEq)]
pub enum Note {
    /// Fields changed owner (`None` = became neutral).
    OwnershipChanged {
        owner: Option<PlayerNumber>,
        fields: Vec<Coords>,
    },
    PlayerMessage {
        player: PlayerNumber,
        message: Message,
    },
    WareDelivered {
        ware: DescriptionIndex,
        building: Serial,
        time: Time,
    },
    WorkerLost {
        player: PlayerNumber,
        worker: Serial,
        position: Coords,
    },
    SoldierKilled {
        player: PlayerNumber,
        soldier: Serial,
        position: Coords,
    },
    BuildingConquered {
        building: Serial,
        old_owner: PlayerNumber,
        new_owner: PlayerNumber,
    },
}

type Callback = Box<dyn FnMut(&Note) + Send>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback>,
}

/// Event bus owned by one game session.
#[derive(Clone, Default)]
pub struct NotificationBus {
    inner: Arc<Mutex<Subscribers>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`. Callbacks must not publish or subscribe themselves.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&Note) + Send + 'static,
    {
        let mut subs = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = subs.next_id;
        subs.next_id += 1;
        subs.callbacks.insert(id, Box::new(callback));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `note` to every subscriber in subscription order.
    pub fn publish(&self, note: &Note) {
        let mut subs = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        log::trace!("publish {:?} to {} subscribers", note, subs.callbacks.len());
        for callback in subs.callbacks.values_mut() {
            callback(note);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.callbacks.len(),
            Err(poisoned) => poisoned.into_inner().callbacks.len(),
        }
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle of a registered callback; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    bus: Weak<Mutex<Subscribers>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let mut subs = match bus.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            subs.callbacks.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> Note {
        Note::OwnershipChanged {
            owner: Some(1),
            fields: vec![Coords::new(1, 1)],
        }
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let bus = NotificationBus::new();
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        let sub = bus.subscribe(move |_| *sink.lock().unwrap() += 1);
        bus.publish(&note());
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        bus.publish(&note());
        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        NotificationBus::new().publish(&note());
    }

    #[test]
    fn test_subscription_outliving_bus() {
        let bus = NotificationBus::new();
        let sub = bus.subscribe(|_| {});
        drop(bus);
        drop(sub);
    }
}
