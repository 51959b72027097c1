//! Subscription registry
//!
//! [`ObserverSet`] is the per-ride membership list behind reference-counted
//! channel sharing. The owning `ConnectionManager` holds the set under its
//! lock, so a broadcast reaches every current member before a subscribe or
//! unsubscribe issued in reaction to it takes effect.

use crate::observer::{Observer, ObserverId, RideEvent};

/// Observers of a single ride, in registration order.
#[derive(Debug, Default)]
pub struct ObserverSet {
    observers: Vec<Observer>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Returns `false` if it was already registered.
    pub fn insert(&mut self, observer: Observer) -> bool {
        if self.contains(observer.id()) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    /// Unregister an observer. Returns `false` if it was not registered.
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|observer| observer.id() != id);
        self.observers.len() != before
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.observers.iter().any(|observer| observer.id() == id)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn ids(&self) -> Vec<ObserverId> {
        self.observers.iter().map(Observer::id).collect()
    }

    /// Send `event` to the observer `id`, if registered.
    pub fn send_to(&self, id: ObserverId, event: RideEvent) -> bool {
        self.observers
            .iter()
            .find(|observer| observer.id() == id)
            .map(|observer| observer.deliver(event))
            .unwrap_or(false)
    }

    /// Send `event` to every observer. Returns how many received it.
    pub fn broadcast(&self, event: &RideEvent) -> usize {
        self.observers
            .iter()
            .filter(|observer| observer.deliver(event.clone()))
            .count()
    }

    /// Drop observers whose stream was dropped without unsubscribing.
    /// Returns how many were removed.
    pub fn prune_closed(&mut self) -> usize {
        let before = self.observers.len();
        self.observers.retain(|observer| !observer.is_closed());
        before - self.observers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = ObserverSet::new();
        let (observer, _stream) = Observer::channel();

        assert!(set.insert(observer.clone()));
        assert!(!set.insert(observer.clone()));
        assert_eq!(set.len(), 1);
        assert!(set.contains(observer.id()));
    }

    #[test]
    fn test_remove_unregistered_is_noop() {
        let mut set = ObserverSet::new();
        let (a, _a_stream) = Observer::channel();
        let (b, _b_stream) = Observer::channel();
        set.insert(a.clone());

        assert!(!set.remove(b.id()));
        assert_eq!(set.len(), 1);
        assert!(set.remove(a.id()));
        assert!(!set.remove(a.id()));
        assert!(set.is_empty());
    }

    #[test]
    fn test_broadcast_reaches_every_member() {
        let mut set = ObserverSet::new();
        let (a, mut a_stream) = Observer::channel();
        let (b, mut b_stream) = Observer::channel();
        set.insert(a);
        set.insert(b);

        assert_eq!(set.broadcast(&RideEvent::Connected), 2);
        assert_eq!(a_stream.drain(), vec![RideEvent::Connected]);
        assert_eq!(b_stream.drain(), vec![RideEvent::Connected]);
    }

    #[test]
    fn test_send_to_targets_one_member() {
        let mut set = ObserverSet::new();
        let (a, mut a_stream) = Observer::channel();
        let (b, mut b_stream) = Observer::channel();
        let b_id = b.id();
        set.insert(a);
        set.insert(b);

        assert!(set.send_to(b_id, RideEvent::Connected));
        assert!(a_stream.drain().is_empty());
        assert_eq!(b_stream.drain(), vec![RideEvent::Connected]);
    }

    #[test]
    fn test_prune_closed_observers() {
        let mut set = ObserverSet::new();
        let (a, a_stream) = Observer::channel();
        let (b, _b_stream) = Observer::channel();
        let b_id = b.id();
        set.insert(a);
        set.insert(b);

        drop(a_stream);
        assert_eq!(set.broadcast(&RideEvent::Connected), 1);
        assert_eq!(set.prune_closed(), 1);
        assert_eq!(set.ids(), vec![b_id]);
    }
}
