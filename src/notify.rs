//! Notification plumbing: single-threaded observer channels with
//! registration-order dispatch and explicit unsubscribe.
//!
//! Listeners run on the owner thread, in the order they subscribed.
//! Emission snapshots the listener list first, so a callback may
//! subscribe or unsubscribe without invalidating the dispatch in
//! progress; listeners added during an emission fire from the next one.

use std::cell::RefCell;
use std::rc::Rc;

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Rc<dyn Fn(&T)>)>,
}

/// A typed notification channel.
pub struct Channel<T> {
    inner: RefCell<Listeners<T>>,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(Listeners { next_id: 0, entries: Vec::new() }),
        }
    }

    /// Register a listener; it stays active until unsubscribed.
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> SubscriptionId {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.entries.push((id, Rc::new(listener)));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.borrow_mut().entries.retain(|(sid, _)| *sid != id);
    }

    /// Remove every listener. Used on teardown.
    pub fn clear(&self) {
        self.inner.borrow_mut().entries.clear();
    }

    /// Deliver a value to all listeners in registration order.
    pub fn send(&self, value: &T) {
        let snapshot: Vec<Rc<dyn Fn(&T)>> = self
            .inner
            .borrow()
            .entries
            .iter()
            .map(|(_, f)| Rc::clone(f))
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().entries.len()
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// A payload-less notification.
#[derive(Default, Debug)]
pub struct Notification {
    channel: Channel<()>,
}

impl Notification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn() + 'static) -> SubscriptionId {
        self.channel.subscribe(move |_| listener())
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.channel.unsubscribe(id);
    }

    pub fn clear(&self) {
        self.channel.clear();
    }

    pub fn notify(&self) {
        self.channel.send(&());
    }

    pub fn listener_count(&self) -> usize {
        self.channel.listener_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn listeners_fire_in_registration_order() {
        let channel: Channel<i32> = Channel::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s1 = Rc::clone(&seen);
        channel.subscribe(move |v| s1.borrow_mut().push(("first", *v)));
        let s2 = Rc::clone(&seen);
        channel.subscribe(move |v| s2.borrow_mut().push(("second", *v)));

        channel.send(&7);
        assert_eq!(*seen.borrow(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let note = Notification::new();
        let count = Rc::new(RefCell::new(0));

        let c = Rc::clone(&count);
        let id = note.subscribe(move || *c.borrow_mut() += 1);

        note.notify();
        note.unsubscribe(id);
        note.notify();

        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn subscribing_during_emission_does_not_fire_immediately() {
        let channel: Rc<Channel<()>> = Rc::new(Channel::new());
        let count = Rc::new(RefCell::new(0));

        let ch = Rc::clone(&channel);
        let c = Rc::clone(&count);
        channel.subscribe(move |_| {
            let c2 = Rc::clone(&c);
            ch.subscribe(move |_| *c2.borrow_mut() += 1);
        });

        channel.send(&());
        assert_eq!(*count.borrow(), 0);
        channel.send(&());
        assert_eq!(*count.borrow(), 1);
    }
}
