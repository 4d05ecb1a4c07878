//! Single-threaded publish/subscribe primitives for the UI thread.
//!
//! [`Subject`] is a plain event stream. [`Signal`] additionally keeps its latest
//! value and replays it to new subscribers. Subscriptions unsubscribe on drop;
//! a [`Lifetime`] groups them so a whole component can be torn down at once.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type Listener<T> = Rc<dyn Fn(&T)>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// A multicast stream of values with no memory.
pub struct Subject<T> {
    listeners: Rc<RefCell<Listeners<T>>>,
}

impl<T: 'static> Subject<T> {
    pub fn new() -> Self {
        Self {
            listeners: Rc::new(RefCell::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Delivers `value` to every current listener, in subscription order.
    pub fn emit(&self, value: T) {
        // Listeners may subscribe or emit while we iterate.
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .borrow()
            .entries
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(&value);
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        let id = {
            let mut listeners = self.listeners.borrow_mut();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Rc::new(listener)));
            id
        };
        let weak: Weak<RefCell<Listeners<T>>> = Rc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.borrow_mut().entries.retain(|(entry, _)| *entry != id);
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().entries.len()
    }
}

impl<T: 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Rc::clone(&self.listeners),
        }
    }
}

struct SignalInner<T> {
    value: RefCell<T>,
    changes: Subject<T>,
}

/// Latest value plus change notification.
///
/// Cloning a signal yields another handle to the same value.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T: Clone + 'static> Signal<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                value: RefCell::new(initial),
                changes: Subject::new(),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Stores `value` and notifies listeners even if it is unchanged.
    pub fn replace(&self, value: T) {
        *self.inner.value.borrow_mut() = value.clone();
        self.inner.changes.emit(value);
    }

    /// Calls `listener` with the current value, then with every later one.
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        let current = self.get();
        listener(&current);
        self.inner.changes.subscribe(listener)
    }

    /// Like [`subscribe`](Self::subscribe) without the replay.
    pub fn subscribe_changes(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        self.inner.changes.subscribe(listener)
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Stores `value` unless it equals the current one. Returns whether
    /// listeners were notified.
    pub fn set(&self, value: T) -> bool {
        if *self.inner.value.borrow() == value {
            return false;
        }
        self.replace(value);
        true
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Detaches a listener when dropped.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

/// Owns the subscriptions of a mounted component.
pub struct Lifetime {
    subscriptions: RefCell<Vec<Subscription>>,
    ended: Cell<bool>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self {
            subscriptions: RefCell::new(Vec::new()),
            ended: Cell::new(false),
        }
    }

    /// Ties `subscription` to this lifetime. After [`end`](Self::end) it is
    /// dropped right away.
    pub fn hold(&self, subscription: Subscription) {
        if self.ended.get() {
            return;
        }
        self.subscriptions.borrow_mut().push(subscription);
    }

    /// Drops every held subscription. Later calls are no-ops.
    pub fn end(&self) {
        if self.ended.replace(true) {
            return;
        }
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        drop(subscriptions);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.get()
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}
