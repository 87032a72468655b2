use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::hash::FastIndexMap;

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SubjectInner<T> {
    observers: Mutex<FastIndexMap<u64, Observer<T>>>,
    next_id: AtomicU64,
}

/// Minimal synchronous observable
///
/// Observers are called in subscription order, on the emitting thread, for
/// every value passed to [`next`](Subject::next) after they subscribed. There
/// is no buffering and no replay.
///
/// # Usage
/// ```ignore
/// let subject = Subject::new();
/// let subscription = subject.subscribe(|value: &u32| println!("got {value}"));
///
/// subject.next(&1); // prints "got 1"
/// subscription.unsubscribe();
/// subject.next(&2); // nobody is listening
/// ```
///
/// # Reentrancy
/// The observer list is copied out of the lock before any observer runs, so
/// observers may subscribe, unsubscribe or emit again. Changes take effect
/// from the next emission.
pub struct Subject<T> {
    inner: Arc<SubjectInner<T>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Subject<T> {
    /// Create a subject without observers
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubjectInner {
                observers: Mutex::new(FastIndexMap::default()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Add an observer
    ///
    /// The returned [`Subscription`] removes it again. Dropping the
    /// subscription does NOT unsubscribe.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.lock().insert(id, Arc::new(observer));

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.lock().shift_remove(&id);
            }
        })
    }

    /// Emit `value` to every current observer
    pub fn next(&self, value: &T) {
        // Take the observers out of the lock: they may re-enter this subject.
        let observers: Vec<Observer<T>> = self.inner.observers.lock().values().cloned().collect();
        for observer in observers {
            observer(value);
        }
    }

    /// Remove every observer at once
    pub fn unsubscribe(&self) {
        self.inner.observers.lock().clear();
    }

    /// Number of current observers
    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }
}

impl<T: 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("observers", &self.inner.observers.lock().len())
            .finish()
    }
}

/// Handle returned by `subscribe`
///
/// Call [`unsubscribe`](Subscription::unsubscribe) to stop receiving values.
/// Unsubscribing twice, or after the owner is gone, is a no-op.
#[must_use = "dropping a Subscription keeps the observer registered"]
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Stop receiving values
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// True until [`unsubscribe`](Subscription::unsubscribe) is called
    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observers_run_in_subscription_order() {
        let subject = Subject::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _a = subject.subscribe({
            let log = log.clone();
            move |v: &u32| log.lock().push(("a", *v))
        });
        let _b = subject.subscribe({
            let log = log.clone();
            move |v: &u32| log.lock().push(("b", *v))
        });

        subject.next(&1);
        assert_eq!(*log.lock(), [("a", 1), ("b", 1)]);
    }

    #[test]
    fn late_subscribers_see_no_replay() {
        let subject = Subject::new();
        subject.next(&1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = subject.subscribe({
            let seen = seen.clone();
            move |v: &u32| seen.lock().push(*v)
        });
        subject.next(&2);
        assert_eq!(*seen.lock(), [2]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let subject = Subject::<u32>::new();
        let sub = subject.subscribe(|_| {});
        let other = subject.subscribe(|_| {});

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(subject.observer_count(), 1);

        subject.unsubscribe();
        assert_eq!(subject.observer_count(), 0);
        other.unsubscribe();
    }

    #[test]
    fn observers_may_unsubscribe_while_emitting() {
        let subject = Subject::<u32>::new();
        let calls = Arc::new(Mutex::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let sub = subject.subscribe({
            let calls = calls.clone();
            let slot = slot.clone();
            move |_| {
                *calls.lock() += 1;
                if let Some(sub) = slot.lock().take() {
                    sub.unsubscribe();
                }
            }
        });
        *slot.lock() = Some(sub);

        subject.next(&1);
        subject.next(&2);
        assert_eq!(*calls.lock(), 1);
    }
}
