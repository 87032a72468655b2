//! Selective notification of form-state subscribers.
//!
//! Every mutating form operation ends with one notification pass:
//!
//! 1. The form builds a fresh [`FormState`] snapshot.
//! 2. The scheduler diffs it against the previous snapshot and bumps the
//!    revision counter of every changed slice.
//! 3. The pass is queued and, unless a pass is already draining, drained
//!    through the [`Subject`].
//! 4. Each subscriber checks its name filter against the pass's scope and
//!    its interested slices against the revisions it last observed, and is
//!    only called when both match.
//!
//! A subscriber that mutates the form from its callback does not recurse:
//! the new pass is queued behind the current one and delivered with the
//! post-mutation snapshot once the current pass finishes. Draining repeats
//! until the queue is empty.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::batch::BatchState;
use crate::hash::FastIndexMap;
use crate::path::FieldPath;
use crate::state::{FormState, Revisions, Slices};
use crate::subject::{Subject, Subscription};

/// Passes drained in one go before the scheduler starts warning about a
/// subscriber that keeps mutating the form.
const RUNAWAY_PASSES: usize = 1_000;

/// Which fields an operation touched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Scope {
    /// Form-wide operation; every name filter matches.
    All,
    /// Only these fields.
    Fields(Vec<FieldPath>),
}

impl Scope {
    pub(crate) fn field(path: FieldPath) -> Self {
        Scope::Fields(vec![path])
    }

    pub(crate) fn merge(&mut self, other: Scope) {
        match other {
            Scope::All => *self = Scope::All,
            Scope::Fields(more) => {
                if let Scope::Fields(names) = self {
                    for name in more {
                        if !names.contains(&name) {
                            names.push(name);
                        }
                    }
                }
            }
        }
    }
}

/// What a subscriber wants to hear about.
///
/// ```ignore
/// // Errors of `users` or anything below it
/// let interest = Interest::new(Slices::ERRORS).name("users");
/// // Only the exact path `users.0.name`
/// let exact = Interest::new(Slices::VALUES).name("users.0.name").exact(true);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Interest {
    pub(crate) slices: Slices,
    pub(crate) names: Option<Vec<FieldPath>>,
    pub(crate) exact: bool,
}

impl Interest {
    /// Interest in `slices` of every field.
    pub fn new(slices: Slices) -> Self {
        Self {
            slices,
            names: None,
            exact: false,
        }
    }

    /// Interest in every slice.
    pub fn all() -> Self {
        Self::new(Slices::all())
    }

    /// Restrict to operations on `name`, its ancestors or its descendants.
    pub fn name(mut self, name: impl Into<FieldPath>) -> Self {
        self.names.get_or_insert_with(Vec::new).push(name.into());
        self
    }

    /// Restrict to several names.
    pub fn names<I, P>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        self.names
            .get_or_insert_with(Vec::new)
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Only match identical paths.
    pub fn exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    /// The slices this interest covers.
    pub fn slices(&self) -> Slices {
        self.slices
    }

    fn accepts(&self, scope: &Scope) -> bool {
        let Some(filters) = &self.names else {
            return true;
        };
        match scope {
            Scope::All => true,
            Scope::Fields(names) => names.iter().any(|name| {
                filters.iter().any(|filter| {
                    if self.exact {
                        filter == name
                    } else {
                        filter.is_related(name)
                    }
                })
            }),
        }
    }
}

/// One notification pass.
pub(crate) struct Notification {
    scope: Scope,
    state: Arc<FormState>,
    revisions: Revisions,
}

struct SchedulerState {
    last: Arc<FormState>,
    revisions: Revisions,
    queue: VecDeque<Notification>,
    draining: bool,
    batch: BatchState,
}

/// Per-form notification scheduler.
pub(crate) struct Scheduler {
    subject: Subject<Notification>,
    state: Mutex<SchedulerState>,
    interests: Arc<Mutex<FastIndexMap<u64, Slices>>>,
    next_interest: AtomicU64,
}

/// Resets the draining flag even if a subscriber panics.
struct DrainGuard<'a> {
    state: &'a Mutex<SchedulerState>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().draining = false;
    }
}

impl Scheduler {
    pub(crate) fn new(initial: FormState) -> Self {
        Self {
            subject: Subject::new(),
            state: Mutex::new(SchedulerState {
                last: Arc::new(initial),
                revisions: Revisions::default(),
                queue: VecDeque::new(),
                draining: false,
                batch: BatchState::default(),
            }),
            interests: Arc::new(Mutex::new(FastIndexMap::default())),
            next_interest: AtomicU64::new(0),
        }
    }

    /// Latest published snapshot.
    pub(crate) fn snapshot(&self) -> Arc<FormState> {
        Arc::clone(&self.state.lock().last)
    }

    /// Register a subscriber.
    ///
    /// The subscriber starts out having seen the current revisions, so it is
    /// only called for changes that happen after it subscribed.
    pub(crate) fn subscribe<F>(&self, interest: Interest, callback: F) -> Subscription
    where
        F: Fn(&FormState) + Send + Sync + 'static,
    {
        let id = self.next_interest.fetch_add(1, Ordering::Relaxed);
        self.interests.lock().insert(id, interest.slices);

        let seen = Mutex::new(self.state.lock().revisions.clone());
        let slices = interest.slices;
        let inner = self.subject.subscribe(move |pass: &Notification| {
            if !interest.accepts(&pass.scope) {
                return;
            }
            let fresh = {
                let mut seen = seen.lock();
                let fresh = pass.revisions.differs(&seen, slices);
                if fresh {
                    seen.observe(&pass.revisions, slices);
                }
                fresh
            };
            if fresh {
                callback(&pass.state);
            }
        });

        let interests = Arc::downgrade(&self.interests);
        Subscription::new(move || {
            inner.unsubscribe();
            if let Some(interests) = interests.upgrade() {
                interests.lock().shift_remove(&id);
            }
        })
    }

    /// True when some subscriber is interested in any of `slices`.
    pub(crate) fn tracks(&self, slices: Slices) -> bool {
        self.interests
            .lock()
            .values()
            .any(|interest| interest.intersects(slices))
    }

    pub(crate) fn begin_batch(&self) {
        self.state.lock().batch.enter();
    }

    pub(crate) fn end_batch(&self) -> Option<Scope> {
        self.state.lock().batch.exit()
    }

    /// Absorb `scope` into an open batch. False when no batch is open.
    pub(crate) fn defer(&self, scope: &Scope) -> bool {
        self.state.lock().batch.defer(scope)
    }

    /// Publish `next` as the new snapshot and notify interested subscribers.
    pub(crate) fn publish(&self, scope: Scope, next: FormState) {
        {
            let mut state = self.state.lock();
            let changed = state.last.changed(&next);
            if changed.is_empty() {
                cov_mark::hit!(unchanged_pass_skipped);
                return;
            }
            state.revisions.bump(changed);
            let next = Arc::new(next);
            state.last = Arc::clone(&next);
            let revisions = state.revisions.clone();
            state.queue.push_back(Notification {
                scope,
                state: next,
                revisions,
            });
            if state.draining {
                // A subscriber mutated the form; the current drain loop
                // delivers this pass after the one in progress.
                cov_mark::hit!(reentrant_pass_queued);
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    /// Deliver queued passes until none are left.
    fn drain(&self) {
        let _guard = DrainGuard { state: &self.state };
        let mut passes = 0;
        loop {
            let Some(pass) = self.state.lock().queue.pop_front() else {
                break;
            };
            passes += 1;
            if passes == RUNAWAY_PASSES {
                tracing::warn!(
                    passes,
                    "form notifications did not settle; a subscriber keeps mutating the form"
                );
            }
            self.subject.next(&pass);
        }
        tracing::trace!(passes, "notification passes drained");
    }

    /// Drop every subscriber.
    pub(crate) fn close(&self) {
        self.subject.unsubscribe();
        self.interests.lock().clear();
        self.state.lock().queue.clear();
    }
}
