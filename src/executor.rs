//! Bookkeeping for asynchronous validation.
//!
//! Two pieces live here:
//!
//! - **Attempts**: every validation of a field is issued a [`Ticket`] carrying
//!   a monotonically increasing attempt number and the value it validated.
//!   When the validation settles, its result is applied only if the ticket is
//!   still the latest one for the field and the field still holds the same
//!   value. Superseding is the only cancellation mechanism.
//!
//! - **Queue**: validations started implicitly (change, blur, `set_value`,
//!   validity tracking) cannot be awaited by their caller. When they suspend,
//!   their futures are parked here and driven by [`ValidationQueue::flush`].
//!   Only the newest whole-form validity check is kept; parking another one
//!   drops its predecessor, whose result would be discarded anyway.
//!
//! ## Usage
//!
//! ```ignore
//! form.set_value("email", "a@b.c", SetValueOptions::new().should_validate(true));
//! // the async `validate` rule of `email` is parked now
//! form.flush_validations().await;
//! ```

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use serde_json::Value;

use crate::hash::FastHashMap;
use crate::path::FieldPath;

/// Identifies one validation attempt of one field.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Ticket {
    pub(crate) name: FieldPath,
    attempt: u64,
    value: Value,
}

/// Latest attempt per field.
#[derive(Debug, Default)]
pub(crate) struct Attempts {
    latest: Mutex<FastHashMap<FieldPath, u64>>,
    counter: AtomicU64,
}

impl Attempts {
    /// Start a new attempt for `name`, superseding any attempt in flight.
    pub(crate) fn issue(&self, name: &FieldPath, value: Value) -> Ticket {
        let attempt = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.latest.lock().insert(name.clone(), attempt);
        Ticket {
            name: name.clone(),
            attempt,
            value,
        }
    }

    /// True while no newer attempt was issued for the ticket's field.
    pub(crate) fn is_latest(&self, ticket: &Ticket) -> bool {
        self.latest.lock().get(&ticket.name) == Some(&ticket.attempt)
    }

    /// True when the ticket's result may be applied given the field's
    /// current value.
    pub(crate) fn is_current(&self, ticket: &Ticket, current: &Value) -> bool {
        let current = self.is_latest(ticket) && ticket.value == *current;
        if !current {
            cov_mark::hit!(stale_validation_discarded);
            tracing::debug!(
                field = %ticket.name,
                attempt = ticket.attempt,
                "discarding superseded validation result"
            );
        }
        current
    }

    /// Mark the ticket's attempt as finished. Returns false when a newer
    /// attempt is still running.
    pub(crate) fn settle(&self, ticket: &Ticket) -> bool {
        let mut latest = self.latest.lock();
        if latest.get(&ticket.name) == Some(&ticket.attempt) {
            latest.remove(&ticket.name);
            true
        } else {
            false
        }
    }

    /// Forget every attempt at or below `prefix`. Results still in flight for
    /// those fields are discarded when they settle.
    pub(crate) fn forget_under(&self, prefix: &FieldPath) {
        self.latest.lock().retain(|name, _| !name.starts_with(prefix));
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.latest.lock().len()
    }
}

/// Futures of implicit validations waiting to be driven.
#[derive(Default)]
pub(crate) struct ValidationQueue {
    pending: Mutex<Vec<BoxFuture<'static, ()>>>,
    validity: Mutex<Option<BoxFuture<'static, ()>>>,
}

impl ValidationQueue {
    pub(crate) fn push(&self, validation: BoxFuture<'static, ()>) {
        self.pending.lock().push(validation);
    }

    /// Park a validity check in place of the one parked before it.
    pub(crate) fn replace_validity(&self, check: BoxFuture<'static, ()>) {
        if self.validity.lock().replace(check).is_some() {
            cov_mark::hit!(superseded_validity_dropped);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len() + usize::from(self.validity.lock().is_some())
    }

    pub(crate) fn clear(&self) {
        self.pending.lock().clear();
        self.validity.lock().take();
    }

    /// Drive every parked validation to completion, including validations
    /// parked while flushing. Returns how many completed.
    pub(crate) async fn flush(&self) -> usize {
        let mut completed = 0;
        loop {
            let mut batch = mem::take(&mut *self.pending.lock());
            batch.extend(self.validity.lock().take());
            if batch.is_empty() {
                break;
            }
            let mut running: FuturesUnordered<_> = batch.into_iter().collect();
            while running.next().await.is_some() {
                completed += 1;
            }
        }
        tracing::trace!(completed, "validation queue flushed");
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn newer_attempts_supersede_older_ones() {
        cov_mark::check!(stale_validation_discarded);
        let attempts = Attempts::default();
        let name = FieldPath::parse("email");

        let first = attempts.issue(&name, json!("a"));
        let second = attempts.issue(&name, json!("ab"));

        assert!(attempts.is_current(&second, &json!("ab")));
        assert!(attempts.settle(&second));
        assert!(!attempts.is_current(&first, &json!("a")));
        assert!(!attempts.settle(&first));
    }

    #[test]
    fn a_changed_value_invalidates_the_ticket() {
        let attempts = Attempts::default();
        let ticket = attempts.issue(&FieldPath::parse("age"), json!(3));
        assert!(!attempts.is_current(&ticket, &json!(4)));
        assert!(attempts.is_latest(&ticket));
    }

    #[test]
    fn forgetting_a_subtree_drops_its_attempts() {
        let attempts = Attempts::default();
        let row = attempts.issue(&FieldPath::parse("users.0.name"), json!(""));
        attempts.issue(&FieldPath::parse("title"), json!(""));

        attempts.forget_under(&FieldPath::parse("users"));
        assert!(!attempts.is_latest(&row));
        assert_eq!(attempts.in_flight(), 1);
    }

    #[test]
    fn flush_drives_validations_parked_while_flushing() {
        let queue = Arc::new(ValidationQueue::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner = {
            let log = log.clone();
            Box::pin(async move { log.lock().push("inner") }) as BoxFuture<'static, ()>
        };
        let outer = {
            let queue = queue.clone();
            let log = log.clone();
            Box::pin(async move {
                log.lock().push("outer");
                queue.push(inner);
            })
        };
        queue.push(outer);

        assert_eq!(block_on(queue.flush()), 2);
        assert_eq!(*log.lock(), ["outer", "inner"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn only_the_newest_validity_check_is_kept() {
        cov_mark::check_count!(superseded_validity_dropped, 2);
        let queue = ValidationQueue::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        for round in 0..3 {
            let log = log.clone();
            queue.replace_validity(Box::pin(async move { log.lock().push(round) }));
        }
        queue.push(Box::pin(async {}));
        assert_eq!(queue.len(), 2);

        assert_eq!(block_on(queue.flush()), 2);
        assert_eq!(*log.lock(), [2]);
    }
}
