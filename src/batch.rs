use crate::form::FormInner;
use crate::scheduler::Scope;

/// Depth counter and merged scope of the batches open on one form.
///
/// While the depth is non-zero, notifications are not published; their
/// scopes are merged instead and published once by the outermost batch.
#[derive(Debug, Default)]
pub(crate) struct BatchState {
    depth: usize,
    pending: Option<Scope>,
}

impl BatchState {
    pub(crate) fn enter(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn is_active(&self) -> bool {
        self.depth > 0
    }

    /// Absorb `scope` if a batch is open. Returns false when the caller must
    /// publish immediately.
    pub(crate) fn defer(&mut self, scope: &Scope) -> bool {
        if !self.is_active() {
            return false;
        }
        match &mut self.pending {
            Some(pending) => pending.merge(scope.clone()),
            None => self.pending = Some(scope.clone()),
        }
        true
    }

    /// Close one level. Returns the merged scope when the outermost batch
    /// closed and something happened inside it.
    pub(crate) fn exit(&mut self) -> Option<Scope> {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.pending.take()
        } else {
            None
        }
    }
}

/// RAII guard that closes a batch even on panic.
///
/// When the outermost guard drops, one notification pass runs for
/// everything that changed inside the batch.
pub(crate) struct BatchGuard<'a> {
    form: &'a FormInner,
}

impl<'a> BatchGuard<'a> {
    pub(crate) fn new(form: &'a FormInner) -> Self {
        form.scheduler.begin_batch();
        Self { form }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if let Some(scope) = self.form.scheduler.end_batch() {
            self.form.publish(scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::FieldPath;

    fn fields(names: &[&str]) -> Scope {
        Scope::Fields(names.iter().map(|name| FieldPath::parse(name)).collect())
    }

    #[test]
    fn nothing_is_deferred_outside_a_batch() {
        let mut state = BatchState::default();
        assert!(!state.defer(&Scope::All));
        assert_eq!(state.exit(), None);
    }

    #[test]
    fn nested_batches_flush_once_with_merged_names() {
        let mut state = BatchState::default();
        state.enter();
        assert!(state.defer(&fields(&["a"])));
        state.enter();
        assert!(state.defer(&fields(&["b", "a"])));

        assert_eq!(state.exit(), None);
        assert_eq!(state.exit(), Some(fields(&["a", "b"])));
        assert!(!state.is_active());
    }

    #[test]
    fn form_wide_scope_absorbs_field_scopes() {
        let mut state = BatchState::default();
        state.enter();
        state.defer(&fields(&["a"]));
        state.defer(&Scope::All);
        state.defer(&fields(&["b"]));
        assert_eq!(state.exit(), Some(Scope::All));
    }

    #[test]
    fn empty_batches_publish_nothing() {
        let mut state = BatchState::default();
        state.enter();
        assert_eq!(state.exit(), None);
    }
}
