//! Element bindings.
//!
//! A [`FieldBinding`] is what a UI layer holds for one registered field. It
//! connects an element ([`FieldRef`]) to the form and forwards the element's
//! events. Change and blur events go through the form's trigger policy
//! ([`Mode`](crate::Mode) before the first submit,
//! [`ReValidateMode`](crate::ReValidateMode) after it) to decide whether the
//! field is validated.

use serde_json::Value;

use crate::batch::BatchGuard;
use crate::config::should_skip_validation;
use crate::element::FieldRef;
use crate::form::Form;
use crate::path::{self, FieldPath};
use crate::scheduler::Scope;

/// Handle to one registered field.
#[derive(Clone, Debug)]
pub struct FieldBinding {
    form: Form,
    name: FieldPath,
}

impl FieldBinding {
    pub(crate) fn new(form: Form, name: FieldPath) -> Self {
        Self { form, name }
    }

    /// The field's path.
    pub fn name(&self) -> &FieldPath {
        &self.name
    }

    /// The form the field belongs to.
    pub fn form(&self) -> &Form {
        &self.form
    }

    /// Connect an element. Options of radio and checkbox groups are attached
    /// one by one and merged into a single ref.
    pub fn attach(&self, field_ref: FieldRef) {
        self.form.attach(&self.name, field_ref);
    }

    /// The element went away.
    pub fn detach(&self) {
        self.form.detach(&self.name);
    }

    /// The element's value changed; read it through the element.
    pub fn on_change(&self) {
        if let Some(value) = self.form.get_field_value(&self.name) {
            self.form.handle_event(&self.name, value, false);
        }
    }

    /// The field's value changed to `value`; for controlled inputs that do
    /// not expose an element.
    pub fn on_input(&self, value: impl Into<Value>) {
        self.form.handle_event(&self.name, value.into(), false);
    }

    /// The element lost focus.
    pub fn on_blur(&self) {
        let value = self
            .form
            .get_field_value(&self.name)
            .unwrap_or_else(|| self.form.get_value(&self.name));
        self.form.handle_event(&self.name, value, true);
    }

    /// The element gained focus.
    pub fn on_focus(&self) {
        {
            let mut data = self.form.inner.data.lock();
            if data.disposed || !data.fields.contains(&self.name) {
                return;
            }
            data.focused = Some(self.name.clone());
        }
        self.form.inner.notify(Scope::field(self.name.clone()));
    }
}

impl Form {
    /// Read the live value of `name` through its element, applying the
    /// field's coercion. `None` without an attached element.
    pub fn get_field_value(&self, name: impl Into<FieldPath>) -> Option<Value> {
        let name = name.into();
        let (field_ref, rules) = {
            let data = self.inner.data.lock();
            let descriptor = data.fields.get(&name)?;
            (descriptor.field_ref.clone()?, descriptor.rules.clone())
        };
        Some(field_ref.read(&rules))
    }

    pub(crate) fn attach(&self, name: &FieldPath, field_ref: FieldRef) {
        let _batch = BatchGuard::new(&self.inner);
        let (attached, existing) = {
            let mut data = self.inner.data.lock();
            if data.disposed {
                return;
            }
            let existing = path::get(&data.values, name).cloned();
            let Some(descriptor) = data.fields.get_mut(name) else {
                tracing::warn!(field = %name, "attach to unregistered field ignored");
                return;
            };
            let merged = descriptor
                .field_ref
                .as_mut()
                .is_some_and(|current| current.merge_option(&field_ref));
            if !merged {
                descriptor.field_ref = Some(field_ref);
            }
            let attached = descriptor.field_ref.clone();
            let rules = descriptor.rules.clone();
            data.fields.mark_mounted(name);
            (attached.map(|r| (r, rules)), existing)
        };
        let Some((field_ref, rules)) = attached else {
            return;
        };

        match existing {
            Some(value) => field_ref.write(&value),
            None => {
                let value = field_ref.read(&rules);
                path::set(&mut self.inner.data.lock().values, name, value);
                self.inner.notify(Scope::field(name.clone()));
            }
        }

        let focus = {
            let mut data = self.inner.data.lock();
            let matches = data
                .pending_focus
                .as_ref()
                .is_some_and(|prefix| name.starts_with(prefix));
            if matches {
                cov_mark::hit!(row_field_focused_on_attach);
                data.pending_focus = None;
            }
            matches
        };
        if focus {
            field_ref.focus();
        }
        self.update_validity();
    }

    pub(crate) fn detach(&self, name: &FieldPath) {
        let group = {
            let data = self.inner.data.lock();
            let Some(descriptor) = data.fields.get(name) else {
                return;
            };
            descriptor.field_ref.clone().filter(FieldRef::is_group)
        };
        // Liveness is asked of the elements without holding the lock.
        let live = group.and_then(|field_ref| field_ref.live());

        let mut data = self.inner.data.lock();
        let policy = self.inner.settings.should_unregister;
        let Some(descriptor) = data.fields.get_mut(name) else {
            return;
        };
        if let Some(live) = live {
            cov_mark::hit!(group_stays_mounted_while_options_live);
            descriptor.field_ref = Some(live);
            return;
        }
        descriptor.mounted = false;
        if descriptor.should_unregister(policy) {
            data.fields.mark_unmounted(name);
        }
        tracing::trace!(field = %name, "field detached");
    }

    /// Apply a change (or blur) of `name` to `value` and validate it if the
    /// trigger policy says so.
    pub(crate) fn handle_event(&self, name: &FieldPath, value: Value, is_blur: bool) {
        let _batch = BatchGuard::new(&self.inner);
        let validate = {
            let mut data = self.inner.data.lock();
            if data.disposed {
                return;
            }
            let Some(descriptor) = data.fields.get(name) else {
                return;
            };
            if data.disabled || descriptor.is_disabled() {
                return;
            }
            let deps = descriptor.rules.deps.clone();
            let has_validation = descriptor.rules.has_validation()
                || self.inner.resolver.is_some()
                || !deps.is_empty()
                || data.errors.contains(name);
            let settings = &self.inner.settings;
            let skip = !has_validation
                || should_skip_validation(
                    is_blur,
                    data.touched.contains(name),
                    data.is_submitted,
                    settings.re_validate_mode.triggers(),
                    settings.mode.triggers(),
                );

            path::set(&mut data.values, name, value);
            if is_blur {
                data.touched.set(name, true);
                if data.focused.as_ref() == Some(name) {
                    data.focused = None;
                }
            } else {
                data.refresh_dirty(name);
            }
            (!skip).then(|| {
                let mut names = vec![name.clone()];
                names.extend(deps);
                names
            })
        };
        self.inner.notify(Scope::field(name.clone()));
        match validate {
            Some(names) => self.validate_in_background(names),
            None => self.update_validity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FormConfig, Mode, ReValidateMode};
    use crate::element::{CheckableElement, Focusable};
    use crate::element::testing::{FakeInput, FakeOption};
    use crate::form::{UnregisterOptions, create_form};
    use crate::rules::Rules;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn attach_reads_the_element_when_no_value_exists() {
        let form = create_form(FormConfig::new()).unwrap();
        let input = FakeInput::with_value("typed");
        form.register("a", Rules::new()).attach(FieldRef::Text(input));
        assert_eq!(form.get_value("a"), json!("typed"));
    }

    #[test]
    fn attach_writes_an_existing_value() {
        let form = create_form(FormConfig::new().default_values(json!({ "a": "x" }))).unwrap();
        let input = FakeInput::with_value("");
        form.register("a", Rules::new())
            .attach(FieldRef::Text(input.clone()));
        assert_eq!(*input.value.lock(), json!("x"));
    }

    #[test]
    fn on_change_in_submit_mode_only_tracks_dirty_state() {
        let form = create_form(FormConfig::new().mode(Mode::OnSubmit)).unwrap();
        let input = FakeInput::with_value("");
        let name = form.register("a", Rules::new().required(true));
        name.attach(FieldRef::Text(input.clone()));

        input.type_text("hello");
        name.on_change();
        let state = form.get_field_state("a");
        assert!(state.is_dirty);
        assert!(!state.invalid);

        input.type_text("");
        name.on_change();
        assert!(!form.get_field_state("a").invalid);
    }

    #[test]
    fn on_blur_validates_in_blur_mode_and_marks_touched() {
        let form = create_form(FormConfig::new().mode(Mode::OnBlur)).unwrap();
        let input = FakeInput::with_value("");
        let name = form.register("a", Rules::new().required(true));
        name.attach(FieldRef::Text(input.clone()));

        name.on_change();
        assert!(!form.get_field_state("a").invalid);
        name.on_blur();
        let state = form.get_field_state("a");
        assert!(state.is_touched);
        assert!(state.invalid);
    }

    #[test]
    fn on_touched_mode_validates_changes_after_the_first_blur() {
        let form = create_form(
            FormConfig::new()
                .mode(Mode::OnTouched)
                .re_validate_mode(ReValidateMode::OnChange),
        )
        .unwrap();
        let name = form.register("a", Rules::new().min_length(3));

        name.on_input("ab");
        assert!(!form.get_field_state("a").invalid);
        name.on_blur();
        assert!(form.get_field_state("a").invalid);
        name.on_input("abc");
        assert!(!form.get_field_state("a").invalid);
    }

    #[test]
    fn focus_and_blur_track_the_focused_field() {
        let form = create_form(FormConfig::new()).unwrap();
        let name = form.register("a", Rules::new());
        name.on_focus();
        assert_eq!(form.form_state().focused_field, Some("a".into()));
        name.on_blur();
        assert_eq!(form.form_state().focused_field, None);
    }

    #[test]
    fn radio_group_stays_mounted_until_every_option_is_gone() {
        cov_mark::check!(group_stays_mounted_while_options_live);
        let form = create_form(FormConfig::new().should_unregister(true)).unwrap();
        let yes = FakeOption::new("yes", true);
        let no = FakeOption::new("no", false);
        let binding = form.register("answer", Rules::new());
        binding.attach(FieldRef::Radio(vec![yes.clone() as Arc<dyn CheckableElement>]));
        binding.attach(FieldRef::Radio(vec![no.clone() as Arc<dyn CheckableElement>]));
        assert_eq!(form.get_value("answer"), json!("yes"));

        yes.disconnect();
        binding.detach();
        assert_eq!(form.remove_unmounted(), 0);

        no.disconnect();
        binding.detach();
        assert_eq!(form.remove_unmounted(), 1);
        assert_eq!(form.get_value("answer"), Value::Null);
        form.unregister("answer", UnregisterOptions::default());
    }

    /// An option that reads the form whenever its liveness is checked.
    struct ReadsFormOnProbe {
        form: parking_lot::Mutex<Option<Form>>,
        connected: AtomicBool,
    }

    impl Focusable for ReadsFormOnProbe {
        fn is_connected(&self) -> bool {
            if let Some(form) = self.form.lock().as_ref() {
                form.get_values();
            }
            self.connected.load(Ordering::SeqCst)
        }
    }

    impl CheckableElement for ReadsFormOnProbe {
        fn option_value(&self) -> Option<Value> {
            Some(json!("x"))
        }

        fn is_checked(&self) -> bool {
            false
        }

        fn set_checked(&self, _checked: bool) {}
    }

    #[test]
    fn liveness_checks_may_read_the_form() {
        let form = create_form(FormConfig::new().should_unregister(true)).unwrap();
        let option = Arc::new(ReadsFormOnProbe {
            form: parking_lot::Mutex::new(Some(form.clone())),
            connected: AtomicBool::new(true),
        });
        let binding = form.register("pick", Rules::new());
        binding.attach(FieldRef::Checkbox(vec![
            option.clone() as Arc<dyn CheckableElement>,
        ]));

        binding.detach();
        assert_eq!(form.remove_unmounted(), 0);

        option.connected.store(false, Ordering::SeqCst);
        binding.detach();
        assert_eq!(form.remove_unmounted(), 1);
        option.form.lock().take();
    }
}
