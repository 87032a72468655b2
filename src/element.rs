//! Live element capabilities.
//!
//! The engine never talks to a UI toolkit directly. A binding layer hands it
//! one of the [`FieldRef`] variants, each wrapping the handful of operations
//! the engine needs for that kind of element. Reading a field's live value is
//! a total match over the variant.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::rules::Rules;

/// Operations shared by every element kind.
///
/// Everything has a harmless default so simple bindings only implement what
/// they support.
pub trait Focusable: Send + Sync {
    /// Move keyboard focus to the element.
    fn focus(&self) {}

    /// Select the element's text.
    fn select(&self) {}

    /// Set the native validation message; empty clears it.
    fn set_custom_validity(&self, _message: &str) {}

    /// Show the native validation message. Returns validity.
    fn report_validity(&self) -> bool {
        true
    }

    /// Disabled elements do not contribute values.
    ///
    /// Queried while the form's state is locked, so it must not call back
    /// into the form.
    fn is_disabled(&self) -> bool {
        false
    }

    /// False once the element has been removed from its document.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Text-like input holding a single value.
pub trait InputElement: Focusable {
    /// Current raw value.
    fn value(&self) -> Value;
    /// Replace the displayed value.
    fn set_value(&self, value: &Value);
}

/// One checkbox or radio option.
pub trait CheckableElement: Focusable {
    /// The option's value attribute, `None` when it has none.
    fn option_value(&self) -> Option<Value>;
    /// Whether the option is checked.
    fn is_checked(&self) -> bool;
    /// Check or uncheck the option.
    fn set_checked(&self, checked: bool);
}

/// A select element allowing multiple selection.
pub trait SelectElement: Focusable {
    /// Every option as `(value, selected)`.
    fn options(&self) -> Vec<(Value, bool)>;
    /// Select exactly the options whose value is in `values`.
    fn set_selected(&self, values: &[Value]);
}

/// A file picker.
pub trait FileElement: Focusable {
    /// The selected files, passed through unchanged.
    fn files(&self) -> Value;
    /// Replace the selection; `null` clears it.
    fn set_files(&self, files: &Value);
}

/// The live element(s) behind one registered field.
#[derive(Clone)]
pub enum FieldRef {
    /// A single text-like input.
    Text(Arc<dyn InputElement>),
    /// One checkbox (boolean value) or a group (array of checked values).
    Checkbox(Vec<Arc<dyn CheckableElement>>),
    /// A radio group.
    Radio(Vec<Arc<dyn CheckableElement>>),
    /// A multi-select.
    MultiSelect(Arc<dyn SelectElement>),
    /// A file input.
    FileList(Arc<dyn FileElement>),
    /// A custom control whose value is taken as-is.
    Custom(Arc<dyn InputElement>),
}

impl FieldRef {
    /// Single text-like input.
    pub fn text(element: impl InputElement + 'static) -> Self {
        FieldRef::Text(Arc::new(element))
    }

    /// One checkbox option.
    pub fn checkbox(element: impl CheckableElement + 'static) -> Self {
        FieldRef::Checkbox(vec![Arc::new(element)])
    }

    /// One radio option.
    pub fn radio(element: impl CheckableElement + 'static) -> Self {
        FieldRef::Radio(vec![Arc::new(element)])
    }

    /// Custom control.
    pub fn custom(element: impl InputElement + 'static) -> Self {
        FieldRef::Custom(Arc::new(element))
    }

    /// Radio and checkbox groups are backed by several elements.
    pub fn is_group(&self) -> bool {
        matches!(self, FieldRef::Checkbox(_) | FieldRef::Radio(_))
    }

    /// Every element as a [`Focusable`].
    pub fn elements(&self) -> Vec<&dyn Focusable> {
        match self {
            FieldRef::Text(element) | FieldRef::Custom(element) => {
                vec![&**element as &dyn Focusable]
            }
            FieldRef::Checkbox(options) | FieldRef::Radio(options) => options
                .iter()
                .map(|option| &**option as &dyn Focusable)
                .collect(),
            FieldRef::MultiSelect(element) => vec![&**element as &dyn Focusable],
            FieldRef::FileList(element) => vec![&**element as &dyn Focusable],
        }
    }

    /// First element that can take focus.
    pub fn focus(&self) {
        if let Some(element) = self.elements().into_iter().find(|e| !e.is_disabled()) {
            element.focus();
            element.select();
        }
    }

    /// True while at least one backing element is still connected.
    pub fn is_live(&self) -> bool {
        self.elements().iter().any(|element| element.is_connected())
    }

    /// True when every backing element is disabled.
    pub fn is_disabled(&self) -> bool {
        self.elements().iter().all(|element| element.is_disabled())
    }

    /// Forward a validation message to the elements' native validity API.
    pub(crate) fn report_validity(&self, message: &str) {
        for element in self.elements() {
            element.set_custom_validity(message);
            element.report_validity();
        }
    }

    /// Merge another option of the same group into this ref.
    ///
    /// Returns false when `other` is not a compatible group option; the caller
    /// then replaces the ref instead.
    pub(crate) fn merge_option(&mut self, other: &FieldRef) -> bool {
        match (self, other) {
            (FieldRef::Checkbox(options), FieldRef::Checkbox(new))
            | (FieldRef::Radio(options), FieldRef::Radio(new)) => {
                for option in new {
                    if !options.iter().any(|known| Arc::ptr_eq(known, option)) {
                        options.push(Arc::clone(option));
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// A copy without the options that are no longer connected, or `None`
    /// when nothing live remains.
    pub(crate) fn live(&self) -> Option<FieldRef> {
        match self {
            FieldRef::Checkbox(options) => connected(options).map(FieldRef::Checkbox),
            FieldRef::Radio(options) => connected(options).map(FieldRef::Radio),
            _ => self.is_live().then(|| self.clone()),
        }
    }

    /// Read the field's value from its elements.
    ///
    /// Checkbox groups yield the array of checked option values; a single
    /// checkbox yields its value (or `true`) when checked and `false`
    /// otherwise. Radio groups yield the checked option's value. Text and
    /// custom inputs go through the rules' coercion.
    pub fn read(&self, rules: &Rules) -> Value {
        match self {
            FieldRef::Checkbox(options) if options.len() > 1 => Value::Array(
                options
                    .iter()
                    .filter(|option| option.is_checked() && !option.is_disabled())
                    .filter_map(|option| option.option_value())
                    .collect(),
            ),
            FieldRef::Checkbox(options) => match options.first() {
                Some(option) if option.is_checked() && !option.is_disabled() => {
                    match option.option_value() {
                        Some(Value::String(text)) if text.is_empty() => Value::Bool(true),
                        Some(value) => value,
                        None => Value::Bool(true),
                    }
                }
                _ => Value::Bool(false),
            },
            FieldRef::Radio(options) => options
                .iter()
                .find(|option| option.is_checked() && !option.is_disabled())
                .and_then(|option| option.option_value())
                .unwrap_or(Value::Null),
            FieldRef::MultiSelect(select) => Value::Array(
                select
                    .options()
                    .into_iter()
                    .filter_map(|(value, selected)| selected.then_some(value))
                    .collect(),
            ),
            FieldRef::FileList(input) => input.files(),
            FieldRef::Text(input) => rules.coerce(input.value()),
            FieldRef::Custom(input) => match &rules.set_value_as {
                Some(set_value_as) => set_value_as(input.value()),
                None => input.value(),
            },
        }
    }

    /// Push a value into the elements.
    pub fn write(&self, value: &Value) {
        match self {
            FieldRef::Checkbox(options) if options.len() > 1 => {
                let selected = value.as_array().map(Vec::as_slice).unwrap_or_default();
                for option in options {
                    let checked = option
                        .option_value()
                        .is_some_and(|own| selected.contains(&own));
                    option.set_checked(checked);
                }
            }
            FieldRef::Checkbox(options) => {
                for option in options {
                    let checked = match value {
                        Value::Bool(checked) => *checked,
                        Value::Array(values) => option
                            .option_value()
                            .is_some_and(|own| values.contains(&own)),
                        Value::Null => false,
                        other => option.option_value().as_ref() == Some(other),
                    };
                    option.set_checked(checked);
                }
            }
            FieldRef::Radio(options) => {
                for option in options {
                    option.set_checked(option.option_value().as_ref() == Some(value));
                }
            }
            FieldRef::MultiSelect(select) => match value {
                Value::Array(values) => select.set_selected(values),
                Value::Null => select.set_selected(&[]),
                single => select.set_selected(std::slice::from_ref(single)),
            },
            FieldRef::FileList(input) => input.set_files(value),
            FieldRef::Text(input) => match value {
                Value::Null => input.set_value(&Value::String(String::new())),
                value => input.set_value(value),
            },
            FieldRef::Custom(input) => input.set_value(value),
        }
    }
}

fn connected(options: &[Arc<dyn CheckableElement>]) -> Option<Vec<Arc<dyn CheckableElement>>> {
    let live: Vec<_> = options
        .iter()
        .filter(|option| option.is_connected())
        .cloned()
        .collect();
    (!live.is_empty()).then_some(live)
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Text(_) => f.write_str("Text"),
            FieldRef::Checkbox(options) => write!(f, "Checkbox({})", options.len()),
            FieldRef::Radio(options) => write!(f, "Radio({})", options.len()),
            FieldRef::MultiSelect(_) => f.write_str("MultiSelect"),
            FieldRef::FileList(_) => f.write_str("FileList"),
            FieldRef::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// In-memory elements for tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// A text input recording focus and validity calls.
    #[derive(Default)]
    pub(crate) struct FakeInput {
        pub(crate) value: Mutex<Value>,
        pub(crate) focused: AtomicUsize,
        pub(crate) validity: Mutex<Option<String>>,
        pub(crate) disconnected: AtomicBool,
    }

    impl FakeInput {
        pub(crate) fn with_value(value: impl Into<Value>) -> Arc<Self> {
            Arc::new(Self {
                value: Mutex::new(value.into()),
                ..Self::default()
            })
        }

        pub(crate) fn type_text(&self, value: impl Into<Value>) {
            *self.value.lock() = value.into();
        }

        pub(crate) fn focus_count(&self) -> usize {
            self.focused.load(Ordering::SeqCst)
        }

        pub(crate) fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    impl Focusable for FakeInput {
        fn focus(&self) {
            self.focused.fetch_add(1, Ordering::SeqCst);
        }

        fn set_custom_validity(&self, message: &str) {
            *self.validity.lock() = Some(message.to_owned());
        }

        fn is_connected(&self) -> bool {
            !self.disconnected.load(Ordering::SeqCst)
        }
    }

    impl InputElement for FakeInput {
        fn value(&self) -> Value {
            self.value.lock().clone()
        }

        fn set_value(&self, value: &Value) {
            *self.value.lock() = value.clone();
        }
    }

    /// One checkbox or radio option.
    pub(crate) struct FakeOption {
        pub(crate) value: Option<Value>,
        pub(crate) checked: AtomicBool,
        pub(crate) disconnected: AtomicBool,
    }

    impl FakeOption {
        pub(crate) fn new(value: impl Into<Value>, checked: bool) -> Arc<Self> {
            Arc::new(Self {
                value: Some(value.into()),
                checked: AtomicBool::new(checked),
                disconnected: AtomicBool::new(false),
            })
        }

        pub(crate) fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    impl Focusable for FakeOption {
        fn is_connected(&self) -> bool {
            !self.disconnected.load(Ordering::SeqCst)
        }
    }

    impl CheckableElement for FakeOption {
        fn option_value(&self) -> Option<Value> {
            self.value.clone()
        }

        fn is_checked(&self) -> bool {
            self.checked.load(Ordering::SeqCst)
        }

        fn set_checked(&self, checked: bool) {
            self.checked.store(checked, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeInput, FakeOption};
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn group(options: &[Arc<FakeOption>]) -> Vec<Arc<dyn CheckableElement>> {
        options
            .iter()
            .map(|option| Arc::clone(option) as Arc<dyn CheckableElement>)
            .collect()
    }

    #[test]
    fn checkbox_groups_read_checked_values() {
        let options = [
            FakeOption::new("a", true),
            FakeOption::new("b", false),
            FakeOption::new("c", true),
        ];
        let field = FieldRef::Checkbox(group(&options));
        assert_eq!(field.read(&Rules::new()), json!(["a", "c"]));

        field.write(&json!(["b"]));
        assert_eq!(field.read(&Rules::new()), json!(["b"]));
    }

    #[test]
    fn single_checkbox_reads_as_boolean_without_value() {
        let option = Arc::new(FakeOption {
            value: None,
            checked: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
        });
        let field = FieldRef::Checkbox(vec![option.clone() as Arc<dyn CheckableElement>]);
        assert_eq!(field.read(&Rules::new()), json!(true));

        field.write(&json!(false));
        assert_eq!(field.read(&Rules::new()), json!(false));
    }

    #[test]
    fn radio_reads_the_checked_option() {
        let options = [FakeOption::new("x", false), FakeOption::new("y", true)];
        let field = FieldRef::Radio(group(&options));
        assert_eq!(field.read(&Rules::new()), json!("y"));

        field.write(&json!("x"));
        assert!(options[0].is_checked());
        assert!(!options[1].is_checked());
    }

    #[test]
    fn text_reads_apply_coercion() {
        let input = FakeInput::with_value("42");
        let field = FieldRef::Text(input.clone());
        assert_eq!(field.read(&Rules::new().value_as_number()), json!(42.0));
        assert_eq!(field.read(&Rules::new()), json!("42"));

        field.write(&Value::Null);
        assert_eq!(input.value(), json!(""));
    }

    #[test]
    fn group_options_merge_without_duplicates() {
        let a = FakeOption::new("a", false);
        let b = FakeOption::new("b", false);
        let mut field = FieldRef::Radio(group(&[a.clone()]));

        assert!(field.merge_option(&FieldRef::Radio(group(&[a.clone(), b.clone()]))));
        assert_eq!(field.elements().len(), 2);
        assert!(!field.merge_option(&FieldRef::Text(FakeInput::with_value(""))));

        a.disconnected.store(true, Ordering::SeqCst);
        let live = field.live().unwrap();
        assert_eq!(live.elements().len(), 1);
        b.disconnected.store(true, Ordering::SeqCst);
        assert!(field.live().is_none());
    }
}
