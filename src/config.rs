//! Form configuration.
//!
//! [`FormConfig`] is a builder: every setter takes `self` and returns the
//! updated config, and every option has a documented default.
//!
//! ```ignore
//! let form = create_form(
//!     FormConfig::new()
//!         .mode(Mode::OnBlur)
//!         .re_validate_mode(ReValidateMode::OnChange)
//!         .default_values(json!({ "firstName": "" })),
//! )?;
//! ```
//!
//! The serializable subset of the options is also available as
//! [`FormSettings`], so it can be read from JSON alongside other settings.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resolver::Resolver;

/// Unknown name passed to one of the mode parsers.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{name}`")]
pub struct ParseModeError {
    kind: &'static str,
    name: String,
}

/// When fields validate before the first submit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Only on submit.
    #[default]
    OnSubmit,
    /// On blur.
    OnBlur,
    /// On every change.
    OnChange,
    /// On the first blur, then on every change.
    OnTouched,
    /// On blur and on change.
    All,
}

/// When fields re-validate after a submit attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReValidateMode {
    /// On every change.
    #[default]
    OnChange,
    /// On blur.
    OnBlur,
    /// Only on submit.
    OnSubmit,
}

/// How many failures are collected per field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CriteriaMode {
    /// Stop at the first failed rule.
    #[default]
    FirstError,
    /// Evaluate every rule and record each failure.
    All,
}

macro_rules! mode_names {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),* $(,)? }) => {
        impl $ty {
            /// Name used in serialized settings.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)*
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseModeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)*
                    _ => Err(ParseModeError {
                        kind: $kind,
                        name: s.to_owned(),
                    }),
                }
            }
        }
    };
}

mode_names!(Mode, "validation mode", {
    OnSubmit => "onSubmit",
    OnBlur => "onBlur",
    OnChange => "onChange",
    OnTouched => "onTouched",
    All => "all",
});

mode_names!(ReValidateMode, "re-validation mode", {
    OnChange => "onChange",
    OnBlur => "onBlur",
    OnSubmit => "onSubmit",
});

mode_names!(CriteriaMode, "criteria mode", {
    FirstError => "firstError",
    All => "all",
});

/// Serializable form options.
///
/// Missing keys take the same defaults as [`FormConfig::new`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormSettings {
    /// See [`FormConfig::mode`].
    pub mode: Mode,
    /// See [`FormConfig::re_validate_mode`].
    pub re_validate_mode: ReValidateMode,
    /// See [`FormConfig::criteria_mode`].
    pub criteria_mode: CriteriaMode,
    /// See [`FormConfig::should_unregister`].
    pub should_unregister: bool,
    /// See [`FormConfig::should_focus_error`].
    pub should_focus_error: bool,
    /// See [`FormConfig::should_use_native_validation`].
    pub should_use_native_validation: bool,
    /// See [`FormConfig::disabled`].
    pub disabled: bool,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            re_validate_mode: ReValidateMode::default(),
            criteria_mode: CriteriaMode::default(),
            should_unregister: false,
            should_focus_error: true,
            should_use_native_validation: false,
            disabled: false,
        }
    }
}

/// Builder for a form.
#[derive(Clone)]
pub struct FormConfig {
    pub(crate) settings: FormSettings,
    pub(crate) default_values: Value,
    pub(crate) resolver: Option<Arc<dyn Resolver>>,
    pub(crate) context: Option<Value>,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FormConfig {
    /// Create a config with default settings.
    ///
    /// Defaults:
    /// - `mode`: [`Mode::OnSubmit`]
    /// - `re_validate_mode`: [`ReValidateMode::OnChange`]
    /// - `criteria_mode`: [`CriteriaMode::FirstError`]
    /// - `default_values`: `{}`
    /// - `resolver`: none, built-in rules are used
    /// - `should_unregister`: `false`
    /// - `should_focus_error`: `true`
    /// - `should_use_native_validation`: `false`
    /// - `disabled`: `false`
    pub fn new() -> Self {
        Self::from_settings(FormSettings::default())
    }

    /// Start from deserialized settings.
    pub fn from_settings(settings: FormSettings) -> Self {
        Self {
            settings,
            default_values: Value::Object(Default::default()),
            resolver: None,
            context: None,
        }
    }

    /// Validation trigger before the first submit.
    ///
    /// Default: [`Mode::OnSubmit`]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.settings.mode = mode;
        self
    }

    /// Validation trigger after the first submit.
    ///
    /// Default: [`ReValidateMode::OnChange`]
    pub fn re_validate_mode(mut self, mode: ReValidateMode) -> Self {
        self.settings.re_validate_mode = mode;
        self
    }

    /// Collect the first failure per field, or all of them.
    ///
    /// Default: [`CriteriaMode::FirstError`]
    pub fn criteria_mode(mut self, mode: CriteriaMode) -> Self {
        self.settings.criteria_mode = mode;
        self
    }

    /// Initial values; also the reference for dirty tracking. Must be an
    /// object (or `null`, meaning `{}`).
    ///
    /// Default: `{}`
    pub fn default_values(mut self, values: impl Into<Value>) -> Self {
        self.default_values = values.into();
        self
    }

    /// Validate through a resolver instead of per-field rules.
    ///
    /// Default: none
    pub fn resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Value handed to the resolver on every call.
    ///
    /// Default: none
    pub fn context(mut self, context: impl Into<Value>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Drop values of fields when they are unregistered or unmounted.
    ///
    /// Default: `false`
    pub fn should_unregister(mut self, should_unregister: bool) -> Self {
        self.settings.should_unregister = should_unregister;
        self
    }

    /// Focus the first invalid field after a failed submit.
    ///
    /// Default: `true`
    pub fn should_focus_error(mut self, should_focus_error: bool) -> Self {
        self.settings.should_focus_error = should_focus_error;
        self
    }

    /// Report errors through the elements' native validity API.
    ///
    /// Default: `false`
    pub fn should_use_native_validation(mut self, native: bool) -> Self {
        self.settings.should_use_native_validation = native;
        self
    }

    /// Disable every field.
    ///
    /// Default: `false`
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.settings.disabled = disabled;
        self
    }

    /// The serializable part of this config.
    pub fn settings(&self) -> &FormSettings {
        &self.settings
    }
}

impl fmt::Debug for FormConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormConfig")
            .field("settings", &self.settings)
            .field("default_values", &self.default_values)
            .field("resolver", &self.resolver.is_some())
            .field("context", &self.context)
            .finish()
    }
}

/// Which events validate a field right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Triggers {
    pub(crate) on_submit: bool,
    pub(crate) on_blur: bool,
    pub(crate) on_change: bool,
    pub(crate) on_touch: bool,
    pub(crate) on_all: bool,
}

impl Mode {
    pub(crate) fn triggers(self) -> Triggers {
        Triggers {
            on_submit: self == Mode::OnSubmit,
            on_blur: self == Mode::OnBlur,
            on_change: self == Mode::OnChange,
            on_touch: self == Mode::OnTouched,
            on_all: self == Mode::All,
        }
    }
}

impl ReValidateMode {
    pub(crate) fn triggers(self) -> Triggers {
        Triggers {
            on_submit: self == ReValidateMode::OnSubmit,
            on_blur: self == ReValidateMode::OnBlur,
            on_change: self == ReValidateMode::OnChange,
            on_touch: false,
            on_all: false,
        }
    }
}

/// Decide whether a change or blur may skip validation.
///
/// `touched` is the field's touched flag, `submitted` whether a submit was
/// attempted.
pub(crate) fn should_skip_validation(
    is_blur: bool,
    touched: bool,
    submitted: bool,
    re_validate: Triggers,
    mode: Triggers,
) -> bool {
    if mode.on_all {
        return false;
    }
    if !submitted && mode.on_touch {
        return !(touched || is_blur);
    }
    let active = if submitted { re_validate } else { mode };
    if active.on_blur {
        return !is_blur;
    }
    if active.on_change {
        return is_blur;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_parse_and_print_their_wire_names() {
        assert_eq!("onTouched".parse::<Mode>(), Ok(Mode::OnTouched));
        assert_eq!(ReValidateMode::OnBlur.to_string(), "onBlur");
        assert_eq!("all".parse::<CriteriaMode>(), Ok(CriteriaMode::All));
        assert_eq!(
            "sometimes".parse::<Mode>().unwrap_err().to_string(),
            "unknown validation mode `sometimes`"
        );
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: FormSettings =
            serde_json::from_str(r#"{ "mode": "onBlur", "criteriaMode": "all" }"#).unwrap();
        assert_eq!(settings.mode, Mode::OnBlur);
        assert_eq!(settings.criteria_mode, CriteriaMode::All);
        assert_eq!(settings.re_validate_mode, ReValidateMode::OnChange);
        assert!(settings.should_focus_error);
    }

    #[test]
    fn on_submit_skips_until_submitted() {
        let mode = Mode::OnSubmit.triggers();
        let re = ReValidateMode::OnChange.triggers();
        assert!(should_skip_validation(false, false, false, re, mode));
        assert!(!should_skip_validation(false, false, true, re, mode));
        assert!(should_skip_validation(true, false, true, re, mode));
    }

    #[test]
    fn on_touched_validates_changes_after_first_blur() {
        let mode = Mode::OnTouched.triggers();
        let re = ReValidateMode::OnChange.triggers();
        assert!(should_skip_validation(false, false, false, re, mode));
        assert!(!should_skip_validation(true, false, false, re, mode));
        assert!(!should_skip_validation(false, true, false, re, mode));
    }

    #[test]
    fn all_mode_never_skips() {
        let mode = Mode::All.triggers();
        let re = ReValidateMode::OnSubmit.triggers();
        assert!(!should_skip_validation(true, false, false, re, mode));
        assert!(!should_skip_validation(false, false, true, re, mode));
    }
}
