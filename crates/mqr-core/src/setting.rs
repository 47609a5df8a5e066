//! Per-invocation hook settings.
//!
//! Before a hook runs, the dispatcher asks a [`SettingsProvider`] for the
//! hook's setting and binds it to a task-local slot for the duration of that
//! single invocation ([`with_setting`]). Handlers read it back with
//! [`current_setting`] (or [`HookContext::setting`](crate::HookContext::setting))
//! instead of receiving it as an argument.
//!
//! The binding is only visible while the invocation's future is being polled:
//! it is gone once the future completes, fails, panics or is dropped, and it
//! is never seen by other events dispatched concurrently. Tasks spawned from a
//! handler do not inherit it.
//!
//! A failing lookup is not an error for the hook: it runs with an absent
//! setting and the failure is logged.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::SettingsError;

tokio::task_local! {
    static CURRENT_SETTING: HookSetting;
}

/// The setting bound to the running hook.
#[derive(Debug, Clone, PartialEq)]
pub struct HookSetting {
    name: Arc<str>,
    value: Option<Value>,
}

impl HookSetting {
    pub fn new(name: impl Into<Arc<str>>, value: Option<Value>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Name of the hook this setting belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw value, `None` if the store has nothing for this hook.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// The value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }

    /// Deserializes the value into `T`, falling back to `T::default()` when it
    /// is absent or does not fit.
    pub fn get<T: DeserializeOwned + Default>(&self) -> T {
        let Some(value) = &self.value else {
            return T::default();
        };
        serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!(hook = %self.name, error = %e, "Hook setting does not deserialize, using default");
            T::default()
        })
    }
}

/// Source of hook settings, queried once per hook invocation.
pub trait SettingsProvider: Send + Sync {
    /// Looks up the setting for `hook_name`. `Ok(None)` means "no setting".
    fn get_setting(&self, hook_name: &str) -> Result<Option<Value>, SettingsError>;
}

/// A provider with no settings at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSettings;

impl SettingsProvider for NoSettings {
    fn get_setting(&self, _hook_name: &str) -> Result<Option<Value>, SettingsError> {
        Ok(None)
    }
}

/// In-memory settings store that can be updated while the bot runs.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    /// Sets (or replaces) the setting for `hook_name`.
    pub fn set(&self, hook_name: impl Into<String>, value: impl Into<Value>) {
        self.values.write().insert(hook_name.into(), value.into());
    }

    /// Removes the setting for `hook_name`, returning it.
    pub fn remove(&self, hook_name: &str) -> Option<Value> {
        self.values.write().remove(hook_name)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl SettingsProvider for MemorySettings {
    fn get_setting(&self, hook_name: &str) -> Result<Option<Value>, SettingsError> {
        Ok(self.values.read().get(hook_name).cloned())
    }
}

impl<T: SettingsProvider + ?Sized> SettingsProvider for Arc<T> {
    fn get_setting(&self, hook_name: &str) -> Result<Option<Value>, SettingsError> {
        (**self).get_setting(hook_name)
    }
}

/// Runs `fut` with the setting of `hook_name` bound as the current setting.
pub async fn with_setting<F>(settings: &dyn SettingsProvider, hook_name: &str, fut: F) -> F::Output
where
    F: Future,
{
    let value = match settings.get_setting(hook_name) {
        Ok(value) => value,
        Err(e) => {
            warn!(hook = hook_name, error = %e, "Settings lookup failed, running hook without a setting");
            None
        }
    };
    trace!(hook = hook_name, has_setting = value.is_some(), "Binding hook setting");

    CURRENT_SETTING
        .scope(HookSetting::new(hook_name, value), fut)
        .await
}

/// The setting bound to the hook currently running on this task, if any.
pub fn current_setting() -> Option<HookSetting> {
    CURRENT_SETTING.try_with(HookSetting::clone).ok()
}
