//! Error types for the mqr core.
//!
//! Handler failures are not represented here: they are `anyhow::Error`s that
//! the dispatcher logs and absorbs.

use thiserror::Error;

/// Errors raised while building the hook registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A hook with the same name is already registered.
    #[error("hook '{0}' is already registered")]
    DuplicateName(String),
}

/// Failure of a settings collaborator.
///
/// The dispatcher never propagates these: the hook runs without a setting.
#[derive(Debug, Clone, Error)]
pub enum SettingsError {
    /// The backing store could not be reached.
    #[error("settings store unavailable: {0}")]
    Unavailable(String),

    /// The stored value could not be read.
    #[error("invalid setting for hook '{hook}': {reason}")]
    Invalid {
        /// Hook whose setting is broken.
        hook: String,
        /// What went wrong.
        reason: String,
    },
}

impl SettingsError {
    pub fn invalid(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            hook: hook.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
