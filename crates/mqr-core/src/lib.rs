//! # mqr Core
//!
//! The dispatch engine of the mqr bot framework.
//!
//! An event-source adapter turns platform events into [`EventEnvelope`]s and
//! hands them to the [`Dispatcher`], which picks at most one [`Hook`] to
//! process each event.
//!
//! ## Building blocks
//!
//! - **Envelopes**: normalized events and their sender scope ([`EventEnvelope`], [`ActorKey`])
//! - **Hooks**: named handlers with kinds, keywords and priority ([`Hook`], [`HookResult`])
//! - **Registry**: hooks indexed by event kind and category ([`HookRegistry`])
//! - **Held conversations**: single-shot continuations per sender ([`HoldStore`])
//! - **Settings**: per-invocation ambient hook settings ([`SettingsProvider`], [`current_setting`])
//! - **Dispatcher**: four-phase routing ([`Dispatcher`], [`DispatchOutcome`])
//!
//! ## Dispatch phases
//!
//! ```text
//!              ┌──────────────┐   ┌──────┐   ┌─────────┐   ┌─────────┐
//! envelope ───▶│ listening-all│──▶│ held │──▶│ keyword │──▶│ default │
//!              └──────┬───────┘   └──┬───┘   └────┬────┘   └────┬────┘
//!                     └──────────────┴────────────┴─────────────┴──▶ first processed hook
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mqr_core::{Dispatcher, EventEnvelope, EventKind, Hook, HookContext, HookRegistry, HookResult};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut registry = HookRegistry::new();
//!     registry.register(
//!         Hook::new("greet", |_ctx: HookContext| async { HookResult::reply("hello!") })
//!             .on(EventKind::GroupMessage)
//!             .equals("hi"),
//!     )?;
//!
//!     let dispatcher = Dispatcher::new(Arc::new(registry));
//!     let outcome = dispatcher
//!         .dispatch(EventEnvelope::new(EventKind::GroupMessage, "10001", "20002", "Hi"))
//!         .await;
//!     assert_eq!(outcome.hook_name(), Some("greet"));
//!     Ok(())
//! }
//! ```

pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod hold;
pub mod hook;
pub mod keyword;
pub mod registry;
pub mod setting;

pub use dispatcher::{DispatchOutcome, Dispatcher, Handled, HeldPolicy};
pub use envelope::{ActorKey, EventEnvelope, EventKind, JoinKind, Mention, Payload};
pub use error::{RegistryError, RegistryResult, SettingsError};
pub use hold::{HoldRecord, HoldStore};
pub use hook::{
    BoxedHookHandler, Hook, HookContext, HookHandler, HookOutput, HookResult, IntoHookResult,
    JoinDecision, Trigger, TriggerKind,
};
pub use keyword::{KeywordMatch, KeywordSets, MatchStrategy, match_keyword};
pub use registry::{HookCategory, HookRegistry};
pub use setting::{
    HookSetting, MemorySettings, NoSettings, SettingsProvider, current_setting, with_setting,
};

/// Prelude for writing hooks.
pub mod prelude {
    pub use super::{
        EventEnvelope, EventKind, Hook, HookContext, HookOutput, HookResult, JoinDecision,
        JoinKind, Payload, Trigger,
    };
}
