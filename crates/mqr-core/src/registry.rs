//! The hook registry.
//!
//! [`HookRegistry`] is filled once at startup through
//! [`register`](HookRegistry::register) and then shared read-only (behind an
//! `Arc`) by every dispatch. Each hook is sorted into exactly one
//! [`HookCategory`] when it is registered, and indexed under every event kind
//! it applies to, so the dispatcher never has to filter at dispatch time.
//!
//! Within one `(kind, category)` bucket hooks are ordered by priority (lower
//! first), ties keeping registration order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::envelope::EventKind;
use crate::error::{RegistryError, RegistryResult};
use crate::hook::Hook;

/// The dispatch phase a hook takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookCategory {
    /// No keywords and the listen-all flag: sees every event first.
    ListeningAll,
    /// At least one keyword.
    Keyword,
    /// Neither: catch-all fallback.
    Default,
}

impl HookCategory {
    /// Classifies a hook. Keywords take precedence over the listen-all flag.
    pub fn of(hook: &Hook) -> Self {
        if !hook.keywords().is_empty() {
            Self::Keyword
        } else if hook.is_listen_all() {
            Self::ListeningAll
        } else {
            Self::Default
        }
    }
}

impl fmt::Display for HookCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ListeningAll => "listening_all",
            Self::Keyword => "keyword",
            Self::Default => "default",
        })
    }
}

/// All registered hooks, indexed by name and by `(event kind, category)`.
#[derive(Default)]
pub struct HookRegistry {
    by_name: HashMap<String, Arc<Hook>>,
    index: HashMap<(EventKind, HookCategory), Vec<Arc<Hook>>>,
    /// Registration order of names, for listing.
    order: Vec<String>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateName`] if a hook with the same name exists;
    /// the registry is left unchanged.
    pub fn register(&mut self, hook: Hook) -> RegistryResult<()> {
        if self.by_name.contains_key(hook.name()) {
            return Err(RegistryError::DuplicateName(hook.name().to_string()));
        }

        let category = HookCategory::of(&hook);
        if hook.is_listen_all() && category == HookCategory::Keyword {
            warn!(
                hook = hook.name(),
                "Hook declares keywords and listen-all; registering it as a keyword hook"
            );
        }
        if hook.event_kinds().is_empty() {
            warn!(
                hook = hook.name(),
                "Hook applies to no event kind and will only run as a held hook"
            );
        }

        let hook = Arc::new(hook);
        let priority = hook.get_priority();
        for kind in hook.event_kinds() {
            let bucket = self.index.entry((*kind, category)).or_default();
            let pos = bucket.partition_point(|h| h.get_priority() <= priority);
            bucket.insert(pos, Arc::clone(&hook));
        }

        info!(
            hook = hook.name(),
            category = %category,
            priority,
            "Hook registered"
        );
        self.order.push(hook.name().to_string());
        self.by_name.insert(hook.name().to_string(), hook);
        Ok(())
    }

    /// Registers several hooks, stopping at the first failure.
    pub fn register_all(&mut self, hooks: impl IntoIterator<Item = Hook>) -> RegistryResult<()> {
        hooks.into_iter().try_for_each(|hook| self.register(hook))
    }

    /// Hooks of `category` applicable to `kind`, in dispatch order.
    pub fn hooks_for(&self, kind: EventKind, category: HookCategory) -> &[Arc<Hook>] {
        self.index
            .get(&(kind, category))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Looks a hook up by name, whatever its category.
    pub fn get(&self, name: &str) -> Option<&Arc<Hook>> {
        self.by_name.get(name)
    }

    /// Names of all hooks, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.order)
            .finish()
    }
}
