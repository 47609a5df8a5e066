//! Hooks: named units of logic that may claim an event.
//!
//! A [`Hook`] bundles a [`HookHandler`] with everything the dispatcher needs
//! to decide *when* to call it: the event kinds it applies to, its keyword
//! sets, the listen-all flag and its priority.
//!
//! Handlers are usually plain async closures taking a [`HookContext`]:
//!
//! ```rust,ignore
//! use mqr_core::{EventKind, Hook, HookContext, HookResult};
//!
//! let greet = Hook::new("greet", |ctx: HookContext| async move {
//!     HookResult::reply(format!("hello, {}", ctx.actor_id()))
//! })
//! .on(EventKind::GroupMessage)
//! .equals("hi");
//! ```
//!
//! A handler may return either a bare [`HookResult`] or any
//! `Result<HookResult, E>` whose error converts into [`anyhow::Error`].

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{EventEnvelope, EventKind};
use crate::keyword::{KeywordSets, MatchStrategy};
use crate::setting::{self, HookSetting};

// ============================================================================
// Trigger
// ============================================================================

/// Why a hook was selected for the current invocation.
///
/// The data a trigger carries is assigned by the dispatcher only: the active
/// keyword exists exactly when the trigger is [`Trigger::Keyword`], and the
/// held context exactly when it is [`Trigger::Held`].
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// The hook observes every event of its kinds.
    ListeningAll,
    /// The sender's previous turn was held by this hook; carries what the hook saved.
    Held(Value),
    /// One of the hook's keywords matched; carries the keyword as declared.
    Keyword(String),
    /// Catch-all fallback.
    Default,
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::ListeningAll => TriggerKind::ListeningAll,
            Self::Held(_) => TriggerKind::Held,
            Self::Keyword(_) => TriggerKind::Keyword,
            Self::Default => TriggerKind::Default,
        }
    }
}

/// Data-less counterpart of [`Trigger`], reported with dispatch results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ListeningAll,
    Held,
    Keyword,
    Default,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ListeningAll => "listening_all",
            Self::Held => "held",
            Self::Keyword => "keyword",
            Self::Default => "default",
        })
    }
}

// ============================================================================
// HookContext
// ============================================================================

/// What a handler receives: the shared envelope plus this invocation's trigger.
///
/// Derefs to [`EventEnvelope`], so `ctx.text()` and `ctx.actor_id()` work
/// directly.
#[derive(Debug, Clone)]
pub struct HookContext {
    envelope: Arc<EventEnvelope>,
    trigger: Trigger,
}

impl HookContext {
    pub(crate) fn new(envelope: Arc<EventEnvelope>, trigger: Trigger) -> Self {
        Self { envelope, trigger }
    }

    pub fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// The keyword that selected this hook, when triggered by keyword.
    pub fn active_keyword(&self) -> Option<&str> {
        match &self.trigger {
            Trigger::Keyword(keyword) => Some(keyword),
            _ => None,
        }
    }

    /// What this hook saved when it held the sender's conversation.
    pub fn held_context(&self) -> Option<&Value> {
        match &self.trigger {
            Trigger::Held(context) => Some(context),
            _ => None,
        }
    }

    /// The setting bound for the running hook, if the settings store has one.
    ///
    /// Only meaningful while the dispatcher is running this hook.
    pub fn setting(&self) -> Option<HookSetting> {
        setting::current_setting()
    }
}

impl Deref for HookContext {
    type Target = EventEnvelope;

    fn deref(&self) -> &EventEnvelope {
        &self.envelope
    }
}

// ============================================================================
// HookResult
// ============================================================================

/// Decision on a member-join request, applied by the event-source adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinDecision {
    Accept,
    Reject,
    Ignore,
}

/// Handler-specific output carried by a [`HookResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HookOutput {
    /// Nothing to publish beyond the fact the event was handled.
    #[default]
    Empty,
    /// A text reply.
    Text(String),
    /// Any structured value.
    Value(Value),
    /// A decision for a member-join request.
    Decision(JoinDecision),
}

/// What a handler reports back to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookResult {
    /// Whether this hook fully handled the event. Stops further dispatch.
    pub processed: bool,
    /// Output for downstream consumers.
    pub output: HookOutput,
    /// When set, the sender's next event is routed straight back to this hook
    /// with this value as its held context.
    pub hold: Option<Value>,
}

impl HookResult {
    /// Processed, with no output.
    pub fn handled() -> Self {
        Self {
            processed: true,
            ..Self::default()
        }
    }

    /// Not processed: dispatch continues with the next candidate.
    pub fn skip() -> Self {
        Self::default()
    }

    /// Processed, replying with `text`.
    pub fn reply(text: impl Into<String>) -> Self {
        Self::handled().with_output(HookOutput::Text(text.into()))
    }

    /// Processed, answering a member-join request.
    pub fn decide(decision: JoinDecision) -> Self {
        Self::handled().with_output(HookOutput::Decision(decision))
    }

    /// Replaces the output.
    pub fn with_output(mut self, output: HookOutput) -> Self {
        self.output = output;
        self
    }

    /// Requests that the sender's next event come back to this hook.
    pub fn hold_with(mut self, context: impl Into<Value>) -> Self {
        self.hold = Some(context.into());
        self
    }
}

/// Return types a handler may produce.
pub trait IntoHookResult {
    fn into_hook_result(self) -> anyhow::Result<HookResult>;
}

impl IntoHookResult for HookResult {
    fn into_hook_result(self) -> anyhow::Result<HookResult> {
        Ok(self)
    }
}

impl<E> IntoHookResult for Result<HookResult, E>
where
    E: Into<anyhow::Error>,
{
    fn into_hook_result(self) -> anyhow::Result<HookResult> {
        self.map_err(Into::into)
    }
}

// ============================================================================
// HookHandler
// ============================================================================

/// The callable part of a hook.
///
/// Implemented for every `Fn(HookContext) -> impl Future<Output = R>` where
/// `R: IntoHookResult`; implement it by hand for stateful handlers.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn invoke(&self, ctx: HookContext) -> anyhow::Result<HookResult>;
}

#[async_trait]
impl<F, Fut, R> HookHandler for F
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHookResult + 'static,
{
    async fn invoke(&self, ctx: HookContext) -> anyhow::Result<HookResult> {
        (self)(ctx).await.into_hook_result()
    }
}

/// A type-erased handler.
pub type BoxedHookHandler = Arc<dyn HookHandler>;

// ============================================================================
// Hook
// ============================================================================

/// A registered unit of event handling.
///
/// `Hook` is cheap to clone; the handler is shared.
#[derive(Clone)]
pub struct Hook {
    name: String,
    kinds: BTreeSet<EventKind>,
    keywords: KeywordSets,
    listen_all: bool,
    priority: i32,
    handler: BoxedHookHandler,
}

impl Hook {
    /// Creates a hook that applies to no event kind yet.
    pub fn new<H>(name: impl Into<String>, handler: H) -> Self
    where
        H: HookHandler + 'static,
    {
        Self::from_boxed(name, Arc::new(handler))
    }

    /// Creates a hook from an already shared handler.
    pub fn from_boxed(name: impl Into<String>, handler: BoxedHookHandler) -> Self {
        Self {
            name: name.into(),
            kinds: BTreeSet::new(),
            keywords: KeywordSets::new(),
            listen_all: false,
            priority: 0,
            handler,
        }
    }

    /// Adds an event kind this hook applies to.
    pub fn on(mut self, kind: EventKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    /// Adds several event kinds.
    pub fn on_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    /// Applies to group, direct and temp messages.
    pub fn on_messages(self) -> Self {
        self.on_kinds(EventKind::ALL.into_iter().filter(EventKind::is_message))
    }

    /// Adds a keyword under an explicit strategy.
    pub fn keyword(mut self, strategy: MatchStrategy, keyword: impl Into<String>) -> Self {
        self.keywords.insert(strategy, keyword);
        self
    }

    /// Triggers when the message equals `keyword`.
    pub fn equals(self, keyword: impl Into<String>) -> Self {
        self.keyword(MatchStrategy::Equals, keyword)
    }

    /// Triggers when the message starts with `keyword`.
    pub fn starts_with(self, keyword: impl Into<String>) -> Self {
        self.keyword(MatchStrategy::StartsWith, keyword)
    }

    /// Triggers when the message ends with `keyword`.
    pub fn ends_with(self, keyword: impl Into<String>) -> Self {
        self.keyword(MatchStrategy::EndsWith, keyword)
    }

    /// Triggers when the message contains `keyword`.
    pub fn contains(self, keyword: impl Into<String>) -> Self {
        self.keyword(MatchStrategy::Contains, keyword)
    }

    /// Observe every event of the applicable kinds, before any other phase.
    ///
    /// Ignored when the hook also declares keywords.
    pub fn listen_all(mut self, enabled: bool) -> Self {
        self.listen_all = enabled;
        self
    }

    /// Sets the priority. Lower values run first; equal values keep
    /// registration order.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event_kinds(&self) -> &BTreeSet<EventKind> {
        &self.kinds
    }

    pub fn applies_to(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn keywords(&self) -> &KeywordSets {
        &self.keywords
    }

    pub fn is_listen_all(&self) -> bool {
        self.listen_all
    }

    pub fn get_priority(&self) -> i32 {
        self.priority
    }

    pub(crate) async fn invoke(&self, ctx: HookContext) -> anyhow::Result<HookResult> {
        self.handler.invoke(ctx).await
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("kinds", &self.kinds)
            .field("keywords", &self.keywords)
            .field("listen_all", &self.listen_all)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventEnvelope;
    use serde_json::json;

    fn ctx(trigger: Trigger) -> HookContext {
        let envelope = EventEnvelope::new(EventKind::DirectMessage, "u1", "bot", "hi");
        HookContext::new(Arc::new(envelope), trigger)
    }

    #[test]
    fn test_builder_collects_kinds_and_keywords() {
        let hook = Hook::new("greet", |_ctx: HookContext| async { HookResult::handled() })
            .on_messages()
            .equals("hi")
            .contains("hello")
            .priority(3);

        assert_eq!(hook.name(), "greet");
        assert_eq!(hook.event_kinds().len(), 3);
        assert!(hook.applies_to(EventKind::TempMessage));
        assert!(!hook.applies_to(EventKind::MemberJoin));
        assert_eq!(hook.keywords().len(), 2);
        assert_eq!(hook.get_priority(), 3);
    }

    #[test]
    fn test_trigger_accessors() {
        let keyword = ctx(Trigger::Keyword("hi".into()));
        assert_eq!(keyword.active_keyword(), Some("hi"));
        assert!(keyword.held_context().is_none());

        let held = ctx(Trigger::Held(json!({"step": 2})));
        assert_eq!(held.held_context(), Some(&json!({"step": 2})));
        assert!(held.active_keyword().is_none());
        assert_eq!(held.trigger().kind(), TriggerKind::Held);

        assert_eq!(ctx(Trigger::Default).text(), Some("hi"));
    }

    #[test]
    fn test_result_builders() {
        let reply = HookResult::reply("pong").hold_with(json!("next"));
        assert!(reply.processed);
        assert_eq!(reply.output, HookOutput::Text("pong".into()));
        assert_eq!(reply.hold, Some(json!("next")));

        let skip = HookResult::skip();
        assert!(!skip.processed);
        assert_eq!(skip.output, HookOutput::Empty);

        let decision = HookResult::decide(JoinDecision::Reject);
        assert_eq!(decision.output, HookOutput::Decision(JoinDecision::Reject));
    }

    #[test]
    fn test_closure_handlers_accept_both_return_styles() {
        let plain = Hook::new("plain", |_ctx: HookContext| async { HookResult::handled() });
        let fallible = Hook::new("fallible", |_ctx: HookContext| async {
            Err::<HookResult, _>(anyhow::anyhow!("boom"))
        });

        let ok = tokio_test::block_on(plain.invoke(ctx(Trigger::Default))).unwrap();
        assert!(ok.processed);

        let err = tokio_test::block_on(fallible.invoke(ctx(Trigger::Default))).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
