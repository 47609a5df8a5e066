//! Phased event dispatch.
//!
//! The [`Dispatcher`] routes one [`EventEnvelope`] to at most one hook that
//! reports it processed. Candidates are tried in four phases, each stopping
//! at the first processed result:
//!
//! 1. **Listening-all**: every listen-all hook for the event kind.
//! 2. **Held**: if the sender's conversation is held, only the holding hook,
//!    looked up by name. The hold is consumed by this turn.
//! 3. **Keyword** (text payloads only): hooks whose keywords match, each
//!    invoked with the keyword it matched.
//! 4. **Default**: catch-all hooks.
//!
//! Every hook runs through the same isolation boundary: its setting is bound
//! for the call, errors and panics are logged and count as "not processed",
//! and an optional timeout bounds the call. A hold request in the result is
//! recorded for the sender whether or not the hook processed the event.
//!
//! ```rust,ignore
//! let mut registry = HookRegistry::new();
//! registry.register(greet)?;
//!
//! let dispatcher = Dispatcher::new(Arc::new(registry))
//!     .with_settings(Arc::new(MemorySettings::new()));
//!
//! let outcome = dispatcher.dispatch(envelope).await;
//! if let Some(handled) = outcome.handled() {
//!     println!("{} handled it via {}", handled.hook_name, handled.trigger);
//! }
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{Instrument, Level, debug, error, span, trace, warn};

use crate::envelope::{ActorKey, EventEnvelope, EventKind};
use crate::hold::{HoldRecord, HoldStore};
use crate::hook::{Hook, HookContext, HookOutput, HookResult, JoinDecision, Trigger, TriggerKind};
use crate::keyword::match_keyword;
use crate::registry::{HookCategory, HookRegistry};
use crate::setting::{self, NoSettings, SettingsProvider};

/// What happens after a held hook declines its turn.
///
/// `FallThrough` is the legacy mqr routing, where a declined held turn went
/// on to the keyword phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeldPolicy {
    /// The held turn owns the event: keyword and default hooks are not tried.
    #[default]
    Exclusive,
    /// Dispatch continues with the keyword and default phases.
    FallThrough,
}

/// The hook that processed an event, and what it returned.
#[derive(Debug, Clone, PartialEq)]
pub struct Handled {
    pub hook_name: String,
    pub trigger: TriggerKind,
    pub result: HookResult,
}

/// Result of dispatching one envelope.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    envelope: Arc<EventEnvelope>,
    handled: Option<Handled>,
}

impl DispatchOutcome {
    pub fn envelope(&self) -> &Arc<EventEnvelope> {
        &self.envelope
    }

    /// `true` if some hook processed the event.
    pub fn is_handled(&self) -> bool {
        self.handled.is_some()
    }

    pub fn handled(&self) -> Option<&Handled> {
        self.handled.as_ref()
    }

    pub fn into_handled(self) -> Option<Handled> {
        self.handled
    }

    pub fn hook_name(&self) -> Option<&str> {
        self.handled.as_ref().map(|h| h.hook_name.as_str())
    }

    pub fn result(&self) -> Option<&HookResult> {
        self.handled.as_ref().map(|h| &h.result)
    }

    /// The decision to apply to a member-join request, if its handler gave one.
    ///
    /// The dispatcher never acts on it; the event-source adapter does.
    pub fn join_decision(&self) -> Option<JoinDecision> {
        if self.envelope.kind() != EventKind::MemberJoinRequest {
            return None;
        }
        match self.result()?.output {
            HookOutput::Decision(decision) => Some(decision),
            _ => None,
        }
    }
}

/// Routes envelopes to hooks.
///
/// Holds only shared handles: cloning is cheap and clones dispatch against
/// the same registry, hold store and settings.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HookRegistry>,
    holds: Arc<HoldStore>,
    settings: Arc<dyn SettingsProvider>,
    invoke_timeout: Option<Duration>,
    held_policy: HeldPolicy,
}

impl Dispatcher {
    /// Creates a dispatcher with an empty hold store and no settings.
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self {
            registry,
            holds: Arc::new(HoldStore::new()),
            settings: Arc::new(NoSettings),
            invoke_timeout: None,
            held_policy: HeldPolicy::default(),
        }
    }

    /// Uses `settings` as the source of per-hook settings.
    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    /// Shares an existing hold store.
    ///
    /// Dispatch turns are numbered by the store, so any number of dispatchers
    /// may share one.
    pub fn with_hold_store(mut self, holds: Arc<HoldStore>) -> Self {
        self.holds = holds;
        self
    }

    /// Bounds every hook call; a call that runs longer counts as failed.
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = Some(timeout);
        self
    }

    pub fn with_held_policy(mut self, policy: HeldPolicy) -> Self {
        self.held_policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    pub fn hold_store(&self) -> &Arc<HoldStore> {
        &self.holds
    }

    /// Dispatches one envelope through the four phases.
    pub async fn dispatch(&self, envelope: EventEnvelope) -> DispatchOutcome {
        let envelope = Arc::new(envelope);
        let turn = self.holds.next_turn();
        let span = span!(
            Level::DEBUG,
            "dispatch",
            kind = %envelope.kind(),
            actor = envelope.actor_id(),
            conversation = envelope.conversation_id(),
            turn
        );

        let handled = self.run_phases(&envelope, turn).instrument(span).await;
        DispatchOutcome { envelope, handled }
    }

    async fn run_phases(&self, envelope: &Arc<EventEnvelope>, turn: u64) -> Option<Handled> {
        let kind = envelope.kind();
        let actor_key = envelope.actor_key();
        let turn = Turn {
            envelope,
            actor_key: actor_key.as_ref(),
            id: turn,
        };

        // 1. Listening-all
        let listeners = self.candidates(kind, HookCategory::ListeningAll, Trigger::ListeningAll);
        if let Some(handled) = self.run_candidates(&turn, listeners).await {
            return Some(handled);
        }

        // 2. Held
        if let Some(key) = turn.actor_key
            && let Some(record) = self.holds.take_before(key, turn.id)
        {
            match self.registry.get(&record.hook_name) {
                Some(hook) => {
                    debug!(hook = hook.name(), "Sender is held, routing to holding hook");
                    let result = self
                        .invoke_one(&turn, hook, Trigger::Held(record.context))
                        .await;
                    if result.processed {
                        return Some(Self::handled(hook, TriggerKind::Held, result));
                    }
                    if self.held_policy == HeldPolicy::Exclusive {
                        debug!(hook = hook.name(), "Held hook declined, event left unhandled");
                        return None;
                    }
                }
                None => {
                    warn!(
                        hook = %record.hook_name,
                        "Held hook is not registered, dropping stale hold"
                    );
                }
            }
        }

        // 3. Keyword
        if let Some(text) = envelope.text() {
            let matched: Vec<(&Arc<Hook>, Trigger)> = self
                .registry
                .hooks_for(kind, HookCategory::Keyword)
                .iter()
                .filter_map(|hook| {
                    let found = match_keyword(text, hook.keywords())?;
                    trace!(
                        hook = hook.name(),
                        keyword = found.keyword,
                        strategy = %found.strategy,
                        "Keyword matched"
                    );
                    Some((hook, Trigger::Keyword(found.keyword.to_string())))
                })
                .collect();

            if let Some(handled) = self.run_candidates(&turn, matched).await {
                return Some(handled);
            }
        }

        // 4. Default
        let defaults = self.candidates(kind, HookCategory::Default, Trigger::Default);
        let handled = self.run_candidates(&turn, defaults).await;
        if handled.is_none() {
            debug!("No hook processed the event");
        }
        handled
    }

    /// Hooks of one category for `kind`, each paired with `trigger`.
    ///
    /// Collected up front so no borrowing iterator lives across an await.
    fn candidates(
        &self,
        kind: EventKind,
        category: HookCategory,
        trigger: Trigger,
    ) -> Vec<(&Arc<Hook>, Trigger)> {
        self.registry
            .hooks_for(kind, category)
            .iter()
            .map(|hook| (hook, trigger.clone()))
            .collect()
    }

    /// Invokes candidates in order until one processes the event.
    async fn run_candidates(
        &self,
        turn: &Turn<'_>,
        candidates: Vec<(&Arc<Hook>, Trigger)>,
    ) -> Option<Handled> {
        for (hook, trigger) in candidates {
            let kind = trigger.kind();
            let result = self.invoke_one(turn, hook, trigger).await;
            if result.processed {
                return Some(Self::handled(hook, kind, result));
            }
        }
        None
    }

    /// Runs a single hook behind the isolation boundary.
    async fn invoke_one(&self, turn: &Turn<'_>, hook: &Hook, trigger: Trigger) -> HookResult {
        trace!(hook = hook.name(), trigger = %trigger.kind(), "Invoking hook");

        let ctx = HookContext::new(Arc::clone(turn.envelope), trigger);
        let call = setting::with_setting(
            self.settings.as_ref(),
            hook.name(),
            AssertUnwindSafe(hook.invoke(ctx)).catch_unwind(),
        );

        let outcome = match self.invoke_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(
                        hook = hook.name(),
                        timeout_ms = limit.as_millis() as u64,
                        "Hook timed out"
                    );
                    return HookResult::skip();
                }
            },
            None => call.await,
        };

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(hook = hook.name(), error = %format!("{e:#}"), "Hook failed");
                return HookResult::skip();
            }
            Err(panic) => {
                error!(
                    hook = hook.name(),
                    panic = panic_message(panic.as_ref()),
                    "Hook panicked"
                );
                return HookResult::skip();
            }
        };

        if let Some(context) = &result.hold {
            self.record_hold(turn, hook.name(), context.clone());
        }
        result
    }

    fn record_hold(&self, turn: &Turn<'_>, hook_name: &str, context: serde_json::Value) {
        match turn.actor_key {
            Some(key) => {
                debug!(hook = hook_name, actor_key = %key, "Holding sender's next event");
                self.holds
                    .put(key.clone(), HoldRecord::from_turn(hook_name, context, turn.id));
            }
            None => {
                debug!(
                    hook = hook_name,
                    kind = %turn.envelope.kind(),
                    "Hold requested on an event without a sender scope, ignored"
                );
            }
        }
    }

    fn handled(hook: &Hook, trigger: TriggerKind, result: HookResult) -> Handled {
        debug!(hook = hook.name(), trigger = %trigger, "Event handled");
        Handled {
            hook_name: hook.name().to_string(),
            trigger,
            result,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("hook_count", &self.registry.len())
            .field("held_count", &self.holds.len())
            .field("invoke_timeout", &self.invoke_timeout)
            .field("held_policy", &self.held_policy)
            .finish()
    }
}

/// Per-dispatch state shared by the phases.
struct Turn<'a> {
    envelope: &'a Arc<EventEnvelope>,
    actor_key: Option<&'a ActorKey>,
    id: u64,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::JoinKind;
    use crate::setting::MemorySettings;
    use parking_lot::Mutex;
    use serde_json::json;

    type Calls = Arc<Mutex<Vec<(String, Trigger)>>>;

    /// A hook that records each call and answers with `result`.
    fn recording(name: &str, calls: &Calls, result: HookResult) -> Hook {
        let calls = Arc::clone(calls);
        let hook_name = name.to_string();
        Hook::new(name, move |ctx: HookContext| {
            calls
                .lock()
                .push((hook_name.clone(), ctx.trigger().clone()));
            let result = result.clone();
            async move { result }
        })
    }

    fn dispatcher(hooks: Vec<Hook>) -> Dispatcher {
        let mut registry = HookRegistry::new();
        registry.register_all(hooks).unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    fn group(actor: &str, text: &str) -> EventEnvelope {
        EventEnvelope::new(EventKind::GroupMessage, actor, "g1", text)
    }

    fn called(calls: &Calls) -> Vec<String> {
        calls.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    #[tokio::test]
    async fn test_empty_registry_leaves_event_unhandled() {
        let outcome = dispatcher(vec![]).dispatch(group("u1", "hi")).await;
        assert!(!outcome.is_handled());
        assert!(outcome.hook_name().is_none());
    }

    #[tokio::test]
    async fn test_no_applicable_kind_invokes_nothing() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("dm", &calls, HookResult::handled())
                .on(EventKind::DirectMessage)
                .listen_all(true),
            recording("dm_kw", &calls, HookResult::handled())
                .on(EventKind::DirectMessage)
                .contains("hi"),
            recording("dm_default", &calls, HookResult::handled()).on(EventKind::DirectMessage),
        ]);

        let outcome = d.dispatch(group("u1", "hi")).await;
        assert!(!outcome.is_handled());
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_keyword_trigger_carries_matched_keyword() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("greet", &calls, HookResult::reply("hello"))
                .on(EventKind::GroupMessage)
                .equals("hi"),
        ]);

        let outcome = d.dispatch(group("u1", "hi")).await;
        let handled = outcome.handled().unwrap();
        assert_eq!(handled.hook_name, "greet");
        assert_eq!(handled.trigger, TriggerKind::Keyword);
        assert_eq!(handled.result.output, HookOutput::Text("hello".into()));
        assert_eq!(
            calls.lock().as_slice(),
            [("greet".to_string(), Trigger::Keyword("hi".into()))]
        );
    }

    #[tokio::test]
    async fn test_keyword_match_is_case_insensitive_and_keeps_declared_keyword() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("help", &calls, HookResult::handled())
                .on(EventKind::GroupMessage)
                .equals("help")
                .contains("help"),
        ]);

        d.dispatch(group("u1", "HELP")).await;
        assert_eq!(calls.lock()[0].1, Trigger::Keyword("help".into()));
    }

    #[tokio::test]
    async fn test_first_processing_keyword_hook_short_circuits() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("second", &calls, HookResult::handled())
                .on(EventKind::GroupMessage)
                .contains("ping")
                .priority(2),
            recording("first", &calls, HookResult::handled())
                .on(EventKind::GroupMessage)
                .equals("ping")
                .priority(1),
        ]);

        let outcome = d.dispatch(group("u1", "ping")).await;
        assert_eq!(outcome.hook_name(), Some("first"));
        assert_eq!(called(&calls), ["first"]);
    }

    #[tokio::test]
    async fn test_declining_hooks_fall_through_phases() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("observer", &calls, HookResult::skip())
                .on(EventKind::GroupMessage)
                .listen_all(true),
            recording("kw", &calls, HookResult::skip())
                .on(EventKind::GroupMessage)
                .starts_with("h"),
            recording("fallback", &calls, HookResult::handled()).on(EventKind::GroupMessage),
        ]);

        let outcome = d.dispatch(group("u1", "hello")).await;
        assert_eq!(outcome.handled().unwrap().trigger, TriggerKind::Default);
        assert_eq!(called(&calls), ["observer", "kw", "fallback"]);
    }

    #[tokio::test]
    async fn test_listening_all_hook_stops_dispatch() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("spam_filter", &calls, HookResult::handled())
                .on(EventKind::GroupMessage)
                .listen_all(true),
            recording("greet", &calls, HookResult::handled())
                .on(EventKind::GroupMessage)
                .equals("hi"),
        ]);
        let key = group("u1", "hi").actor_key().unwrap();
        d.hold_store()
            .put(key.clone(), HoldRecord::new("greet", json!(null)));

        let outcome = d.dispatch(group("u1", "hi")).await;
        assert_eq!(outcome.handled().unwrap().trigger, TriggerKind::ListeningAll);
        assert_eq!(called(&calls), ["spam_filter"]);
        assert!(d.hold_store().contains(&key), "hold survives untouched");
    }

    #[tokio::test]
    async fn test_failing_hook_is_isolated() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            Hook::new("broken", |_ctx: HookContext| async {
                Err::<HookResult, _>(anyhow::anyhow!("database gone"))
            })
            .on(EventKind::GroupMessage)
            .contains("weather"),
            Hook::new("panicky", |_ctx: HookContext| async {
                if true {
                    panic!("unexpected state");
                }
                HookResult::handled()
            })
            .on(EventKind::GroupMessage)
            .contains("weather"),
            recording("backup", &calls, HookResult::reply("sunny"))
                .on(EventKind::GroupMessage)
                .contains("weather"),
        ]);

        let outcome = d.dispatch(group("u1", "weather today?")).await;
        assert_eq!(outcome.hook_name(), Some("backup"));
        assert_eq!(called(&calls), ["backup"]);
    }

    #[tokio::test]
    async fn test_held_hook_wins_over_keyword_hook() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("quiz", &calls, HookResult::skip()).on(EventKind::GroupMessage),
            recording("answer", &calls, HookResult::handled())
                .on(EventKind::GroupMessage)
                .equals("42"),
        ]);
        let key = group("u1", "42").actor_key().unwrap();
        d.hold_store()
            .put(key.clone(), HoldRecord::new("quiz", json!({"question": 1})));

        let outcome = d.dispatch(group("u1", "42")).await;

        assert!(!outcome.is_handled());
        assert_eq!(
            calls.lock().as_slice(),
            [("quiz".to_string(), Trigger::Held(json!({"question": 1})))]
        );
        assert!(!d.hold_store().contains(&key), "hold is single-shot");
    }

    #[tokio::test]
    async fn test_fall_through_policy_continues_after_declined_hold() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("quiz", &calls, HookResult::skip()).on(EventKind::GroupMessage),
            recording("answer", &calls, HookResult::handled())
                .on(EventKind::GroupMessage)
                .equals("42"),
        ])
        .with_held_policy(HeldPolicy::FallThrough);
        let key = group("u1", "42").actor_key().unwrap();
        d.hold_store()
            .put(key.clone(), HoldRecord::new("quiz", json!(null)));

        let outcome = d.dispatch(group("u1", "42")).await;
        assert_eq!(outcome.hook_name(), Some("answer"));
        assert_eq!(called(&calls), ["quiz", "answer"]);
        assert!(!d.hold_store().contains(&key));
    }

    #[tokio::test]
    async fn test_hold_lifecycle_is_single_shot() {
        let calls = Calls::default();
        let quiz_calls = Arc::clone(&calls);
        let quiz = Hook::new("quiz", move |ctx: HookContext| {
            quiz_calls
                .lock()
                .push(("quiz".into(), ctx.trigger().clone()));
            let result = match ctx.held_context() {
                None => HookResult::reply("what is 6 * 7?").hold_with(json!({"answer": "42"})),
                Some(saved) if ctx.text() == saved["answer"].as_str() => {
                    HookResult::reply("correct")
                }
                Some(_) => HookResult::reply("wrong"),
            };
            async move { result }
        })
        .on(EventKind::GroupMessage)
        .equals("quiz");
        let d = dispatcher(vec![
            quiz,
            recording("fallback", &calls, HookResult::handled()).on(EventKind::GroupMessage),
        ]);

        let first = d.dispatch(group("u1", "quiz")).await;
        assert_eq!(first.handled().unwrap().trigger, TriggerKind::Keyword);

        // another member of the same group is not affected
        let other = d.dispatch(group("u2", "42")).await;
        assert_eq!(other.hook_name(), Some("fallback"));

        let second = d.dispatch(group("u1", "42")).await;
        let handled = second.handled().unwrap();
        assert_eq!(handled.hook_name, "quiz");
        assert_eq!(handled.trigger, TriggerKind::Held);
        assert_eq!(handled.result.output, HookOutput::Text("correct".into()));

        let third = d.dispatch(group("u1", "42")).await;
        assert_eq!(third.hook_name(), Some("fallback"));
        assert!(d.hold_store().is_empty());
    }

    #[tokio::test]
    async fn test_re_requested_hold_survives_its_own_turn() {
        let d = dispatcher(vec![
            Hook::new("counter", |ctx: HookContext| async move {
                let n = ctx.held_context().and_then(|v| v.as_u64()).unwrap_or(0);
                HookResult::reply(n.to_string()).hold_with(n + 1)
            })
            .on(EventKind::DirectMessage),
        ]);
        let dm = |text: &str| EventEnvelope::new(EventKind::DirectMessage, "u1", "bot", text);

        for expected in ["0", "1", "2"] {
            let outcome = d.dispatch(dm("next")).await;
            assert_eq!(
                outcome.result().unwrap().output,
                HookOutput::Text(expected.into())
            );
        }
        assert_eq!(d.hold_store().len(), 1);
    }

    #[tokio::test]
    async fn test_hold_from_listening_phase_waits_for_next_event() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("watcher", &calls, HookResult::skip().hold_with("seen"))
                .on(EventKind::GroupMessage)
                .listen_all(true),
            recording("fallback", &calls, HookResult::handled()).on(EventKind::GroupMessage),
        ]);

        let outcome = d.dispatch(group("u1", "first")).await;
        assert_eq!(outcome.hook_name(), Some("fallback"));
        assert_eq!(called(&calls), ["watcher", "fallback"]);
        assert!(
            d.hold_store()
                .contains(&group("u1", "x").actor_key().unwrap())
        );
    }

    #[tokio::test]
    async fn test_missing_held_hook_proceeds() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("fallback", &calls, HookResult::handled()).on(EventKind::GroupMessage),
        ]);
        let key = group("u1", "x").actor_key().unwrap();
        d.hold_store()
            .put(key.clone(), HoldRecord::new("uninstalled", json!(null)));

        let outcome = d.dispatch(group("u1", "x")).await;
        assert_eq!(outcome.hook_name(), Some("fallback"));
        assert!(!d.hold_store().contains(&key));
    }

    #[tokio::test]
    async fn test_join_request_decision_is_surfaced() {
        let d = dispatcher(vec![
            Hook::new("gate", |ctx: HookContext| async move {
                let decision = match ctx.active_keyword() {
                    Some(_) => JoinDecision::Accept,
                    None => JoinDecision::Ignore,
                };
                HookResult::decide(decision)
            })
            .on(EventKind::MemberJoinRequest)
            .contains("password"),
        ]);

        let request = EventEnvelope::new(
            EventKind::MemberJoinRequest,
            "u9",
            "g1",
            "the password is swordfish",
        );
        let outcome = d.dispatch(request).await;
        assert_eq!(outcome.join_decision(), Some(JoinDecision::Accept));

        let unrelated = d.dispatch(group("u1", "password")).await;
        assert_eq!(unrelated.join_decision(), None);
    }

    #[tokio::test]
    async fn test_structured_payload_skips_keyword_phase() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("welcome_kw", &calls, HookResult::handled())
                .on(EventKind::MemberJoin)
                .contains("invite"),
            recording(
                "welcome",
                &calls,
                HookResult::reply("welcome!").hold_with("never stored"),
            )
            .on(EventKind::MemberJoin),
        ]);

        let joined = EventEnvelope::new(EventKind::MemberJoin, "u9", "g1", JoinKind::Invite);
        let outcome = d.dispatch(joined).await;

        assert_eq!(outcome.hook_name(), Some("welcome"));
        assert_eq!(called(&calls), ["welcome"]);
        assert!(d.hold_store().is_empty(), "membership events are never held");
    }

    #[tokio::test]
    async fn test_hook_sees_only_its_own_setting() {
        let settings = Arc::new(MemorySettings::new());
        settings.set("greet", json!({"greeting": "hey"}));

        let audit_saw = Arc::new(Mutex::new(None));
        let audit_slot = Arc::clone(&audit_saw);

        let d = dispatcher(vec![
            Hook::new("audit", move |ctx: HookContext| {
                *audit_slot.lock() = ctx.setting();
                async { HookResult::skip() }
            })
            .on(EventKind::GroupMessage)
            .listen_all(true),
            Hook::new("greet", |ctx: HookContext| async move {
                let setting = ctx.setting().unwrap();
                let greeting = setting.value().unwrap()["greeting"]
                    .as_str()
                    .unwrap_or("hello")
                    .to_string();
                HookResult::reply(greeting)
            })
            .on(EventKind::GroupMessage),
        ])
        .with_settings(settings);

        let outcome = d.dispatch(group("u1", "anything")).await;
        assert_eq!(
            outcome.result().unwrap().output,
            HookOutput::Text("hey".into())
        );

        let audit = audit_saw.lock().clone().unwrap();
        assert_eq!(audit.name(), "audit");
        assert!(audit.value().is_none());
        assert!(setting::current_setting().is_none());
    }

    #[tokio::test]
    async fn test_slow_hook_times_out() {
        let d = dispatcher(vec![
            Hook::new("slow", |_ctx: HookContext| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                HookResult::handled()
            })
            .on(EventKind::GroupMessage)
            .priority(0),
            Hook::new("fast", |_ctx: HookContext| async { HookResult::handled() })
                .on(EventKind::GroupMessage)
                .priority(1),
        ])
        .with_invoke_timeout(Duration::from_millis(20));

        let outcome = d.dispatch(group("u1", "x")).await;
        assert_eq!(outcome.hook_name(), Some("fast"));
    }

    #[test]
    fn test_dispatch_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let d = dispatcher(vec![
            Hook::new("observer", |_ctx: HookContext| async { HookResult::skip() })
                .on(EventKind::GroupMessage)
                .listen_all(true),
            Hook::new("fallback", |_ctx: HookContext| async { HookResult::handled() })
                .on(EventKind::GroupMessage),
        ]);
        let dispatch = d.dispatch(group("u1", "x"));
        assert_send(&dispatch);

        let outcome = tokio_test::block_on(dispatch);
        assert_eq!(outcome.hook_name(), Some("fallback"));
    }

    #[tokio::test]
    async fn test_dispatchers_sharing_a_hold_store() {
        let first = dispatcher(vec![
            Hook::new("ask", |ctx: HookContext| async move {
                match ctx.held_context() {
                    Some(_) => HookResult::reply("answered"),
                    None => HookResult::reply("q").hold_with(1),
                }
            })
            .on(EventKind::DirectMessage)
            .equals("ask"),
            Hook::new("fallback", |_ctx: HookContext| async { HookResult::handled() })
                .on(EventKind::DirectMessage),
        ]);
        let second = Dispatcher::new(Arc::clone(first.registry()))
            .with_hold_store(Arc::clone(first.hold_store()));
        let dm = |text: &str| EventEnvelope::new(EventKind::DirectMessage, "u1", "bot", text);

        let asked = first.dispatch(dm("ask")).await;
        assert_eq!(asked.hook_name(), Some("ask"));

        let answer = second.dispatch(dm("42")).await;
        let handled = answer.handled().unwrap();
        assert_eq!(handled.trigger, TriggerKind::Held);
        assert_eq!(handled.result.output, HookOutput::Text("answered".into()));
        assert!(first.hold_store().is_empty());
    }

    #[tokio::test]
    async fn test_hold_is_scoped_to_the_requesting_sender() {
        let calls = Calls::default();
        let d = dispatcher(vec![
            recording("quiz", &calls, HookResult::reply("6 * 7?").hold_with(json!(null)))
                .on_messages()
                .equals("quiz"),
            recording("fallback", &calls, HookResult::handled()).on_messages(),
        ]);

        d.dispatch(group("u1", "quiz")).await;

        let elsewhere = [
            EventEnvelope::new(EventKind::TempMessage, "u1", "g1", "42"),
            EventEnvelope::new(EventKind::DirectMessage, "u1", "bot", "42"),
            EventEnvelope::new(EventKind::GroupMessage, "u1", "g2", "42"),
            EventEnvelope::new(EventKind::GroupMessage, "u2", "g1", "42"),
        ];
        for envelope in elsewhere {
            let kind = envelope.kind();
            let outcome = d.dispatch(envelope).await;
            assert_eq!(outcome.hook_name(), Some("fallback"), "{kind} from another scope");
            assert_eq!(outcome.handled().unwrap().trigger, TriggerKind::Default);
        }

        let held = d.dispatch(group("u1", "42")).await;
        assert_eq!(held.hook_name(), Some("quiz"));
        assert_eq!(held.handled().unwrap().trigger, TriggerKind::Held);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispatch_keeps_holds_per_actor() {
        let d = dispatcher(vec![
            Hook::new("echo_hold", |ctx: HookContext| async move {
                tokio::task::yield_now().await;
                match ctx.held_context() {
                    Some(saved) => HookResult::reply(saved.as_str().unwrap_or_default()),
                    None => HookResult::handled().hold_with(ctx.actor_id()),
                }
            })
            .on(EventKind::DirectMessage),
        ]);
        let dm = |actor: String| EventEnvelope::new(EventKind::DirectMessage, actor, "bot", "x");

        let mut tasks = Vec::new();
        for i in 0..32 {
            let d = d.clone();
            tasks.push(tokio::spawn(async move {
                let actor = format!("user{i}");
                d.dispatch(dm(actor.clone())).await;
                let outcome = d.dispatch(dm(actor.clone())).await;
                (actor, outcome.into_handled().unwrap())
            }));
        }

        for task in tasks {
            let (actor, handled) = task.await.unwrap();
            assert_eq!(handled.trigger, TriggerKind::Held);
            assert_eq!(handled.result.output, HookOutput::Text(actor));
        }
        assert!(d.hold_store().is_empty());
    }
}
