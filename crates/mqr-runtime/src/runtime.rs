//! Event loop around the dispatcher.
//!
//! [`BotRuntime`] owns the hook registry while hooks are being registered,
//! then turns it into a [`Dispatcher`] when it starts running. Events come in
//! through an `mpsc` channel ([`BotRuntime::event_sender`]); each one is
//! dispatched on its own task, with at most `dispatch.max_in_flight` tasks at
//! a time. Handled events are published as [`DispatchReport`]s on a broadcast
//! channel ([`BotRuntime::subscribe`]).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mqr_runtime::BotRuntime;
//!
//! let mut runtime = BotRuntime::builder().config_file("mqr.toml").build()?;
//! runtime.register(greet)?;
//!
//! let events = runtime.event_sender();
//! let mut reports = runtime.subscribe();
//! tokio::spawn(adapter.run(events));
//! tokio::spawn(async move {
//!     while let Ok(report) = reports.recv().await {
//!         adapter.publish(report).await;
//!     }
//! });
//!
//! // Run until Ctrl+C
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use mqr_core::{
    DispatchOutcome, Dispatcher, EventEnvelope, EventKind, HoldStore, Hook, HookOutput,
    HookRegistry, HookResult, JoinDecision, MemorySettings, SettingsProvider, TriggerKind,
};
use tokio::signal;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, ConfigResult, MqrConfig};
use crate::error::RuntimeResult;
use crate::logging;

/// A handled event, as published to subscribers.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub envelope: Arc<EventEnvelope>,
    pub hook_name: String,
    pub trigger: TriggerKind,
    pub result: HookResult,
}

impl DispatchReport {
    /// Builds a report from a dispatch outcome; `None` if nothing handled it.
    pub fn from_outcome(outcome: DispatchOutcome) -> Option<Self> {
        let envelope = Arc::clone(outcome.envelope());
        let handled = outcome.into_handled()?;
        Some(Self {
            envelope,
            hook_name: handled.hook_name,
            trigger: handled.trigger,
            result: handled.result,
        })
    }

    /// Text reply, if the hook gave one.
    pub fn reply(&self) -> Option<&str> {
        match &self.result.output {
            HookOutput::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Decision for a member-join request, if the hook gave one.
    pub fn join_decision(&self) -> Option<JoinDecision> {
        match self.result.output {
            HookOutput::Decision(decision) if self.envelope.kind() == EventKind::MemberJoinRequest => {
                Some(decision)
            }
            _ => None,
        }
    }
}

/// The mqr runtime.
pub struct BotRuntime {
    config: MqrConfig,
    registry: HookRegistry,
    settings: Arc<MemorySettings>,
    holds: Arc<HoldStore>,
    events_tx: mpsc::Sender<EventEnvelope>,
    events_rx: mpsc::Receiver<EventEnvelope>,
    reports: broadcast::Sender<DispatchReport>,
    shutdown: CancellationToken,
}

impl BotRuntime {
    /// Creates a runtime from `mqr.toml` / `mqr.yaml` in the current directory
    /// and the environment, falling back to defaults.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                MqrConfig::default()
            });

        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration, initializing logging from it.
    ///
    /// The `plugins` table seeds the settings store.
    pub fn from_config(config: &MqrConfig) -> Self {
        logging::init_from_config(&config.logging);

        let (events_tx, events_rx) = mpsc::channel(config.dispatch.event_buffer.max(1));
        let (reports, _) = broadcast::channel(config.dispatch.report_buffer.max(1));

        info!(
            log_level = %config.logging.level,
            plugins = config.plugins.len(),
            max_in_flight = config.dispatch.max_in_flight,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            registry: HookRegistry::new(),
            settings: Arc::new(MemorySettings::from_map(config.plugins.clone())),
            holds: Arc::new(HoldStore::new()),
            events_tx,
            events_rx,
            reports,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &MqrConfig {
        &self.config
    }

    /// Registers a hook. Hooks can only be added before the runtime runs.
    pub fn register(&mut self, hook: Hook) -> RuntimeResult<()> {
        self.registry.register(hook)?;
        Ok(())
    }

    /// Registers several hooks, stopping at the first failure.
    pub fn register_all(&mut self, hooks: impl IntoIterator<Item = Hook>) -> RuntimeResult<()> {
        self.registry.register_all(hooks)?;
        Ok(())
    }

    pub fn hook_count(&self) -> usize {
        self.registry.len()
    }

    /// Settings store shared with the dispatcher; updates apply to later invocations.
    pub fn settings(&self) -> &Arc<MemorySettings> {
        &self.settings
    }

    pub fn hold_store(&self) -> &Arc<HoldStore> {
        &self.holds
    }

    /// Sender for the event source. The loop stops once every sender is dropped.
    pub fn event_sender(&self) -> mpsc::Sender<EventEnvelope> {
        self.events_tx.clone()
    }

    /// Subscribes to reports of handled events.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchReport> {
        self.reports.subscribe()
    }

    /// Token that stops [`run`](Self::run) / [`run_until`](Self::run_until) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Builds the dispatcher from the registered hooks, without running the loop.
    pub fn into_dispatcher(self) -> Dispatcher {
        Self::build_dispatcher(&self.config, self.registry, &self.settings, &self.holds)
    }

    fn build_dispatcher(
        config: &MqrConfig,
        registry: HookRegistry,
        settings: &Arc<MemorySettings>,
        holds: &Arc<HoldStore>,
    ) -> Dispatcher {
        let settings: Arc<dyn SettingsProvider> = settings.clone();
        let mut dispatcher = Dispatcher::new(Arc::new(registry))
            .with_settings(settings)
            .with_hold_store(Arc::clone(holds))
            .with_held_policy(config.dispatch.held_policy());
        if let Some(timeout) = config.dispatch.invoke_timeout() {
            dispatcher = dispatcher.with_invoke_timeout(timeout);
        }
        dispatcher
    }

    /// Runs until Ctrl+C, SIGTERM, the shutdown token, or the event source closing.
    pub async fn run(self) -> RuntimeResult<()> {
        info!("mqr runtime is now running. Press Ctrl+C to stop.");
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` completes, the shutdown token is cancelled, or
    /// every event sender is dropped.
    ///
    /// On the way out, in-flight dispatches get `dispatch.shutdown_grace_ms`
    /// to finish; the rest are cancelled.
    pub async fn run_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            registry,
            settings,
            holds,
            events_tx,
            mut events_rx,
            reports,
            shutdown: stop,
        } = self;
        // Only external senders keep the loop alive.
        drop(events_tx);

        let dispatcher = Self::build_dispatcher(&config, registry, &settings, &holds);
        let in_flight = Arc::new(Semaphore::new(config.dispatch.max_in_flight.max(1)));
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        info!(
            hooks = dispatcher.registry().len(),
            max_in_flight = config.dispatch.max_in_flight,
            "Runtime started"
        );

        tokio::pin!(shutdown);
        loop {
            let next = async {
                let permit = Arc::clone(&in_flight).acquire_owned().await.ok()?;
                let envelope = events_rx.recv().await?;
                Some((permit, envelope))
            };

            let (permit, envelope) = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                () = stop.cancelled() => {
                    info!("Shutdown token cancelled");
                    break;
                }
                next = next => match next {
                    Some(next) => next,
                    None => {
                        info!("Event source closed");
                        break;
                    }
                },
            };

            let dispatcher = dispatcher.clone();
            let reports = reports.clone();
            let cancel = cancel.clone();
            tracker.spawn(async move {
                let _permit = permit;
                let kind = envelope.kind();
                tokio::select! {
                    outcome = dispatcher.dispatch(envelope) => {
                        if let Some(report) = DispatchReport::from_outcome(outcome)
                            && reports.send(report).is_err()
                        {
                            debug!("Handled event has no report subscribers");
                        }
                    }
                    () = cancel.cancelled() => {
                        warn!(kind = %kind, "Dispatch cancelled during shutdown");
                    }
                }
            });
        }

        tracker.close();
        let grace = config.dispatch.shutdown_grace();
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(
                remaining = tracker.len(),
                grace_ms = grace.as_millis() as u64,
                "In-flight dispatches exceeded the shutdown grace period, cancelling"
            );
            cancel.cancel();
            tracker.wait().await;
        }

        info!(held = holds.len(), "Runtime stopped");
        Ok(())
    }
}

impl Default for BotRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, listening for Ctrl+C only");
            }
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a [`BotRuntime`] with custom configuration.
///
/// ```rust,ignore
/// let runtime = BotRuntime::builder()
///     .config_file("config/production.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: MqrConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> ConfigResult<BotRuntime> {
        let config = self.config_loader.load()?;
        Ok(BotRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
