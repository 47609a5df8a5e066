//! # mqr
//!
//! Plugin dispatch for conversational bots: keyword routing, multi-turn held
//! conversations and catch-all fallbacks over one event stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  mpsc  ┌──────────────────────────────────────┐ broadcast ┌─────────────┐
//! │   Adapter   │───────▶│ BotRuntime ──▶ Dispatcher ──▶ hooks  │──────────▶│  Publisher  │
//! │ (platform)  │        │  (one task per event, bounded)       │  reports  │ (platform)  │
//! └─────────────┘        └──────────────────────────────────────┘           └─────────────┘
//! ```
//!
//! - **Adapter**: turns platform events into [`EventEnvelope`](core::EventEnvelope)s
//! - **Hooks**: named async handlers with event kinds, keywords and a priority
//! - **Dispatcher**: listening-all, then held, then keyword, then default
//! - **Publisher**: sends replies and applies join decisions from [`DispatchReport`](runtime::DispatchReport)s
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mqr::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = BotRuntime::new();
//!     runtime.register(
//!         Hook::new("greet", |ctx: HookContext| async move {
//!             HookResult::reply(format!("hello, {}", ctx.actor_id()))
//!         })
//!         .on(EventKind::GroupMessage)
//!         .equals("hi"),
//!     )?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: `mqr.toml` configuration files (default)
//! - `yaml-config`: `mqr.yaml` configuration files
//! - `json-log`: JSON log output

pub use mqr_core as core;
pub use mqr_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use mqr::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use mqr_runtime::{BotRuntime, DispatchReport, MqrConfig};

    // Hooks - for writing handlers
    pub use mqr_core::prelude::*;
    pub use mqr_core::{HookHandler, MatchStrategy, Mention, TriggerKind};
}
