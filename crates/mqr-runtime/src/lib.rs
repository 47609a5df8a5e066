//! mqr Runtime - orchestration layer for the mqr bot framework.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `MqrConfig`)
//! - Logging configuration (`LoggingBuilder`)
//! - The event loop around the dispatcher (`BotRuntime`, `DispatchReport`)
//!
//! ```ignore
//! use mqr_runtime::BotRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = BotRuntime::new();
//!     runtime.register(my_hook)?;
//!
//!     let events = runtime.event_sender();
//!     tokio::spawn(my_adapter(events));
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, DispatchConfig, LoggingConfig, MqrConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{BotRuntime, DispatchReport, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// Provides the logging macros along with `Level` and the `instrument` attribute.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
