//! Configuration module for the mqr runtime.
//!
//! Layered loading (defaults, files, environment) with figment, the schema,
//! and validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    DispatchConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, MqrConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
