//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{DispatchConfig, LogFormat, LogOutput, LoggingConfig, MqrConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &MqrConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_dispatch_config(&config.dispatch)?;
    validate_plugin_names(config.plugins.keys().map(String::as_str))?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.output is 'file' but logging.file_path is not set",
        ));
    }

    if logging.format == LogFormat::Json && !cfg!(feature = "json-log") {
        return Err(ConfigError::validation(
            "logging.format 'json' requires the json-log feature",
        ));
    }

    if let Some(target) = logging.filters.keys().find(|t| t.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid log filter target: {target:?}"
        )));
    }

    Ok(())
}

fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.invoke_timeout_ms == Some(0) {
        return Err(ConfigError::validation(
            "dispatch.invoke_timeout_ms must be greater than 0 (omit it to disable the timeout)",
        ));
    }

    for (field, value) in [
        ("event_buffer", dispatch.event_buffer),
        ("report_buffer", dispatch.report_buffer),
        ("max_in_flight", dispatch.max_in_flight),
    ] {
        if value == 0 {
            return Err(ConfigError::validation(format!(
                "dispatch.{field} must be greater than 0"
            )));
        }
    }

    Ok(())
}

fn validate_plugin_names<'a>(names: impl Iterator<Item = &'a str>) -> ConfigResult<()> {
    for name in names {
        if name.is_empty() {
            return Err(ConfigError::invalid_plugin(name, "name is empty"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid_plugin(name, "name contains whitespace"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&MqrConfig::default()).is_ok());
    }

    #[test]
    fn test_file_output_requires_path() {
        let mut config = MqrConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some(PathBuf::from("logs/mqr.log"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = MqrConfig::default();
        config.dispatch.invoke_timeout_ms = Some(0);
        assert!(validate_config(&config).is_err());

        let mut config = MqrConfig::default();
        config.dispatch.report_buffer = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("report_buffer"));
    }

    #[test]
    fn test_plugin_name_with_space() {
        let mut config = MqrConfig::default();
        config
            .plugins
            .insert("my plugin".into(), serde_json::json!(true));
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidPlugin { .. })
        ));
    }
}
