use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use derm_flow::CompletionSettings;
use thiserror::Error;

pub const DEFAULT_MODEL_PATH: &str = "ResNet50_dermnet23.onnx";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub model_path: PathBuf,
    pub max_upload_bytes: usize,
    pub log_format: LogFormat,
    pub completion: CompletionSettings,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("GROQ_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing("GROQ_API_KEY"))?;

        let defaults = CompletionSettings::default();
        let completion = CompletionSettings {
            endpoint: lookup("LLM_ENDPOINT").unwrap_or(defaults.endpoint),
            api_key,
            model: lookup("LLM_MODEL").unwrap_or(defaults.model),
            temperature: parse_or(&lookup, "LLM_TEMPERATURE", defaults.temperature)?,
            max_tokens: parse_or(&lookup, "LLM_MAX_TOKENS", defaults.max_tokens)?,
            timeout: timeout_from(&lookup, defaults.timeout)?,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        Ok(Self {
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            model_path: lookup("DERMNET_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            log_format,
            completion,
        })
    }
}

/// A zero timeout would fail every completion, so it is rejected.
fn timeout_from(
    lookup: &impl Fn(&str) -> Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match parse_or(lookup, "LLM_TIMEOUT_SECS", default.as_secs())? {
        0 => Err(ConfigError::Invalid {
            name: "LLM_TIMEOUT_SECS",
            value: "0".to_string(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => {
            let parsed = value.trim().parse();
            parsed.map_err(|_| ConfigError::Invalid { name, value })
        }
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("GROQ_API_KEY", "gsk_test")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.model_path, PathBuf::from("ResNet50_dermnet23.onnx"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.completion.api_key, "gsk_test");
        assert_eq!(config.completion.model, "llama3-8b-8192");
        assert_eq!(config.completion.max_tokens, 1000);
        assert_eq!(config.completion.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("GROQ_API_KEY", "gsk_test"),
            ("PORT", "8080"),
            ("LLM_TIMEOUT_SECS", "5"),
            ("LLM_TEMPERATURE", "0.2"),
            ("LOG_FORMAT", "pretty"),
            ("DERMNET_MODEL_PATH", "/models/derm.onnx"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.completion.timeout, Duration::from_secs(5));
        assert!((config.completion.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.model_path, PathBuf::from("/models/derm.onnx"));
    }

    #[test]
    fn test_missing_key_and_bad_numbers() {
        assert_eq!(
            config_from(&[]).unwrap_err(),
            ConfigError::Missing("GROQ_API_KEY")
        );
        assert_eq!(
            config_from(&[("GROQ_API_KEY", "k"), ("PORT", "eighty")]).unwrap_err(),
            ConfigError::Invalid {
                name: "PORT",
                value: "eighty".to_string()
            }
        );
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        assert_eq!(
            config_from(&[("GROQ_API_KEY", "k"), ("LLM_TIMEOUT_SECS", "0")]).unwrap_err(),
            ConfigError::Invalid {
                name: "LLM_TIMEOUT_SECS",
                value: "0".to_string()
            }
        );
        let config = config_from(&[("GROQ_API_KEY", "k"), ("LLM_TIMEOUT_SECS", "1")]).unwrap();
        assert_eq!(config.completion.timeout, Duration::from_secs(1));
    }
}
