//! Runtime configuration loaded from environment variables.

use std::str::FromStr;

use thiserror::Error;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// An unknown log format name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log format {0:?}, expected \"pretty\" or \"json\"")]
pub struct ParseLogFormatError(String);

impl FromStr for LogFormat {
    type Err = ParseLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ParseLogFormatError(other.to_string())),
        }
    }
}

/// Processor configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `PROCESSOR_MAX_CASCADE_ROUNDS`: flush/cascade rounds allowed per dispatch (default: `16`)
/// - `PROCESSOR_LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub max_cascade_rounds: usize,
    pub log_format: LogFormat,
    pub log_filter: String,
}

impl ProcessorConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_cascade_rounds: lookup("PROCESSOR_MAX_CASCADE_ROUNDS")
                .and_then(|v| v.parse().ok())
                .filter(|rounds| *rounds > 0)
                .unwrap_or(defaults.max_cascade_rounds),
            log_format: lookup("PROCESSOR_LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_format),
            log_filter: lookup("RUST_LOG").unwrap_or(defaults.log_filter),
        }
    }

    /// Overrides the cascade bound.
    pub fn with_max_cascade_rounds(mut self, rounds: usize) -> Self {
        self.max_cascade_rounds = rounds;
        self
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_cascade_rounds: 16,
            log_format: LogFormat::Pretty,
            log_filter: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = ProcessorConfig::default();
        assert_eq!(config.max_cascade_rounds, 16);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_reads_overrides() {
        let config = ProcessorConfig::from_lookup(lookup(&[
            ("PROCESSOR_MAX_CASCADE_ROUNDS", "4"),
            ("PROCESSOR_LOG_FORMAT", "JSON"),
            ("RUST_LOG", "processor=debug"),
        ]));

        assert_eq!(config.max_cascade_rounds, 4);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_filter, "processor=debug");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ProcessorConfig::from_lookup(lookup(&[
            ("PROCESSOR_MAX_CASCADE_ROUNDS", "0"),
            ("PROCESSOR_LOG_FORMAT", "xml"),
        ]));

        assert_eq!(config, ProcessorConfig::default());
    }

    #[test]
    fn test_log_format_parse_error() {
        let err = "yaml".parse::<LogFormat>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown log format \"yaml\", expected \"pretty\" or \"json\""
        );
    }
}
