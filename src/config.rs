//! Playground configuration: optional `playground.toml`, then environment
//! overrides, then validation. Every field has a default so the file is
//! optional.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "playground.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaygroundConfig {
    pub logging: LoggingConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Multiplier applied to every demo delay.
    pub time_scale: f64,
    /// Base period for sampling and ticking demos.
    pub tick_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            tick_ms: 100,
        }
    }
}

impl PlaygroundConfig {
    /// Load `playground.toml` from the working directory (if present) and
    /// apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path.as_ref())?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(filter) = std::env::var("PLAYGROUND_LOG") {
            self.logging.filter = filter;
        }
        if let Ok(raw) = std::env::var("PLAYGROUND_TIME_SCALE") {
            self.timing.time_scale = raw.parse().map_err(|_| {
                ConfigError::invalid("PLAYGROUND_TIME_SCALE", format!("'{raw}' is not a number"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.timing.time_scale.is_finite() && self.timing.time_scale > 0.0) {
            return Err(ConfigError::invalid(
                "timing.time_scale",
                format!("must be a positive number, got {}", self.timing.time_scale),
            ));
        }
        if self.timing.tick_ms == 0 {
            return Err(ConfigError::invalid("timing.tick_ms", "must be at least 1"));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::invalid("logging.filter", "must not be empty"));
        }
        Ok(())
    }

    /// Demo delay of `ms` milliseconds, scaled by `timing.time_scale`.
    pub fn millis(&self, ms: u64) -> Duration {
        Duration::from_secs_f64(ms as f64 * self.timing.time_scale / 1000.0)
    }

    pub fn tick(&self) -> Duration {
        self.millis(self.timing.tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlaygroundConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.millis(250), Duration::from_millis(250));
        assert_eq!(config.tick(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PlaygroundConfig::from_toml("[timing]\ntime_scale = 0.5\n").unwrap();
        assert_eq!(config.logging.filter, "info");
        assert_eq!(config.timing.tick_ms, 100);
        assert_eq!(config.millis(200), Duration::from_millis(100));
    }

    #[test]
    fn test_rejects_non_positive_time_scale() {
        let err = PlaygroundConfig::from_toml("[timing]\ntime_scale = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "timing.time_scale"));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = PlaygroundConfig::from_toml("[timing\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlaygroundConfig::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, PlaygroundConfig::default());
    }

    #[test]
    fn test_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nfilter = \"playground=debug\"\n[timing]\ntick_ms = 40").unwrap();
        let config = PlaygroundConfig::from_file(file.path()).unwrap();
        assert_eq!(config.logging.filter, "playground=debug");
        assert_eq!(config.tick(), Duration::from_millis(40));
    }
}
