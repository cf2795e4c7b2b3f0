//! Engine settings.
//!
//! Settings come from an optional TOML file with `OPERAND__*` environment
//! overrides on top, e.g. `OPERAND__STRATEGY=serial` or
//! `OPERAND__LOGGING__LEVEL=debug`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::executor::{ExecutionStrategy, StepRequeuePolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Dispatch strategy inside a step.
    #[serde(default)]
    pub strategy: ExecutionStrategy,
    /// Delay before retrying operands that have not converged.
    #[serde(default = "default_retry_period_ms")]
    pub retry_period_ms: u64,
    #[serde(default)]
    pub step_requeue_policy: StepRequeuePolicy,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_retry_period_ms() -> u64 {
    5_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::default(),
            retry_period_ms: default_retry_period_ms(),
            step_requeue_policy: StepRequeuePolicy::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.retry_period_ms == 0 {
            return Err("retry_period_ms must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_millis(self.retry_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::EngineSettings;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Load settings from `path` (or `operand.toml` when `None`) plus
    /// environment overrides, then validate them.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_settings(path: Option<&str>) -> Result<EngineSettings, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("operand.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        builder = builder.add_source(
            Environment::with_prefix("OPERAND")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("settings build error: {e}"))?;
        let merged: EngineSettings = cfg
            .try_deserialize()
            .map_err(|e| format!("settings deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_settings_from<P: AsRef<Path>>(path: P) -> Result<EngineSettings, String> {
        let p = path.as_ref().to_string_lossy().to_string();
        load_settings(Some(&p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.strategy, ExecutionStrategy::Parallel);
        assert_eq!(settings.retry_period(), Duration::from_secs(5));
        assert_eq!(settings.step_requeue_policy, StepRequeuePolicy::StepWide);
    }

    #[test]
    fn test_validation() {
        let mut settings = EngineSettings::default();
        settings.retry_period_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::default();
        settings.logging.level = "loud".into();
        let err = settings.validate().unwrap_err();
        assert!(err.contains("logging.level"));
    }

    #[test]
    fn test_toml_round_trip_names() {
        let settings = EngineSettings {
            strategy: ExecutionStrategy::Serial,
            step_requeue_policy: StepRequeuePolicy::PerOperand,
            ..EngineSettings::default()
        };
        let text = toml::to_string(&settings).expect("serialize");
        assert!(text.contains("strategy = \"serial\""));
        assert!(text.contains("step_requeue_policy = \"per_operand\""));

        let parsed: EngineSettings = toml::from_str(&text).expect("parse");
        assert_eq!(parsed, settings);
    }
}
