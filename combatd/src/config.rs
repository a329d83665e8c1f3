//! Server configuration
//!
//! Layered with figment, later layers winning:
//! - Built-in defaults
//! - TOML file (`combatd.toml` unless a path is given)
//! - `COMBATD_` environment variables, nested with `__`
//!   (e.g. `COMBATD_ESCALATION__SKIP_AFTER_SECS=600`)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encounter::DEFAULT_EVENT_CAPACITY;
use crate::escalation::EscalationThresholds;

pub const DEFAULT_CONFIG_FILE: &str = "combatd.toml";
pub const ENV_PREFIX: &str = "COMBATD_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} not found")]
    MissingFile(PathBuf),

    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Figment(Box::new(err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// SQLite file; None = in-memory
    pub db_path: Option<String>,
    /// Seconds between escalation sweeps
    pub sweep_interval_secs: u64,
    pub escalation: EscalationThresholds,
    /// Narration events kept per encounter
    pub event_log_capacity: usize,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            db_path: None,
            sweep_interval_secs: 60,
            escalation: EscalationThresholds::default(),
            event_log_capacity: DEFAULT_EVENT_CAPACITY,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// The layered provider chain; an explicit `path` replaces the default file
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate. A missing default file is fine; a missing
    /// explicit one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
        }
        let config: Config = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be positive".into(),
            ));
        }
        if self.event_log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_log_capacity must be positive".into(),
            ));
        }
        self.escalation.validate().map_err(ConfigError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config, Config::default());
            assert_eq!(config.escalation.skip_after_secs, 14400);
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "combatd.toml",
                r#"
                bind_addr = "0.0.0.0:9000"
                db_path = "combat.db"
                sweep_interval_secs = 30

                [escalation]
                nudge_after_secs = 600
                skip_after_secs = 1200
                "#,
            )?;
            jail.set_env("COMBATD_SWEEP_INTERVAL_SECS", "5");
            jail.set_env("COMBATD_ESCALATION__SKIP_AFTER_SECS", "1800");
            jail.set_env("COMBATD_LOG_FORMAT", "json");

            let config = Config::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 9000)));
            assert_eq!(config.db_path.as_deref(), Some("combat.db"));
            assert_eq!(config.sweep_interval_secs, 5);
            assert_eq!(config.escalation.nudge_after_secs, 600);
            assert_eq!(config.escalation.skip_after_secs, 1800);
            // Untouched nested fields keep their defaults
            assert_eq!(config.escalation.must_advance_after_secs, 86400);
            assert_eq!(config.log_format, LogFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_path() {
        Jail::expect_with(|jail| {
            jail.create_file("other.toml", "event_log_capacity = 8")?;
            let config = Config::load(Some(Path::new("other.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.event_log_capacity, 8);

            let missing = Config::load(Some(Path::new("nope.toml")));
            assert!(matches!(missing, Err(ConfigError::MissingFile(_))));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("COMBATD_SWEEP_INTERVAL_SECS", "0");
            assert!(matches!(Config::load(None), Err(ConfigError::Invalid(_))));

            jail.set_env("COMBATD_SWEEP_INTERVAL_SECS", "10");
            jail.set_env("COMBATD_ESCALATION__NUDGE_AFTER_SECS", "99999");
            assert!(matches!(Config::load(None), Err(ConfigError::Invalid(_))));

            jail.set_env("COMBATD_ESCALATION__NUDGE_AFTER_SECS", "oops");
            assert!(matches!(Config::load(None), Err(ConfigError::Figment(_))));
            Ok(())
        });
    }
}
