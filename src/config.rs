//! Engine configuration
//!
//! Read from a TOML file, then overridden by environment variables:
//!
//! ```toml
//! data_dir = "/var/lib/cogni"
//!
//! [remote]
//! base_url = "https://sr.example.com/api"
//! user_id = "u-123"
//! token_file = "/run/secrets/cogni-token"
//!
//! [sync]
//! flush_interval_secs = 300
//!
//! [scheduler]
//! request_retention = 0.9
//!
//! [decks.bio]
//! title = "Biology"
//! cards = 42
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flashcards::algorithm::{DEFAULT_RETENTION, MAX_INTERVAL_DAYS};
use crate::flashcards::{DeckId, SchedulerParams};
use crate::sync::scheduler::MIN_INTERVAL_SECS;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {field}: {value}")]
    Invalid { field: &'static str, value: String },

    #[error("Data directory not found")]
    DataDirNotFound,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_dir: Option<PathBuf>,
    pub remote: Option<RemoteConfig>,
    pub sync: SyncSettings,
    pub scheduler: SchedulerSettings,
    /// Known decks and their card counts
    pub decks: BTreeMap<DeckId, DeckConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub user_id: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Re-read on every credential refresh
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Default: 15
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Default: 300, floor 60
    pub flush_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            flush_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub request_retention: f64,
    pub maximum_interval_days: u32,
    pub learning_steps_mins: Vec<u32>,
    pub relearning_steps_mins: Vec<u32>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            request_retention: DEFAULT_RETENTION,
            maximum_interval_days: MAX_INTERVAL_DAYS,
            learning_steps_mins: vec![1, 10],
            relearning_steps_mins: vec![10],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckConfig {
    #[serde(default)]
    pub title: Option<String>,
    pub cards: i64,
}

fn default_timeout_secs() -> u64 {
    15
}

impl EngineConfig {
    /// Load `path` if given (a missing default file is fine), then apply
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `{config_dir}/cogni/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cogni").join("config.toml"))
    }

    fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = var("COGNI_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(url) = var("COGNI_REMOTE_URL") {
            match &mut self.remote {
                Some(remote) => remote.base_url = url,
                None => {
                    let user_id = var("COGNI_USER_ID").ok_or(ConfigError::Missing("COGNI_USER_ID"))?;
                    self.remote = Some(RemoteConfig {
                        base_url: url,
                        user_id,
                        token: None,
                        token_file: None,
                        timeout_secs: default_timeout_secs(),
                    });
                }
            }
        }

        if let Some(remote) = &mut self.remote {
            if let Some(user_id) = var("COGNI_USER_ID") {
                remote.user_id = user_id;
            }
            if let Some(token) = var("COGNI_TOKEN") {
                remote.token = Some(token);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let retention = self.scheduler.request_retention;
        if !(retention > 0.0 && retention < 1.0) {
            return Err(ConfigError::Invalid {
                field: "scheduler.request_retention",
                value: retention.to_string(),
            });
        }
        if self.scheduler.maximum_interval_days == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.maximum_interval_days",
                value: "0".to_string(),
            });
        }
        let step_lists = [
            ("scheduler.learning_steps_mins", &self.scheduler.learning_steps_mins),
            ("scheduler.relearning_steps_mins", &self.scheduler.relearning_steps_mins),
        ];
        for (field, steps) in step_lists {
            let ascending = steps.windows(2).all(|pair| pair[0] < pair[1]);
            if steps.is_empty() || steps.contains(&0) || !ascending {
                return Err(ConfigError::Invalid {
                    field,
                    value: format!("{:?}", steps),
                });
            }
        }
        if let Some(remote) = &self.remote {
            if remote.base_url.is_empty() {
                return Err(ConfigError::Missing("remote.base_url"));
            }
            if remote.user_id.is_empty() {
                return Err(ConfigError::Missing("remote.user_id"));
            }
        }
        for (deck_id, deck) in &self.decks {
            if deck.cards < 0 {
                return Err(ConfigError::Invalid {
                    field: "decks.cards",
                    value: format!("{} = {}", deck_id, deck.cards),
                });
            }
        }
        Ok(())
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::storage::default_data_dir().map_err(|_| ConfigError::DataDirNotFound),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.sync.flush_interval_secs.max(MIN_INTERVAL_SECS))
    }

    pub fn remote_timeout(&self) -> Duration {
        let secs = self
            .remote
            .as_ref()
            .map(|r| r.timeout_secs)
            .unwrap_or_else(default_timeout_secs);
        Duration::from_secs(secs.max(1))
    }

    pub fn scheduler_params(&self) -> SchedulerParams {
        let minutes = |steps: &[u32]| {
            steps
                .iter()
                .map(|m| chrono::Duration::minutes(i64::from(*m)))
                .collect()
        };
        SchedulerParams {
            request_retention: self.scheduler.request_retention,
            maximum_interval: self.scheduler.maximum_interval_days,
            learning_steps: minutes(&self.scheduler.learning_steps_mins),
            relearning_steps: minutes(&self.scheduler.relearning_steps_mins),
            ..SchedulerParams::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::parse("").unwrap();
        assert!(config.remote.is_none());
        assert_eq!(config.flush_interval(), Duration::from_secs(300));
        assert_eq!(config.remote_timeout(), Duration::from_secs(15));

        let params = config.scheduler_params();
        assert_eq!(params.request_retention, DEFAULT_RETENTION);
        assert_eq!(params.learning_steps.len(), 2);
        assert_eq!(params.relearning_steps, vec![chrono::Duration::minutes(10)]);
    }

    #[test]
    fn test_parse_full_file() {
        let config = EngineConfig::parse(
            r#"
            data_dir = "/tmp/cogni"

            [remote]
            base_url = "https://sr.example.com"
            user_id = "u1"
            timeout_secs = 5

            [sync]
            flush_interval_secs = 10

            [scheduler]
            request_retention = 0.85
            learning_steps_mins = [5]

            [decks.bio]
            title = "Biology"
            cards = 12
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/cogni"));
        assert_eq!(config.remote_timeout(), Duration::from_secs(5));
        // floor applies
        assert_eq!(config.flush_interval(), Duration::from_secs(60));
        assert_eq!(config.scheduler_params().learning_steps, vec![chrono::Duration::minutes(5)]);
        assert_eq!(config.decks["bio"].cards, 12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("COGNI_REMOTE_URL", "http://localhost:8080"),
            ("COGNI_USER_ID", "u9"),
            ("COGNI_TOKEN", "secret"),
        ]
        .into();
        let mut config = EngineConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        let remote = config.remote.unwrap();
        assert_eq!(remote.base_url, "http://localhost:8080");
        assert_eq!(remote.user_id, "u9");
        assert_eq!(remote.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_remote_url_needs_user() {
        let mut config = EngineConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "COGNI_REMOTE_URL").then(|| "http://x".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Missing("COGNI_USER_ID"))));
    }

    #[test]
    fn test_rejects_bad_retention() {
        let config = EngineConfig::parse("[scheduler]\nrequest_retention = 1.5").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_bad_steps() {
        for steps in ["[]", "[10, 1]", "[0, 10]", "[5, 5]"] {
            let config = EngineConfig::parse(&format!("[scheduler]\nlearning_steps_mins = {}", steps)).unwrap();
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::Invalid { field: "scheduler.learning_steps_mins", .. })
                ),
                "{}",
                steps
            );
        }
        let config = EngineConfig::parse("[scheduler]\nrelearning_steps_mins = [30, 20]").unwrap();
        assert!(config.validate().is_err());
        let config = EngineConfig::parse("[scheduler]\nlearning_steps_mins = [1, 30, 1440]").unwrap();
        assert!(config.validate().is_ok());
    }
}
