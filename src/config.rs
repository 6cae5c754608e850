use std::{env, path::PathBuf, time::Duration};

use crate::{
    error::ConfigError,
    providers::deepseek::{self, DeepSeekConfig},
    store::DEFAULT_FILE_NAME,
};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Values supplied on the command line. Anything left `None` falls back to the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub history: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub offline: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Always present unless `offline` is set.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub history_path: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub request_timeout: Option<Duration>,
    pub offline: bool,
}

impl Config {
    pub fn from_env(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve(overrides, |key| env::var(key).ok())
    }

    /// Flag first, then `lookup`, then the built-in default. Empty values count as unset.
    pub fn resolve<F>(overrides: ConfigOverrides, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_key = overrides
            .api_key
            .filter(|value| !value.trim().is_empty())
            .or_else(|| lookup(deepseek::API_KEY_ENV));
        if api_key.is_none() && !overrides.offline {
            return Err(ConfigError::MissingApiKey(deepseek::API_KEY_ENV));
        }

        let request_timeout = match lookup("DEEPSEEK_REQUEST_TIMEOUT_MS") {
            Some(raw) => {
                let ms = raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    name: "DEEPSEEK_REQUEST_TIMEOUT_MS",
                    value: raw.clone(),
                })?;
                Some(Duration::from_millis(ms))
            }
            None => None,
        };

        let temperature = overrides.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue {
                name: "temperature",
                value: temperature.to_string(),
            });
        }

        Ok(Self {
            api_key,
            base_url: overrides
                .base_url
                .or_else(|| lookup("DEEPSEEK_BASE_URL"))
                .unwrap_or_else(|| deepseek::DEFAULT_BASE_URL.to_string()),
            model: overrides
                .model
                .or_else(|| lookup("DEEPSEEK_MODEL"))
                .unwrap_or_else(|| deepseek::DEFAULT_MODEL.to_string()),
            temperature,
            history_path: overrides
                .history
                .or_else(|| lookup("PLAUDER_HISTORY").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FILE_NAME)),
            backup_dir: overrides.backup_dir,
            request_timeout,
            offline: overrides.offline,
        })
    }

    pub fn provider_config(&self) -> Option<DeepSeekConfig> {
        let api_key = self.api_key.as_ref()?;
        let mut config = DeepSeekConfig::new(api_key.clone()).with_base_url(self.base_url.clone());
        if let Some(timeout) = self.request_timeout {
            config = config.with_timeout(timeout);
        }
        Some(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn flag_beats_environment() {
        let overrides = ConfigOverrides {
            api_key: Some("from-flag".into()),
            ..ConfigOverrides::default()
        };
        let config = Config::resolve(overrides, env(&[("DEEPSEEK_API_KEY", "from-env")])).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("from-flag"));
    }

    #[test]
    fn environment_fills_gaps_and_defaults_apply() {
        let config = Config::resolve(
            ConfigOverrides::default(),
            env(&[("DEEPSEEK_API_KEY", "k"), ("DEEPSEEK_MODEL", "deepseek-reasoner")]),
        )
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.model, "deepseek-reasoner");
        assert_eq!(config.base_url, deepseek::DEFAULT_BASE_URL);
        assert_eq!(config.history_path, PathBuf::from("chat_history.json"));
        assert_eq!(config.temperature, DEFAULT_TEMPERATURE);
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn missing_credential_is_fatal() {
        let error = Config::resolve(ConfigOverrides::default(), env(&[("DEEPSEEK_API_KEY", "  ")]))
            .unwrap_err();
        assert!(matches!(error, ConfigError::MissingApiKey("DEEPSEEK_API_KEY")));
    }

    #[test]
    fn offline_mode_needs_no_credential() {
        let overrides = ConfigOverrides {
            offline: true,
            ..ConfigOverrides::default()
        };
        let config = Config::resolve(overrides, env(&[])).unwrap();
        assert!(config.api_key.is_none());
        assert!(config.provider_config().is_none());
    }

    #[test]
    fn rejects_bad_timeout() {
        let error = Config::resolve(
            ConfigOverrides::default(),
            env(&[("DEEPSEEK_API_KEY", "k"), ("DEEPSEEK_REQUEST_TIMEOUT_MS", "soon")]),
        )
        .unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue { .. }));
    }
}
