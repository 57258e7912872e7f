use std::time::Duration;

use crate::{
    color::GradientSpec,
    hover::HoverDelays,
    storage::{self, StorageManager},
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_API_URL: &str = "http://localhost:3000";
/// Characters of trailing context sent with each similarity query
const DEFAULT_SIMILARITY_WINDOW: usize = 200;
/// Quiet period after the last edit before the list refreshes
const DEFAULT_REFRESH_DEBOUNCE_MS: u64 = 4000;
const DEFAULT_HOVER_SHOW_DELAY_MS: u64 = 200;
const DEFAULT_HOVER_HIDE_DELAY_MS: u64 = 200;
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("config file is not valid utf8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub gradient: GradientSpec,
    #[serde(default = "default_similarity_window")]
    pub similarity_window: usize,
    #[serde(default = "default_refresh_debounce_ms")]
    pub refresh_debounce_ms: u64,
    #[serde(default = "default_hover_show_delay_ms")]
    pub hover_show_delay_ms: u64,
    #[serde(default = "default_hover_hide_delay_ms")]
    pub hover_hide_delay_ms: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    /// Re-index a document whenever the watcher sees it change
    #[serde(default)]
    pub auto_index_on_edit: bool,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
    #[serde(skip_serializing, skip_deserializing)]
    env_api_url: Option<String>,
    #[serde(skip_serializing, skip_deserializing)]
    env_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            gradient: GradientSpec::default(),
            similarity_window: DEFAULT_SIMILARITY_WINDOW,
            refresh_debounce_ms: DEFAULT_REFRESH_DEBOUNCE_MS,
            hover_show_delay_ms: DEFAULT_HOVER_SHOW_DELAY_MS,
            hover_hide_delay_ms: DEFAULT_HOVER_HIDE_DELAY_MS,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            stream_timeout_secs: DEFAULT_STREAM_TIMEOUT_SECS,
            auto_index_on_edit: false,
            base_path: String::new(),
            env_api_url: None,
            env_api_key: None,
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_similarity_window() -> usize {
    DEFAULT_SIMILARITY_WINDOW
}

fn default_refresh_debounce_ms() -> u64 {
    DEFAULT_REFRESH_DEBOUNCE_MS
}

fn default_hover_show_delay_ms() -> u64 {
    DEFAULT_HOVER_SHOW_DELAY_MS
}

fn default_hover_hide_delay_ms() -> u64 {
    DEFAULT_HOVER_HIDE_DELAY_MS
}

fn default_query_timeout_secs() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

fn default_stream_timeout_secs() -> u64 {
    DEFAULT_STREAM_TIMEOUT_SECS
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let api_url = self.api_url();
        let url = url::Url::parse(api_url)
            .map_err(|err| ConfigError::Invalid(format!("api_url {api_url:?}: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "api_url must be http or https, got {api_url:?}"
            )));
        }

        if self.similarity_window == 0 {
            return Err(ConfigError::Invalid(
                "similarity_window must be greater than 0".to_string(),
            ));
        }

        if self.query_timeout_secs == 0 || self.stream_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "query_timeout_secs and stream_timeout_secs must be greater than 0".to_string(),
            ));
        }

        self.gradient
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("gradient: {err}")))?;

        Ok(())
    }

    pub fn load_with(base_path: &str) -> Result<Self, ConfigError> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(
                CONFIG_FILE,
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_string();
        config.apply_env();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }

    /// Environment overrides are kept apart so `save` never writes them out.
    fn apply_env(&mut self) {
        self.env_api_key = std::env::var("VOYAGER_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self.env_api_url = std::env::var("VOYAGER_API_URL")
            .ok()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
    }

    pub fn api_url(&self) -> &str {
        self.env_api_url.as_deref().unwrap_or(&self.api_url)
    }

    pub fn api_key(&self) -> &str {
        self.env_api_key.as_deref().unwrap_or(&self.api_key)
    }

    pub fn hover_delays(&self) -> HoverDelays {
        HoverDelays {
            show: Duration::from_millis(self.hover_show_delay_ms),
            hide: Duration::from_millis(self.hover_hide_delay_ms),
        }
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}

/// Persisted settings plus the gradient update path.
pub struct Settings {
    config: Config,
}

impl Settings {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gradient(&self) -> &GradientSpec {
        &self.config.gradient
    }

    /// Validates and persists `gradient`, then runs `on_changed` before
    /// returning so no caller can observe the new setting with stale colors.
    pub fn set_gradient(
        &mut self,
        gradient: GradientSpec,
        on_changed: impl FnOnce(&GradientSpec),
    ) -> Result<(), ConfigError> {
        gradient
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("gradient: {err}")))?;

        self.config.gradient = gradient;
        self.config.save()?;
        log::info!(
            "gradient set to {} -> {}",
            self.config.gradient.start_color,
            self.config.gradient.end_color
        );

        on_changed(&self.config.gradient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(tmp: &tempfile::TempDir) -> String {
        tmp.path().to_str().unwrap().to_string()
    }

    #[test]
    fn test_load_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(&base(&tmp)).unwrap();

        assert_eq!(config.similarity_window, 200);
        assert_eq!(config.refresh_debounce_ms, 4000);
        assert_eq!(config.gradient, GradientSpec::default());
        assert!(tmp.path().join("config.yaml").exists());
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.yaml"), "similarity_window: 512\n").unwrap();

        let config = Config::load_with(&base(&tmp)).unwrap();
        assert_eq!(config.similarity_window, 512);
        assert_eq!(config.hover_show_delay_ms, 200);

        // upgraded file now carries every field
        let saved = std::fs::read_to_string(tmp.path().join("config.yaml")).unwrap();
        assert!(saved.contains("hover_hide_delay_ms"));
    }

    #[test]
    fn test_invalid_gradient_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.yaml"),
            "gradient:\n  start_color: blue\n  end_color: '#ff0000'\n",
        )
        .unwrap();

        assert!(matches!(
            Config::load_with(&base(&tmp)),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let config = Config {
            similarity_window: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_gradient_persists_and_notifies() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = Settings::new(Config::load_with(&base(&tmp)).unwrap());

        let mut seen = None;
        settings
            .set_gradient(GradientSpec::new("#000000", "#ffffff"), |g| {
                seen = Some(g.clone())
            })
            .unwrap();

        assert_eq!(seen.unwrap().end_color, "#ffffff");
        let reloaded = Config::load_with(&base(&tmp)).unwrap();
        assert_eq!(reloaded.gradient.start_color, "#000000");
    }

    #[test]
    fn test_set_gradient_rejects_bad_color_without_notifying() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = Settings::new(Config::load_with(&base(&tmp)).unwrap());

        let mut notified = false;
        let result = settings.set_gradient(GradientSpec::new("#zzzzzz", "#ffffff"), |_| {
            notified = true
        });

        assert!(result.is_err());
        assert!(!notified);
        assert_eq!(settings.gradient(), &GradientSpec::default());
    }
}
