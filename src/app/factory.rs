use std::sync::Arc;

use anyhow::{Context, Result};
use homedir::my_home;

use crate::{
    api::ApiClient,
    config::Config,
    stream::{FrameSink, HttpTransport, StreamAggregator},
};

pub struct AppPaths {
    pub base_path: String,
}

/// Builds the long-lived pieces every command needs.
pub struct AppFactory;

impl AppFactory {
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths { base_path })
    }

    pub fn create_config(paths: &AppPaths) -> Result<Config> {
        let config = Config::load_with(&paths.base_path)
            .with_context(|| format!("Failed to load config from {}", paths.base_path))?;

        if config.api_key().is_empty() {
            log::warn!("api_key is empty, set it in config.yaml or VOYAGER_API_KEY");
        }

        Ok(config)
    }

    pub fn create_api(config: &Config) -> Result<Arc<ApiClient>> {
        let client = ApiClient::new(config.api_url(), config.api_key(), config.query_timeout())
            .context("Failed to build http client")?;
        log::debug!("using api at {}", config.api_url());
        Ok(Arc::new(client))
    }

    /// Aggregator over the HTTP stream transport, delivering into `sink`.
    pub fn create_streams(config: &Config, sink: FrameSink) -> Result<StreamAggregator> {
        let transport = HttpTransport::new(
            config.api_url(),
            config.api_key(),
            config.stream_timeout(),
            sink,
        )
        .context("Failed to build stream transport")?;

        Ok(StreamAggregator::new(Box::new(transport)).with_timeout(config.stream_timeout()))
    }

    fn get_base_path() -> Result<String> {
        if let Ok(base_path) = std::env::var("VOYAGER_BASE_PATH") {
            return Ok(base_path);
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;

        Ok(format!("{}/.local/share/voyager", home.to_string_lossy()))
    }
}
