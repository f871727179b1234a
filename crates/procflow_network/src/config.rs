use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub pool: PoolConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Upper bound on evaluation passes per `evaluate` call.
    pub max_evaluation_passes: usize,
    /// Run canvas processors even when their widget is hidden.
    pub evaluate_hidden_canvases: bool,
    /// Tags processors may require. Empty accepts every processor.
    pub supported_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker threads for background jobs, 0 picks one per core.
    pub threads: usize,
    pub thread_name: String,
    /// Quiet period before a delayed dispatch is submitted.
    pub dispatch_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_history: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_evaluation_passes: 16,
            evaluate_hidden_canvases: false,
            supported_tags: Vec::new(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            thread_name: "procflow-pool".to_string(),
            dispatch_delay_ms: 500,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: Some(100),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config_str) = env::var("PROCFLOW_CONFIG") {
            return Ok(serde_json::from_str(&config_str)?);
        }

        let config_paths = ["procflow.toml", "config/procflow.toml"];
        for path in &config_paths {
            if Path::new(path).exists() {
                return Self::load_from_path(path);
            }
        }

        let mut config = AppConfig::default();

        if let Ok(threads) = env::var("PROCFLOW_POOL_THREADS") {
            config.pool.threads = parse_var("PROCFLOW_POOL_THREADS", &threads)?;
        }

        if let Ok(delay) = env::var("PROCFLOW_POOL_DISPATCH_DELAY_MS") {
            config.pool.dispatch_delay_ms = parse_var("PROCFLOW_POOL_DISPATCH_DELAY_MS", &delay)?;
        }

        if let Ok(passes) = env::var("PROCFLOW_MAX_EVALUATION_PASSES") {
            config.network.max_evaluation_passes =
                parse_var("PROCFLOW_MAX_EVALUATION_PASSES", &passes)?;
        }

        if let Ok(hidden) = env::var("PROCFLOW_EVALUATE_HIDDEN_CANVASES") {
            config.network.evaluate_hidden_canvases =
                parse_var("PROCFLOW_EVALUATE_HIDDEN_CANVASES", &hidden)?;
        }

        if let Ok(tags) = env::var("PROCFLOW_SUPPORTED_TAGS") {
            config.network.supported_tags = tags
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(config)
    }

    /// Reads a `.json` or `.toml` file, picked by extension.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Ok(toml::from_str(&content)?),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_evaluation_passes == 0 {
            return Err(ConfigError::Invalid(
                "max_evaluation_passes must be at least 1".to_string(),
            ));
        }

        if self.pool.thread_name.is_empty() {
            return Err(ConfigError::Invalid(
                "pool thread_name cannot be empty".to_string(),
            ));
        }

        if self.history.max_history == Some(0) {
            return Err(ConfigError::Invalid(
                "max_history must be positive or unset".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
