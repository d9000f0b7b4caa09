use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database_path: String,
    pub provider: ProviderConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: "verse_align.db".to_string(),
            provider: ProviderConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_base: String,
    pub model: String,
    /// Name of the environment variable holding the API key (never the key itself).
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub max_response_bytes: usize,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
            max_response_bytes: 256 * 1024,
            temperature: 0.2,
            max_tokens: 2500,
        }
    }
}

impl ProviderConfig {
    /// Reads the API key from the configured environment variable, if set.
    pub fn api_key_from_env(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.trim().is_empty())
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Max languages analyzed at the same time.
    pub fan_out_limit: usize,
    /// Fixed wait before the single retry of a TIMEOUT / RATE_LIMITED call.
    pub retry_backoff_ms: u64,
    /// Default deadline for a whole `analyze` call.
    pub deadline_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig { fan_out_limit: 4, retry_backoff_ms: 1500, deadline_secs: 120 }
    }
}

impl OrchestratorConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid("database_path must not be empty".to_string()));
        }
        if self.provider.api_base.trim().is_empty() || self.provider.model.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.api_base and provider.model must be set".to_string()));
        }
        if self.provider.request_timeout_secs == 0 || self.provider.max_response_bytes == 0 {
            return Err(ConfigError::Invalid(
                "provider.request_timeout_secs and provider.max_response_bytes must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::Invalid(format!(
                "provider.temperature {} is outside 0.0..=2.0",
                self.provider.temperature
            )));
        }
        if self.orchestrator.fan_out_limit == 0 {
            return Err(ConfigError::Invalid("orchestrator.fan_out_limit must be at least 1".to_string()));
        }
        Ok(())
    }

    /// The OPENAI_MODEL environment variable wins over the file, like the web backend.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            if !model.trim().is_empty() {
                self.provider.model = model.trim().to_string();
            }
        }
    }
}

pub fn parse_config(contents: &str, origin: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(contents)
        .map_err(|source| ConfigError::Parse { path: origin.to_string(), source })?;
    config.validate()?;
    Ok(config)
}

pub fn load_config_from_file(file_path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(file_path).map_err(|source| ConfigError::Read {
        path: file_path.display().to_string(),
        source,
    })?;
    parse_config(&contents, &file_path.display().to_string())
}

/// Missing file means defaults; a file that exists but is broken is still an error.
pub fn load_config_or_default(file_path: &Path) -> Result<Config, ConfigError> {
    if file_path.exists() {
        load_config_from_file(file_path)
    } else {
        Ok(Config::default())
    }
}
