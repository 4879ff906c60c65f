use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::Accelerator;
use crate::utils;

/// Current configuration version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Minimum number of characters an entry needs before it is analysed
pub const DEFAULT_MIN_ENTRY_LENGTH: usize = 40;

/// File name of the bundled multimodal model
pub const DEFAULT_MODEL_FILE: &str = "gemma-3n-E4B-it-int4.gguf";

/// Default llama-server address
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
    #[serde(default = "default_min_entry_length")]
    pub min_entry_length: usize,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default = "default_config_version")]
    pub config_version: Option<u32>,
}

/// Options handed to the model runtime on (re)initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Input plus output tokens the model handles
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Images accepted per inference call
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    #[serde(default)]
    pub accelerator: Accelerator,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            image_dir: default_image_dir(),
            min_entry_length: default_min_entry_length(),
            llm: LlmConfig::default(),
            config_version: Some(CURRENT_CONFIG_VERSION),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            server_url: default_server_url(),
            max_tokens: default_max_tokens(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            temperature: default_temperature(),
            max_images: default_max_images(),
            accelerator: Accelerator::default(),
        }
    }
}

// Default value functions
fn default_database_path() -> String {
    data_file_for_profile(utils::Profile::Prod, "journal.db")
}

fn default_image_dir() -> String {
    data_file_for_profile(utils::Profile::Prod, "images")
}

fn default_model_path() -> String {
    data_file_for_profile(utils::Profile::Prod, &format!("models/{}", DEFAULT_MODEL_FILE))
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_min_entry_length() -> usize {
    DEFAULT_MIN_ENTRY_LENGTH
}

fn default_max_tokens() -> u32 {
    5000
}

fn default_top_k() -> u32 {
    64
}

fn default_top_p() -> f32 {
    0.95
}

fn default_temperature() -> f32 {
    0.8
}

fn default_max_images() -> usize {
    1
}

fn default_config_version() -> Option<u32> {
    Some(CURRENT_CONFIG_VERSION)
}

fn data_file_for_profile(profile: utils::Profile, relative: &str) -> String {
    if let Some(data_dir) = utils::get_data_dir(profile) {
        data_dir.join(relative).to_string_lossy().to_string()
    } else {
        format!("~/.local/share/{}/{}", profile.app_name(), relative)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config directory: {0}")]
    ConfigDirError(String),
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to write config file: {0}")]
    WriteError(String),
    #[error("Invalid LLM option: {0}")]
    InvalidOption(String),
}

impl Config {
    /// Load configuration from an explicit path, writing defaults there if it is missing
    pub fn load_from(config_path: &Path, profile: utils::Profile) -> Result<Self, ConfigError> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path)
                .map_err(|e| ConfigError::ReadError(e.to_string()))?;
            let config: Config = toml::from_str(&contents)?;
            config.llm.validate()?;
            Ok(config)
        } else {
            let mut config = Config::default();
            if profile == utils::Profile::Dev {
                config.database_path = data_file_for_profile(profile, "journal.db");
                config.image_dir = data_file_for_profile(profile, "images");
                config.llm.model_path =
                    data_file_for_profile(profile, &format!("models/{}", DEFAULT_MODEL_FILE));
            }
            if let Err(ref e) = config.save_to(config_path) {
                tracing::error!("Failed to save config file {:?}: {}", config_path, e);
            }
            Ok(config)
        }
    }

    /// Save configuration to an explicit path
    pub fn save_to(&mut self, config_path: &Path) -> Result<(), ConfigError> {
        // Ensure config version is set before saving
        self.config_version = Some(CURRENT_CONFIG_VERSION);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::WriteError(format!("Failed to serialize config: {}", e)))?;

        fs::write(config_path, toml_string)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the config file
    pub fn get_config_path(profile: utils::Profile) -> Result<PathBuf, ConfigError> {
        let config_dir = utils::get_config_dir(profile)
            .ok_or_else(|| ConfigError::ConfigDirError("Could not determine config directory".to_string()))?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get the expanded database path (with ~ expansion)
    pub fn get_database_path(&self) -> PathBuf {
        utils::expand_path(&self.database_path)
    }

    /// Get the expanded directory imported images are copied into
    pub fn get_image_dir(&self) -> PathBuf {
        utils::expand_path(&self.image_dir)
    }
}

impl LlmConfig {
    /// Get the expanded model file path
    pub fn get_model_path(&self) -> PathBuf {
        utils::expand_path(&self.model_path)
    }

    /// Reject sampling options the runtime cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidOption("max_tokens must be positive".to_string()));
        }
        if self.top_k == 0 {
            return Err(ConfigError::InvalidOption("top_k must be positive".to_string()));
        }
        if self.top_p.is_nan() || self.top_p <= 0.0 || self.top_p > 1.0 {
            return Err(ConfigError::InvalidOption(format!("top_p {} is outside (0, 1]", self.top_p)));
        }
        if self.temperature.is_nan() || self.temperature < 0.0 {
            return Err(ConfigError::InvalidOption(format!(
                "temperature {} must not be negative",
                self.temperature
            )));
        }
        Ok(())
    }
}
