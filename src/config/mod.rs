use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Tesseract language code(s), `+`-joined (e.g., "eng", "eng+deu").
    #[serde(default = "default_language")]
    #[garde(length(min = 1, max = 64))]
    pub ocr_language: String,

    /// Tesseract binary to run.
    #[serde(default = "default_tesseract_bin")]
    #[garde(length(min = 1))]
    pub tesseract_bin: String,

    /// Per-image recognition limit in seconds. 0 disables it.
    #[serde(default = "default_item_timeout_secs")]
    #[garde(skip)]
    pub item_timeout_secs: u64,

    /// Upper bound on a single upload request body.
    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1024))]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_tesseract_bin() -> String {
    "tesseract".to_string()
}

fn default_item_timeout_secs() -> u64 {
    300
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ocr_language: default_language(),
            tesseract_bin: default_tesseract_bin(),
            item_timeout_secs: default_item_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl AppConfig {
    /// Load from the environment (after an optional `.env`) and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn item_timeout(&self) -> Option<Duration> {
        (self.item_timeout_secs > 0).then(|| Duration::from_secs(self.item_timeout_secs))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
