//! Runtime configuration and persisted preferences
//!
//! [`AppConfig`] is layered with the `config` crate: built-in defaults, then
//! an optional `promptflow.toml` in the working directory, then
//! `PROMPTFLOW_*` environment variables. `OPENAI_API_KEY` and
//! `OPENAI_BASE_URL` are honoured when the prefixed forms are absent.
//!
//! [`Preferences`] is the small JSON document the CLI keeps between
//! sessions: the stored credential and two display flags.

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::llm::providers::openai::config::DEFAULT_BASE_URL;
use crate::llm::OpenAIConfig;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub request_timeout_seconds: u64,
    /// Keep executing later steps after a step fails.
    pub continue_on_step_failure: bool,
    /// Runs kept per flow before the oldest are dropped.
    pub max_runs_per_flow: usize,
    pub default_model: String,
    pub preferences_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_seconds: 120,
            continue_on_step_failure: true,
            max_runs_per_flow: 100,
            default_model: crate::models::DEFAULT_MODEL.to_string(),
            preferences_path: PathBuf::from(".promptflow/preferences.json"),
        }
    }
}

impl AppConfig {
    /// Load from defaults, `promptflow.toml` and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("promptflow"))
    }

    /// Same as [`AppConfig::load`] with an explicit file stem or path.
    pub fn load_from(file: &Path) -> Result<Self> {
        let defaults = AppConfig::default();
        let settings = Config::builder()
            .set_default("base_url", defaults.base_url.clone())?
            .set_default(
                "request_timeout_seconds",
                defaults.request_timeout_seconds as i64,
            )?
            .set_default("continue_on_step_failure", defaults.continue_on_step_failure)?
            .set_default("max_runs_per_flow", defaults.max_runs_per_flow as i64)?
            .set_default("default_model", defaults.default_model.clone())?
            .set_default(
                "preferences_path",
                defaults.preferences_path.to_string_lossy().to_string(),
            )?
            .add_source(File::from(file.to_path_buf()).required(false))
            .add_source(Environment::with_prefix("PROMPTFLOW").try_parsing(true))
            .build()?;

        let mut config: AppConfig = settings.try_deserialize()?;
        if config.api_key.is_none() {
            config.api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        }
        if std::env::var("PROMPTFLOW_BASE_URL").is_err() {
            if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
                config.base_url = url;
            }
        }

        debug!(base_url = %config.base_url, has_key = config.api_key.is_some(), "configuration loaded");
        Ok(config)
    }

    /// Client settings for `api_key`.
    pub fn openai_config(&self, api_key: &str) -> OpenAIConfig {
        OpenAIConfig {
            api_key: api_key.to_string(),
            base_url: self.base_url.clone(),
            timeout_seconds: self.request_timeout_seconds,
            ..OpenAIConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

/// Settings remembered between sessions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub show_debug: bool,
    #[serde(default)]
    pub theme: Theme,
}

impl Preferences {
    /// Read preferences, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
