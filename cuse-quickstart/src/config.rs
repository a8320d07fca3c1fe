//! Configuration: YAML file, `.env` and environment overrides

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::agent::AnthropicOptions;
use crate::executor::{ExecutorOptions, MAX_WAIT_SECONDS};

const APP_DIR: &str = ".cuse-quickstart";
const CONFIG_FILE: &str = "config.yaml";
const DATABASE_FILE: &str = "quickstart.db";

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_COMPUTER_URL: &str = "http://localhost:4242/quickstart-computer";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Usually supplied through `ANTHROPIC_API_KEY`
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub max_steps: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            max_steps: 99,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputerConfig {
    pub url: String,
    pub display_number: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub timeout_secs: u64,
}

impl Default for ComputerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_COMPUTER_URL.to_string(),
            display_number: 1,
            display_width: 1024,
            display_height: 768,
            timeout_secs: 120,
        }
    }
}

impl ComputerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub process_hints: Option<String>,
    pub max_wait_seconds: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            process_hints: None,
            max_wait_seconds: MAX_WAIT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickstartConfig {
    pub agent: AgentConfig,
    pub computer: ComputerConfig,
    pub execution: ExecutionConfig,
    /// Defaults to `~/.cuse-quickstart/quickstart.db`
    pub database_path: Option<PathBuf>,
}

impl QuickstartConfig {
    /// Load `.env`, the config file (explicit path or the default location)
    /// and environment overrides, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).context("Failed to parse YAML")
    }

    pub fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.agent.api_key = Some(key);
        }
        if let Some(url) = var("ANTHROPIC_BASE_URL") {
            self.agent.base_url = url;
        }
        if let Some(model) = var("CUSE_MODEL") {
            self.agent.model = model;
        }
        if let Some(url) = var("COMPUTER_URL") {
            self.computer.url = url;
        }
        if let Some(path) = var("CUSE_DATABASE") {
            self.database_path = Some(PathBuf::from(path));
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => app_dir()
                .map(|dir| dir.join(DATABASE_FILE))
                .ok_or_else(|| anyhow!("Could not determine home directory")),
        }
    }

    pub fn anthropic_options(&self) -> Result<AnthropicOptions> {
        let api_key = self.agent.api_key.clone().ok_or_else(|| {
            anyhow!(
                "ANTHROPIC_API_KEY is not set.\n\
                 Set it in your environment, a .env file or agent.api_key in {}",
                default_config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| CONFIG_FILE.to_string())
            )
        })?;
        Ok(AnthropicOptions {
            api_key,
            base_url: self.agent.base_url.clone(),
            model: self.agent.model.clone(),
            max_tokens: self.agent.max_tokens,
            max_steps: self.agent.max_steps,
            display_width: self.computer.display_width,
            display_height: self.computer.display_height,
            display_number: self.computer.display_number,
        })
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            process_hints: self.execution.process_hints.clone(),
            max_wait_seconds: self.execution.max_wait_seconds,
        }
    }
}

pub fn app_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_DIR))
}

pub fn default_config_path() -> Option<PathBuf> {
    app_dir().map(|dir| dir.join(CONFIG_FILE))
}
