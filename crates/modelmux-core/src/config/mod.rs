//! `config.toml` for the modelmux process
//!
//! This is the process-level configuration (where the metrics database
//! lives, call deadlines, provider endpoints). The routing configuration
//! itself (`RegistryConfig`) is stored in the metrics database.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::routing::Provider;
use crate::storage::default_database_path;

/// Modelmux configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub providers: ProviderEndpoints,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Metrics database file; the platform data directory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl DatabaseSettings {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_database_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Deadline for one adapter call, in milliseconds
    pub call_timeout_ms: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub huggingface_base_url: String,
    pub local_base_url: String,
    /// HTTP client timeout for provider requests
    pub request_timeout_secs: u64,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com/v1".to_string(),
            anthropic_base_url: "https://api.anthropic.com/v1".to_string(),
            huggingface_base_url: "https://api-inference.huggingface.co".to_string(),
            local_base_url: "http://localhost:11434".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl ProviderEndpoints {
    pub fn base_url(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.openai_base_url,
            Provider::Anthropic => &self.anthropic_base_url,
            Provider::HuggingFace => &self.huggingface_base_url,
            Provider::Local => &self.local_base_url,
        }
    }
}

/// Environment variable holding a provider's API key
///
/// Local models need no key.
pub fn api_key_env(provider: Provider) -> Option<&'static str> {
    match provider {
        Provider::OpenAi => Some("OPENAI_API_KEY"),
        Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
        Provider::HuggingFace => Some("HUGGINGFACE_API_KEY"),
        Provider::Local => None,
    }
}

/// API key for a provider, read from the environment only
pub fn resolved_api_key(provider: Provider) -> Option<String> {
    api_key_env(provider)
        .and_then(|var| env::var(var).ok())
        .filter(|key| !key.trim().is_empty())
}

fn redact(key: &str) -> String {
    let count = key.chars().count();
    if count <= 4 {
        "***".to_string()
    } else {
        let tail: String = key.chars().skip(count - 4).collect();
        format!("***{}", tail)
    }
}

fn parse_url(key: &str, value: &str) -> anyhow::Result<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(anyhow!("{} must be an http(s) URL, got '{}'", key, value));
    }
    Ok(trimmed.to_string())
}

const KEYS: &[&str] = &[
    "database.path",
    "router.call_timeout_ms",
    "providers.openai_base_url",
    "providers.anthropic_base_url",
    "providers.huggingface_base_url",
    "providers.local_base_url",
    "providers.request_timeout_secs",
    "openai.api_key",
    "anthropic.api_key",
    "huggingface.api_key",
];

impl Config {
    /// `$MODELMUX_CONFIG_DIR`, else `<config dir>/modelmux`
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("MODELMUX_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("modelmux")
        };
        Ok(dir)
    }

    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Validate, then write `config.toml`, creating the directory
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Positive timeouts and http(s) provider endpoints
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.router.call_timeout_ms == 0 {
            return Err(anyhow!("router.call_timeout_ms must be greater than zero"));
        }
        if self.providers.request_timeout_secs == 0 {
            return Err(anyhow!("providers.request_timeout_secs must be greater than zero"));
        }
        for provider in Provider::PRIORITY {
            parse_url(provider.as_str(), self.providers.base_url(provider))?;
        }
        Ok(())
    }

    /// Value for a dotted key such as `router.call_timeout_ms`
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "database.path" => Ok(self.database.resolved_path().display().to_string()),
            "router.call_timeout_ms" => Ok(self.router.call_timeout_ms.to_string()),
            "providers.openai_base_url" => Ok(self.providers.openai_base_url.clone()),
            "providers.anthropic_base_url" => Ok(self.providers.anthropic_base_url.clone()),
            "providers.huggingface_base_url" => Ok(self.providers.huggingface_base_url.clone()),
            "providers.local_base_url" => Ok(self.providers.local_base_url.clone()),
            "providers.request_timeout_secs" => Ok(self.providers.request_timeout_secs.to_string()),

            // API keys (special handling - show redacted)
            "openai.api_key" | "anthropic.api_key" | "huggingface.api_key" => {
                let provider: Provider = key
                    .trim_end_matches(".api_key")
                    .parse()
                    .map_err(|e: String| anyhow!(e))?;
                let var = api_key_env(provider).unwrap_or_default();
                match resolved_api_key(provider) {
                    Some(key) => Ok(redact(&key)),
                    None => Ok(format!("(not set - use {} env var)", var)),
                }
            }

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `modelmux config list` to see available keys.",
                key
            )),
        }
    }

    /// Parse and store a dotted key; API keys are refused
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "database.path" => {
                let value = value.trim();
                self.database.path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "router.call_timeout_ms" => {
                let timeout: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid call_timeout_ms value: {}", value))?;
                if timeout == 0 {
                    return Err(anyhow!("call_timeout_ms must be greater than zero"));
                }
                self.router.call_timeout_ms = timeout;
            }
            "providers.openai_base_url" => {
                self.providers.openai_base_url = parse_url(key, value)?;
            }
            "providers.anthropic_base_url" => {
                self.providers.anthropic_base_url = parse_url(key, value)?;
            }
            "providers.huggingface_base_url" => {
                self.providers.huggingface_base_url = parse_url(key, value)?;
            }
            "providers.local_base_url" => {
                self.providers.local_base_url = parse_url(key, value)?;
            }
            "providers.request_timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid request_timeout_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("request_timeout_secs must be greater than zero"));
                }
                self.providers.request_timeout_secs = secs;
            }

            // API keys cannot be set via config
            "openai.api_key" | "anthropic.api_key" | "huggingface.api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the provider's environment variable instead \
                     (OPENAI_API_KEY, ANTHROPIC_API_KEY, HUGGINGFACE_API_KEY)."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `modelmux config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// Every key with its value, API keys redacted
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Overwrite `config.toml` with the defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
