use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::paths::{config_json_path, default_data_dir};
use crate::provider::ProviderKind;

const CONFIG_FILE_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub providers: ProviderConfigs,
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfigs {
    #[serde(default)]
    pub openai: Option<ProviderConfig>,
    #[serde(default)]
    pub anthropic: Option<ProviderConfig>,
    #[serde(default)]
    pub gemini: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Overrides the provider's nominal context window (tokens)
    #[serde(default)]
    pub context_window: Option<u32>,
}

/// Tunables for queueing, caching, trimming and the streaming shim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub idle_interval_ms: u64,
    pub error_backoff_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_high_water: usize,
    pub cache_max_entries: usize,
    pub stream_chunk_delay_ms: u64,
    pub context_safety_margin: f64,
    pub max_prompt_chars: usize,
    pub max_image_bytes: usize,
    pub connectivity_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: crate::queue::DEFAULT_MAX_RETRIES,
            retry_delay_ms: 2_000,
            idle_interval_ms: 1_000,
            error_backoff_ms: 10_000,
            cache_ttl_secs: 60 * 60,
            cache_high_water: 120,
            cache_max_entries: 100,
            stream_chunk_delay_ms: 30,
            context_safety_margin: 0.8,
            max_prompt_chars: 100_000,
            max_image_bytes: 20 * 1024 * 1024,
            connectivity_url: "https://www.google.com/generate_204".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn stream_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.stream_chunk_delay_ms)
    }
}

impl Config {
    /// Load configuration from ~/.courier/config.json, falling back to
    /// ./config.toml, then apply environment overrides.
    pub fn new() -> Self {
        let mut config = Config::default();

        let mut loaded = false;
        let json_path = config_json_path();
        if json_path.exists() {
            match std::fs::read_to_string(&json_path) {
                Ok(content) => match serde_json::from_str::<Config>(&content) {
                    Ok(file_config) => {
                        config = file_config;
                        loaded = true;
                    }
                    Err(e) => log::warn!("Failed to parse {}: {}", json_path.display(), e),
                },
                Err(e) => log::warn!("Failed to read {}: {}", json_path.display(), e),
            }
        }

        if !loaded && std::path::Path::new(CONFIG_FILE_PATH).exists() {
            if let Ok(content) = std::fs::read_to_string(CONFIG_FILE_PATH) {
                match toml::from_str::<Config>(&content) {
                    Ok(file_config) => config = file_config,
                    Err(e) => log::warn!("Failed to parse {}: {}", CONFIG_FILE_PATH, e),
                }
            }
        }

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(http_proxy) = var("HTTP_PROXY") {
            self.http_proxy = http_proxy;
        }
        if let Some(https_proxy) = var("HTTPS_PROXY") {
            self.https_proxy = https_proxy;
        }
        if let Some(dir) = var("COURIER_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        for (kind, name) in [
            (ProviderKind::OpenAI, "OPENAI_API_KEY"),
            (ProviderKind::Anthropic, "ANTHROPIC_API_KEY"),
            (ProviderKind::Gemini, "GEMINI_API_KEY"),
        ] {
            if let Some(key) = var(name).filter(|k| !k.trim().is_empty()) {
                self.provider_entry(kind).api_key = key;
            }
        }
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        match kind {
            ProviderKind::OpenAI => self.providers.openai.as_ref(),
            ProviderKind::Anthropic => self.providers.anthropic.as_ref(),
            ProviderKind::Gemini => self.providers.gemini.as_ref(),
        }
    }

    fn provider_entry(&mut self, kind: ProviderKind) -> &mut ProviderConfig {
        let slot = match kind {
            ProviderKind::OpenAI => &mut self.providers.openai,
            ProviderKind::Anthropic => &mut self.providers.anthropic,
            ProviderKind::Gemini => &mut self.providers.gemini,
        };
        slot.get_or_insert_with(ProviderConfig::default)
    }

    /// Configured API key for a provider, if non-empty
    pub fn api_key(&self, kind: ProviderKind) -> Option<&str> {
        self.provider(kind)
            .map(|p| p.api_key.as_str())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}
