use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf};

use crate::provider::ProviderId;

fn default_true() -> bool {
    true
}

/// Configuration for a single provider (API key, endpoint, ordering).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,

    /// Overrides [`ProviderId::default_base_url`]; mostly useful for tests and proxies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Lower runs first. Falls back to [`ProviderId::default_priority`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ProviderConfig {
    pub fn with_key(api_key: String) -> Self {
        Self { api_key, base_url: None, priority: None, enabled: true }
    }
}

/// Service-wide knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceSettings {
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub fallback_enabled: bool,
    /// api.weather.gov rejects requests without a User-Agent.
    pub user_agent: String,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            request_timeout_secs: 10,
            fallback_enabled: true,
            user_agent: format!("petweather/{}", env!("CARGO_PKG_VERSION")),
            rate_limit_requests: 1000,
            rate_limit_window_secs: 60,
        }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceSettings,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    /// priority = 1
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Config {
    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Load config from disk (or defaults on first run), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        let mut cfg = Self::load_from(&path)?;
        cfg.apply_env(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    /// Load config from an explicit path without touching the environment.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "petweather", "petweather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overlay API keys from the environment. Non-empty variables win over the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for id in ProviderId::keyed() {
            let Some(var) = id.env_var() else { continue };
            let Some(value) = lookup(var) else { continue };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            match self.providers.get_mut(id.as_str()) {
                Some(existing) => existing.api_key = value.to_string(),
                None => {
                    self.providers
                        .insert(id.as_str().to_string(), ProviderConfig::with_key(value.to_string()));
                }
            }
        }
    }

    /// Convenience helper: set/replace a provider API key, keeping any other settings.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers
            .entry(provider_id.as_str().to_string())
            .and_modify(|cfg| cfg.api_key = api_key.clone())
            .or_insert_with(|| ProviderConfig::with_key(api_key));
    }

    pub fn set_provider_enabled(&mut self, provider_id: ProviderId, enabled: bool) {
        self.providers
            .entry(provider_id.as_str().to_string())
            .or_insert_with(|| ProviderConfig::with_key(String::new()))
            .enabled = enabled;
    }

    /// Returns API key for a provider, if present and not blank.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers
            .get(provider_id.as_str())
            .map(|cfg| cfg.api_key.trim())
            .filter(|key| !key.is_empty())
    }

    pub fn provider_base_url(&self, provider_id: ProviderId) -> &str {
        self.provider_config(provider_id)
            .and_then(|cfg| cfg.base_url.as_deref())
            .unwrap_or_else(|| provider_id.default_base_url())
    }

    pub fn provider_priority(&self, provider_id: ProviderId) -> u32 {
        self.provider_config(provider_id)
            .and_then(|cfg| cfg.priority)
            .unwrap_or_else(|| provider_id.default_priority())
    }

    /// Missing entries count as enabled; a missing key is handled separately.
    pub fn is_provider_enabled(&self, provider_id: ProviderId) -> bool {
        self.provider_config(provider_id).is_none_or(|cfg| cfg.enabled)
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        !provider_id.requires_key() || self.provider_api_key(provider_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderId;

    #[test]
    fn default_config_has_five_minute_ttl() {
        let cfg = Config::default();
        assert_eq!(cfg.service.cache_ttl_secs, 300);
        assert_eq!(cfg.service.request_timeout_secs, 10);
        assert!(cfg.service.fallback_enabled);
    }

    #[test]
    fn set_api_key_for_provider() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());

        let key = cfg.provider_api_key(ProviderId::OpenWeather);
        assert_eq!(key, Some("OPEN_KEY"));
        assert!(cfg.is_provider_configured(ProviderId::OpenWeather));
        assert!(!cfg.is_provider_configured(ProviderId::WeatherApi));
        assert!(cfg.is_provider_configured(ProviderId::Noaa));
    }

    #[test]
    fn upsert_keeps_priority_and_base_url() {
        let mut cfg = Config::default();
        cfg.providers.insert(
            "weatherapi".into(),
            ProviderConfig {
                api_key: "OLD".into(),
                base_url: Some("http://localhost:1234".into()),
                priority: Some(9),
                enabled: true,
            },
        );

        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "NEW".into());

        assert_eq!(cfg.provider_api_key(ProviderId::WeatherApi), Some("NEW"));
        assert_eq!(cfg.provider_base_url(ProviderId::WeatherApi), "http://localhost:1234");
        assert_eq!(cfg.provider_priority(ProviderId::WeatherApi), 9);
    }

    #[test]
    fn blank_key_counts_as_unconfigured() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::TomorrowIo, "  ".into());
        assert_eq!(cfg.provider_api_key(ProviderId::TomorrowIo), None);
        assert!(!cfg.is_provider_configured(ProviderId::TomorrowIo));
    }

    #[test]
    fn defaults_fill_in_unset_fields() {
        let cfg = Config::default();
        assert_eq!(cfg.provider_priority(ProviderId::VisualCrossing), 4);
        assert_eq!(
            cfg.provider_base_url(ProviderId::Noaa),
            ProviderId::Noaa.default_base_url()
        );
        assert!(cfg.is_provider_enabled(ProviderId::Meteomatics));
    }

    #[test]
    fn env_overrides_file_keys() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "FROM_FILE".into());

        cfg.apply_env(|name| match name {
            "OPENWEATHER_API_KEY" => Some("FROM_ENV".to_string()),
            "WEATHERAPI_KEY" => Some("WA_ENV".to_string()),
            "TOMORROW_API_KEY" => Some(String::new()),
            _ => None,
        });

        assert_eq!(cfg.provider_api_key(ProviderId::OpenWeather), Some("FROM_ENV"));
        assert_eq!(cfg.provider_api_key(ProviderId::WeatherApi), Some("WA_ENV"));
        assert_eq!(cfg.provider_api_key(ProviderId::TomorrowIo), None);
    }

    #[test]
    fn parses_toml_with_partial_sections() {
        let toml = r#"
            [service]
            cache_ttl_secs = 60

            [providers.meteomatics]
            api_key = "user:pass"
            priority = 0
            enabled = false
        "#;

        let cfg: Config = toml::from_str(toml).expect("valid toml");
        assert_eq!(cfg.service.cache_ttl_secs, 60);
        assert_eq!(cfg.service.request_timeout_secs, 10);
        assert_eq!(cfg.provider_priority(ProviderId::Meteomatics), 0);
        assert!(!cfg.is_provider_enabled(ProviderId::Meteomatics));
    }

    #[test]
    fn load_from_missing_file_returns_default() {
        let path = std::env::temp_dir().join("petweather-does-not-exist/config.toml");
        let cfg = Config::load_from(&path).expect("missing file is fine");
        assert!(cfg.providers.is_empty());
    }
}
