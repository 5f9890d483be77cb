use anyhow::{Context, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, collections::HashMap, fs, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    error::{Result, WeatherError},
    http::{RetryPolicy, Timeouts},
    provider::ProviderId,
};

/// Per-provider overrides. Every field is optional and resolved against
/// [`defaults_for`].
///
/// Example TOML:
/// [providers.openweather]
/// api_key = "..."
/// total_timeout_secs = 5
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Only meaningful for openweather.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geocoding_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_timeout_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refill_per_sec: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub max_tokens: u32,
    pub refill_per_sec: f64,
}

/// Fully resolved settings for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub id: ProviderId,
    pub api_key: Option<String>,
    pub base_url: String,
    pub geocoding_url: Option<String>,
    pub timeouts: Timeouts,
    pub rate_limit: RateLimitSettings,
}

pub const OPENWEATHER_GEOCODING_URL: &str = "http://api.openweathermap.org/geo/1.0/direct";

/// Built-in defaults for `id`.
pub fn defaults_for(id: ProviderId) -> ProviderSettings {
    let (base_url, geocoding_url, connect, total, max_tokens, refill_per_sec) = match id {
        ProviderId::OpenWeather => (
            "https://api.openweathermap.org/data/2.5/weather",
            Some(OPENWEATHER_GEOCODING_URL),
            2.0,
            7.0,
            60,
            1.0,
        ),
        ProviderId::WeatherApi => ("http://api.weatherapi.com/v1/current.json", None, 2.0, 7.0, 100, 1.5),
        ProviderId::OpenMeteo => ("https://api.open-meteo.com/v1/forecast", None, 2.0, 8.0, 1000, 10.0),
    };

    ProviderSettings {
        id,
        api_key: None,
        base_url: base_url.to_string(),
        geocoding_url: geocoding_url.map(str::to_string),
        timeouts: Timeouts {
            connect: Duration::from_secs_f64(connect),
            total: Duration::from_secs_f64(total),
        },
        rate_limit: RateLimitSettings { max_tokens, refill_per_sec },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 600, max_size: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub pool_max_idle_per_host: usize,
    pub keepalive_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { pool_max_idle_per_host: 30, keepalive_secs: 30 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Normal,
    Admin,
}

impl FromStr for Role {
    type Err = WeatherError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(Role::Normal),
            "admin" => Ok(Role::Admin),
            other => Err(WeatherError::Configuration(format!("Unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Bearer token -> role.
    pub api_keys: HashMap<String, Role>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8000".to_string(), api_keys: HashMap::new() }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: HashMap<String, ProviderConfig>,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    pub connection: ConnectionConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load config from disk, or return defaults if it doesn't exist yet.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> anyhow::Result<()> {
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
    pub fn config_file_path() -> anyhow::Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-aggregator", "weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Apply environment overrides on top of whatever was loaded from disk.
    ///
    /// `lookup` is `std::env::var(..).ok()` in the binary; tests pass a map.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        for &id in ProviderId::all() {
            let Some(var) = id.api_key_env() else { continue };
            if let Some(key) = lookup(var).filter(|k| !k.trim().is_empty()) {
                self.upsert_provider_api_key(id, key.trim().to_string());
            }
        }

        override_parsed(&lookup, "CACHE_TTL", &mut self.cache.ttl_secs)?;
        override_parsed(&lookup, "CACHE_MAX_SIZE", &mut self.cache.max_size)?;
        override_parsed(&lookup, "MAX_RETRIES", &mut self.retry.max_retries)?;
        override_parsed(&lookup, "BASE_DELAY", &mut self.retry.base_delay_secs)?;
        override_parsed(&lookup, "MAX_DELAY", &mut self.retry.max_delay_secs)?;
        override_parsed(&lookup, "JITTER_FACTOR", &mut self.retry.jitter_factor)?;
        override_parsed(&lookup, "BACKOFF_MULTIPLIER", &mut self.retry.backoff_multiplier)?;

        if let Some(bind) = lookup("WEATHER_BIND") {
            self.server.bind = bind;
        }

        if let Some(raw) = lookup("WEATHER_API_KEYS") {
            for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (token, role) = pair.split_once(':').ok_or_else(|| {
                    WeatherError::Configuration(format!(
                        "WEATHER_API_KEYS entries must look like token:role, got '{pair}'"
                    ))
                })?;
                self.server.api_keys.insert(token.trim().to_string(), role.parse()?);
            }
        }

        self.validate()
    }

    /// Reject values that would make the retry or rate-limit math misbehave.
    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        for (name, value) in [
            ("base_delay_secs", retry.base_delay_secs),
            ("max_delay_secs", retry.max_delay_secs),
            ("jitter_factor", retry.jitter_factor),
            ("backoff_multiplier", retry.backoff_multiplier),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(WeatherError::Configuration(format!(
                    "retry.{name} must be a non-negative number, got {value}"
                )));
            }
        }

        for &id in ProviderId::all() {
            let settings = self.try_provider_settings(id)?;
            if settings.rate_limit.max_tokens == 0 {
                return Err(WeatherError::Configuration(format!(
                    "providers.{id}.max_tokens must be at least 1"
                )));
            }
        }

        Ok(())
    }

    /// Resolve `id`'s overrides against its defaults.
    ///
    /// Invalid overrides (non-positive timeouts or refill rates) fall back to
    /// the defaults here; [`Config::validate`] reports them.
    pub fn provider_settings(&self, id: ProviderId) -> ProviderSettings {
        self.try_provider_settings(id).unwrap_or_else(|_| {
            let mut settings = defaults_for(id);
            settings.api_key = self.provider_api_key(id).map(str::to_string);
            settings
        })
    }

    fn try_provider_settings(&self, id: ProviderId) -> Result<ProviderSettings> {
        let mut settings = defaults_for(id);
        let Some(overrides) = self.provider_config(id) else {
            return Ok(settings);
        };

        settings.api_key = overrides.api_key.clone();
        if let Some(url) = &overrides.base_url {
            settings.base_url = url.clone();
        }
        if let Some(url) = &overrides.geocoding_url {
            settings.geocoding_url = Some(url.clone());
        }
        if let Some(secs) = overrides.connect_timeout_secs {
            settings.timeouts.connect = positive_secs(id, "connect_timeout_secs", secs)?;
        }
        if let Some(secs) = overrides.total_timeout_secs {
            settings.timeouts.total = positive_secs(id, "total_timeout_secs", secs)?;
        }
        if let Some(max_tokens) = overrides.max_tokens {
            settings.rate_limit.max_tokens = max_tokens;
        }
        if let Some(rate) = overrides.refill_per_sec {
            positive_secs(id, "refill_per_sec", rate)?;
            settings.rate_limit.refill_per_sec = rate;
        }

        Ok(settings)
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Set/replace a provider API key, keeping any other overrides.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers
            .entry(provider_id.as_str().to_string())
            .or_default()
            .api_key = Some(api_key);
    }

    /// Returns API key for a provider, if present and non-empty.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.provider_config(provider_id)
            .and_then(|cfg| cfg.api_key.as_deref())
            .filter(|key| !key.is_empty())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }

    /// Env var names of required keys that are not configured.
    pub fn missing_api_keys(&self) -> Vec<&'static str> {
        ProviderId::all()
            .iter()
            .filter(|id| !self.is_provider_configured(**id))
            .filter_map(|id| id.api_key_env())
            .collect()
    }

    /// Sanitized view of the effective configuration. Never includes key values.
    pub fn summary(&self) -> ConfigSummary {
        let mut providers = BTreeMap::new();
        let mut api_keys_configured = BTreeMap::new();

        for &id in ProviderId::all() {
            let settings = self.provider_settings(id);
            providers.insert(
                id.as_str().to_string(),
                ProviderSummary {
                    base_url: settings.base_url,
                    timeouts: settings.timeouts,
                    rate_limit: settings.rate_limit,
                },
            );
            if id.api_key_env().is_some() {
                api_keys_configured.insert(id.as_str().to_string(), self.is_provider_configured(id));
            }
        }

        ConfigSummary {
            retry: self.retry.clone(),
            providers,
            cache: self.cache.clone(),
            connection: self.connection.clone(),
            api_keys_configured,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSummary {
    pub base_url: String,
    pub timeouts: Timeouts,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSummary {
    pub retry: RetryPolicy,
    pub providers: BTreeMap<String, ProviderSummary>,
    pub cache: CacheConfig,
    pub connection: ConnectionConfig,
    pub api_keys_configured: BTreeMap<String, bool>,
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    target: &mut T,
) -> Result<()> {
    if let Some(raw) = lookup(var) {
        *target = raw.trim().parse().map_err(|_| {
            WeatherError::Configuration(format!("{var} has an invalid value: '{raw}'"))
        })?;
    }
    Ok(())
}

fn positive_secs(id: ProviderId, field: &str, value: f64) -> Result<Duration> {
    if value.is_finite() && value > 0.0 {
        Ok(Duration::from_secs_f64(value))
    } else {
        Err(WeatherError::Configuration(format!(
            "providers.{id}.{field} must be positive, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_provider_table() {
        let cfg = Config::default();

        let ow = cfg.provider_settings(ProviderId::OpenWeather);
        assert_eq!(ow.rate_limit, RateLimitSettings { max_tokens: 60, refill_per_sec: 1.0 });
        assert_eq!(ow.timeouts.total, Duration::from_secs(7));
        assert!(ow.geocoding_url.is_some());

        let om = cfg.provider_settings(ProviderId::OpenMeteo);
        assert_eq!(om.rate_limit.max_tokens, 1000);
        assert_eq!(om.timeouts.total, Duration::from_secs(8));
        assert_eq!(om.timeouts.connect, Duration::from_secs(2));

        assert_eq!(cfg.retry.total_attempts(), 4);
        assert_eq!(cfg.cache.ttl_secs, 600);
    }

    #[test]
    fn set_api_key_for_provider() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());

        assert_eq!(cfg.provider_api_key(ProviderId::OpenWeather), Some("OPEN_KEY"));
        assert!(cfg.is_provider_configured(ProviderId::OpenWeather));
        assert!(!cfg.is_provider_configured(ProviderId::WeatherApi));
        assert_eq!(cfg.missing_api_keys(), vec!["WEATHERAPI_KEY"]);
    }

    #[test]
    fn upsert_keeps_other_overrides() {
        let mut cfg: Config = toml::from_str(
            r#"
            [providers.weatherapi]
            total_timeout_secs = 3.5
            "#,
        )
        .unwrap();

        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "WA".into());

        let wa = cfg.provider_settings(ProviderId::WeatherApi);
        assert_eq!(wa.api_key.as_deref(), Some("WA"));
        assert_eq!(wa.timeouts.total, Duration::from_millis(3500));
    }

    #[test]
    fn toml_sections_parse_with_partial_fields() {
        let cfg: Config = toml::from_str(
            r#"
            [retry]
            max_retries = 1

            [cache]
            ttl_secs = 30

            [server.api_keys]
            secret = "admin"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.retry.max_retries, 1);
        assert_eq!(cfg.retry.base_delay_secs, 1.0);
        assert_eq!(cfg.cache.ttl_secs, 30);
        assert_eq!(cfg.cache.max_size, 1000);
        assert_eq!(cfg.server.api_keys.get("secret"), Some(&Role::Admin));
        assert_eq!(cfg.server.bind, "0.0.0.0:8000");
    }

    #[test]
    fn env_overrides_apply_on_top_of_file() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(env(&[
            ("OPENWEATHER_API_KEY", "ow-key"),
            ("WEATHERAPI_KEY", "wa-key"),
            ("CACHE_TTL", "120"),
            ("MAX_RETRIES", "5"),
            ("JITTER_FACTOR", "0.25"),
            ("WEATHER_API_KEYS", "abc:normal, xyz:admin"),
        ]))
        .unwrap();

        assert!(cfg.missing_api_keys().is_empty());
        assert_eq!(cfg.cache.ttl_secs, 120);
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.jitter_factor, 0.25);
        assert_eq!(cfg.server.api_keys.get("abc"), Some(&Role::Normal));
        assert_eq!(cfg.server.api_keys.get("xyz"), Some(&Role::Admin));
    }

    #[test]
    fn unparseable_env_override_is_configuration_error() {
        let mut cfg = Config::default();
        let err = cfg.apply_env_overrides(env(&[("CACHE_TTL", "ten minutes")])).unwrap_err();

        assert!(matches!(err, WeatherError::Configuration(_)));
        assert!(err.to_string().contains("CACHE_TTL"));
    }

    #[test]
    fn invalid_provider_override_is_reported() {
        let cfg: Config = toml::from_str(
            r#"
            [providers.openmeteo]
            refill_per_sec = 0
            "#,
        )
        .unwrap();

        assert!(cfg.validate().is_err());
        assert_eq!(cfg.provider_settings(ProviderId::OpenMeteo).rate_limit.refill_per_sec, 10.0);
    }

    #[test]
    fn summary_never_contains_key_values() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "super-secret".into());

        let summary = cfg.summary();
        assert_eq!(summary.api_keys_configured.get("openweather"), Some(&true));
        assert_eq!(summary.api_keys_configured.get("weatherapi"), Some(&false));
        assert!(!summary.api_keys_configured.contains_key("openmeteo"));

        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("super-secret"));
        assert!(json.contains("\"total_secs\":7.0"));
    }
}
