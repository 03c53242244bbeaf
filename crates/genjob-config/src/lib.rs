use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use genjob_types::{JobClass, PollPolicy};

pub const KLING_API_KEY_ENV: &str = "KLING_API_KEY";
pub const REPLICATE_API_TOKEN_ENV: &str = "REPLICATE_API_TOKEN";
pub const KLING_BASE_URL_ENV: &str = "GENJOB_KLING_BASE_URL";
pub const REPLICATE_BASE_URL_ENV: &str = "GENJOB_REPLICATE_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Kling API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlingConfig {
    #[serde(default = "default_kling_base_url")]
    pub base_url: String,
    /// Compound key in `ACCESS_KEY:SECRET_KEY` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_kling_base_url() -> String {
    "https://api.klingai.com".to_string()
}

impl Default for KlingConfig {
    fn default() -> Self {
        Self {
            base_url: default_kling_base_url(),
            api_key: None,
        }
    }
}

/// Replicate API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateConfig {
    #[serde(default = "default_replicate_base_url")]
    pub base_url: String,
    /// Static bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

fn default_replicate_base_url() -> String {
    "https://api.replicate.com".to_string()
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            base_url: default_replicate_base_url(),
            api_token: None,
        }
    }
}

/// Per-request HTTP limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout for a single submit or status request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Timeout for a single artifact download.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Largest artifact accepted, in bytes.
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_download_timeout_secs() -> u64 {
    300
}

fn default_max_download_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            max_download_bytes: default_max_download_bytes(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Partial override of a class's poll policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Poll policy overrides keyed by job class.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick: Option<PollOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<PollOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_upscale: Option<PollOverride>,
}

impl PollingConfig {
    /// Effective policy for a class: built-in defaults patched by any override.
    pub fn policy(&self, class: JobClass) -> PollPolicy {
        let mut policy = class.default_policy();
        let over = match class {
            JobClass::Quick => self.quick.as_ref(),
            JobClass::Generation => self.generation.as_ref(),
            JobClass::VideoUpscale => self.video_upscale.as_ref(),
        };
        if let Some(over) = over {
            if let Some(secs) = over.interval_secs {
                policy.interval = Duration::from_secs(secs);
            }
            if let Some(secs) = over.timeout_secs {
                policy.timeout = Duration::from_secs(secs);
            }
        }
        policy
    }
}

/// Top-level genjob configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenJobConfig {
    #[serde(default)]
    pub kling: KlingConfig,
    #[serde(default)]
    pub replicate: ReplicateConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

impl GenJobConfig {
    /// Overlay secrets and endpoints from environment-style variables.
    ///
    /// `lookup` abstracts `std::env::var` so the overlay can be exercised without
    /// touching the process environment. Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(KLING_API_KEY_ENV) {
            self.kling.api_key = Some(key);
        }
        if let Some(token) = get(REPLICATE_API_TOKEN_ENV) {
            self.replicate.api_token = Some(token);
        }
        if let Some(url) = get(KLING_BASE_URL_ENV) {
            self.kling.base_url = url;
        }
        if let Some(url) = get(REPLICATE_BASE_URL_ENV) {
            self.replicate.base_url = url;
        }
    }
}

/// Resolve the genjob config directory (~/.genjob/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".genjob"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.genjob/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration for this process: `.env`, the config file, then the
/// environment overlay. Call once at startup.
pub fn load_config() -> Result<GenJobConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    let mut config = load_config_from(&path)?;
    config.apply_env_overrides(|name| std::env::var(name).ok());
    Ok(config)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<GenJobConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(GenJobConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: GenJobConfig = json5::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = GenJobConfig::default();
        assert_eq!(config.kling.base_url, "https://api.klingai.com");
        assert_eq!(config.replicate.base_url, "https://api.replicate.com");
        assert!(config.kling.api_key.is_none());
        assert_eq!(config.http.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.http.download_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            // comments are allowed
            replicate: { api_token: "r8_abc" },
            http: { request_timeout_secs: 15 },
            polling: {
                generation: { interval_secs: 2 },
                video_upscale: { timeout_secs: 3600 },
            },
        }"#;
        let config: GenJobConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.replicate.api_token.as_deref(), Some("r8_abc"));
        assert_eq!(config.replicate.base_url, "https://api.replicate.com");
        assert_eq!(config.http.request_timeout_secs, 15);
        assert_eq!(config.http.download_timeout_secs, 300);

        let generation = config.polling.policy(JobClass::Generation);
        assert_eq!(generation.interval, Duration::from_secs(2));
        assert_eq!(generation.timeout, Duration::from_secs(600));

        let upscale = config.polling.policy(JobClass::VideoUpscale);
        assert_eq!(upscale.interval, Duration::from_secs(10));
        assert_eq!(upscale.timeout, Duration::from_secs(3600));

        assert_eq!(
            config.polling.policy(JobClass::Quick),
            JobClass::Quick.default_policy()
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (KLING_API_KEY_ENV, "ak:sk"),
            (REPLICATE_API_TOKEN_ENV, "  "),
            (REPLICATE_BASE_URL_ENV, "http://127.0.0.1:9999"),
        ]);

        let mut config = GenJobConfig::default();
        config.replicate.api_token = Some("from-file".into());
        config.apply_env_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.kling.api_key.as_deref(), Some("ak:sk"));
        // Blank values do not clobber file settings.
        assert_eq!(config.replicate.api_token.as_deref(), Some("from-file"));
        assert_eq!(config.replicate.base_url, "http://127.0.0.1:9999");
        assert_eq!(config.kling.base_url, "https://api.klingai.com");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.json5")).unwrap();
        assert!(config.replicate.api_token.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(&path, "{ kling: { api_key: 'a:b' } }").unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.kling.api_key.as_deref(), Some("a:b"));
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(&path, "{ kling: ").unwrap();
        assert!(matches!(
            load_config_from(&path),
            Err(ConfigError::Json5(_))
        ));
    }
}
