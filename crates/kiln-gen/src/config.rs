//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables: `KILN_{PROVIDER}_API_KEY`
//! 2. Project-local: `.kiln/config.toml`
//! 3. Global: `~/.kiln/config.toml`

use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Providers whose API keys may come from the environment
const ENV_PROVIDERS: [&str; 2] = ["meshy", "text"];

const PROJECT_CONFIG: &str = ".kiln/config.toml";

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    /// Model name, for text-generation providers
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            model: None,
            enabled: true,
        }
    }
}

impl ProviderConfig {
    /// Take every value `other` sets; `enabled` always follows the later layer
    fn overlay(&mut self, other: ProviderConfig) {
        self.api_key = other.api_key.or(self.api_key.take());
        self.api_url = other.api_url.or(self.api_url.take());
        self.model = other.model.or(self.model.take());
        self.enabled = other.enabled;
    }
}

fn default_true() -> bool {
    true
}

/// Generation defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Generation service to use (`meshy` or `mock`)
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,
    #[serde(default = "default_art_style")]
    pub art_style: String,
    #[serde(default = "default_topology")]
    pub topology: String,
    #[serde(default = "default_target_polycount")]
    pub target_polycount: u32,
    /// Ask the refine stage for PBR texture maps
    #[serde(default = "default_true")]
    pub enable_pbr: bool,
    #[serde(default = "default_artifact_format")]
    pub artifact_format: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Give up on a stage that has not finished after this long. Unset means
    /// poll until the service reports a terminal status.
    #[serde(default)]
    pub stage_timeout_secs: Option<u64>,
    /// Per-call HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            poll_interval_secs: default_poll_interval_secs(),
            art_style: default_art_style(),
            topology: default_topology(),
            target_polycount: default_target_polycount(),
            enable_pbr: true,
            artifact_format: default_artifact_format(),
            output_dir: default_output_dir(),
            stage_timeout_secs: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    /// Poll cadence, at least 100ms. Out-of-range values fall back to the
    /// default; `validate` rejects them at load time.
    pub fn poll_interval(&self) -> Duration {
        self.checked_poll_interval()
            .unwrap_or_else(|| Duration::from_secs_f64(default_poll_interval_secs()))
    }

    fn checked_poll_interval(&self) -> Option<Duration> {
        let secs = self.poll_interval_secs;
        if !secs.is_finite() {
            return None;
        }
        let floor = Duration::from_millis(100);
        if secs <= 0.1 {
            return Some(floor);
        }
        Duration::try_from_secs_f64(secs).ok().map(|d| d.max(floor))
    }

    pub fn validate(&self) -> Result<()> {
        if self.checked_poll_interval().is_none() {
            return Err(KilnError::ConfigurationError(format!(
                "generation.poll_interval_secs must be a finite number of seconds, got {}",
                self.poll_interval_secs
            )));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_service() -> String {
    "meshy".to_string()
}
fn default_poll_interval_secs() -> f64 {
    3.0
}
fn default_art_style() -> String {
    "realistic".to_string()
}
fn default_topology() -> String {
    "triangle".to_string()
}
fn default_target_polycount() -> u32 {
    30_000
}
fn default_artifact_format() -> String {
    "glb".to_string()
}
fn default_output_dir() -> String {
    ".kiln/generated".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}

/// Storage locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_library_path")]
    pub library: String,
    #[serde(default = "default_jobs_path")]
    pub jobs: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            library: default_library_path(),
            jobs: default_jobs_path(),
        }
    }
}

fn default_library_path() -> String {
    ".kiln/library.json".to_string()
}
fn default_jobs_path() -> String {
    ".kiln/jobs.json".to_string()
}

/// Top-level config file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnConfigFile {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Resolved configuration with environment variable overrides applied
#[derive(Debug, Clone, Default)]
pub struct KilnConfig {
    pub providers: HashMap<String, ProviderConfig>,
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
}

impl KilnConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let layers = Self::global_config_path()
            .into_iter()
            .chain(std::iter::once(PathBuf::from(PROJECT_CONFIG)));

        let mut config = KilnConfigFile::default();
        for path in layers.filter(|p| p.exists()) {
            let layer = Self::load_file(&path)?;
            tracing::debug!(path = %path.display(), "loaded config layer");
            Self::merge_into(&mut config, layer);
        }

        Self::apply_env_overrides(&mut config);
        config.generation.validate()?;
        Ok(config.into())
    }

    /// Load config from a specific file path only (for testing)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        Self::apply_env_overrides(&mut config);
        config.generation.validate()?;
        Ok(config.into())
    }

    fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Non-empty API key for a provider
    pub fn api_key(&self, provider_name: &str) -> Option<&str> {
        self.provider(provider_name)?
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
    }

    /// API key for a provider, or a configuration error naming where to set it
    pub fn require_api_key(&self, provider_name: &str) -> Result<&str> {
        self.api_key(provider_name).ok_or_else(|| {
            KilnError::ConfigurationError(format!(
                "{} API key not configured. Set KILN_{}_API_KEY or add it to {}",
                provider_name,
                provider_name.to_uppercase(),
                PROJECT_CONFIG
            ))
        })
    }

    /// Endpoint override for a provider
    pub fn api_url(&self, provider_name: &str) -> Option<&str> {
        self.provider(provider_name)?.api_url.as_deref()
    }

    /// Model name for a text provider
    pub fn model(&self, provider_name: &str) -> Option<&str> {
        self.provider(provider_name)?.model.as_deref()
    }

    /// Unlisted providers count as enabled
    pub fn is_enabled(&self, provider_name: &str) -> bool {
        self.provider(provider_name).map_or(true, |p| p.enabled)
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".kiln").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<KilnConfigFile> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            KilnError::ConfigurationError(format!(
                "Failed to parse config {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn merge_into(base: &mut KilnConfigFile, overlay: KilnConfigFile) {
        for (name, provider) in overlay.providers {
            base.providers.entry(name).or_default().overlay(provider);
        }

        // A layer only overrides the values it changes from the defaults
        let defaults = GenerationConfig::default();
        let gen = overlay.generation;
        let target = &mut base.generation;
        if gen.service != defaults.service {
            target.service = gen.service;
        }
        if gen.poll_interval_secs != defaults.poll_interval_secs {
            target.poll_interval_secs = gen.poll_interval_secs;
        }
        if gen.art_style != defaults.art_style {
            target.art_style = gen.art_style;
        }
        if gen.topology != defaults.topology {
            target.topology = gen.topology;
        }
        if gen.target_polycount != defaults.target_polycount {
            target.target_polycount = gen.target_polycount;
        }
        if gen.enable_pbr != defaults.enable_pbr {
            target.enable_pbr = gen.enable_pbr;
        }
        if gen.artifact_format != defaults.artifact_format {
            target.artifact_format = gen.artifact_format;
        }
        if gen.output_dir != defaults.output_dir {
            target.output_dir = gen.output_dir;
        }
        if gen.stage_timeout_secs.is_some() {
            target.stage_timeout_secs = gen.stage_timeout_secs;
        }
        if gen.request_timeout_secs != defaults.request_timeout_secs {
            target.request_timeout_secs = gen.request_timeout_secs;
        }

        let storage_defaults = StorageConfig::default();
        if overlay.storage.library != storage_defaults.library {
            base.storage.library = overlay.storage.library;
        }
        if overlay.storage.jobs != storage_defaults.jobs {
            base.storage.jobs = overlay.storage.jobs;
        }
    }

    fn apply_env_overrides(config: &mut KilnConfigFile) {
        for name in ENV_PROVIDERS {
            let var = format!("KILN_{}_API_KEY", name.to_uppercase());
            if let Ok(key) = std::env::var(&var) {
                tracing::debug!(provider = name, "API key taken from {}", var);
                config.providers.entry(name.to_string()).or_default().api_key = Some(key);
            }
        }
    }
}

impl From<KilnConfigFile> for KilnConfig {
    fn from(file: KilnConfigFile) -> Self {
        Self {
            providers: file.providers,
            generation: file.generation,
            storage: file.storage,
        }
    }
}
