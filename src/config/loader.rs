//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./dealchat.toml or ./.dealchat/config.toml
//! 2. User config: ~/.dealchat/config.toml
//! 3. System config: /etc/dealchat/config.toml
//! 4. Built-in defaults
//!
//! After the file is loaded, environment variables listed in [`crate::env::vars`]
//! are applied on top of it.

use crate::config::types::{BackendKind, ConfigError, FallbackConfig, ProviderConfig};
use crate::env::{self, vars};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

impl ProviderConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::Io(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self.to_toml_string()?;
        fs::write(path.as_ref(), content)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Taking the lookup as a function keeps this testable without touching
    /// the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = get(vars::PROVIDER) {
            self.active_backend = BackendKind::from_str(&provider)?;
        }

        if let Some(provider) = get(vars::FALLBACK_PROVIDER) {
            let backend = BackendKind::from_str(&provider)?;
            let model = get(vars::FALLBACK_MODEL)
                .or_else(|| self.fallback.as_ref().map(|f| f.model.clone()))
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "{} is set but {} is missing",
                        vars::FALLBACK_PROVIDER,
                        vars::FALLBACK_MODEL
                    ))
                })?;
            self.fallback = Some(FallbackConfig { backend, model });
        } else if let (Some(model), Some(fallback)) =
            (get(vars::FALLBACK_MODEL), self.fallback.as_mut())
        {
            fallback.model = model;
        }

        if let Some(model) = get(vars::MODEL_SIMPLE) {
            self.models.simple = model;
        }
        if let Some(model) = get(vars::MODEL_COMPLEX) {
            self.models.complex = model;
        }
        if let Some(model) = get(vars::MODEL_EMBEDDING) {
            self.models.embedding = model;
        }

        let credentials = [
            (BackendKind::OpenAi, vars::OPENAI_API_KEY, vars::OPENAI_BASE_URL),
            (BackendKind::Anthropic, vars::ANTHROPIC_API_KEY, vars::ANTHROPIC_BASE_URL),
            (BackendKind::Gemini, vars::GEMINI_API_KEY, vars::GEMINI_BASE_URL),
        ];
        for (kind, key_var, url_var) in credentials {
            let creds = self.credentials_mut(kind);
            if let Some(key) = get(key_var) {
                creds.api_key = Some(key);
            }
            if let Some(url) = get(url_var) {
                creds.base_url = Some(url);
            }
        }

        if let Some(value) = get(vars::CHAT_ENABLED) {
            self.feature_flags.enabled = parse_bool(vars::CHAT_ENABLED, &value)?;
        }
        if let Some(value) = get(vars::CHAT_STREAMING_ENABLED) {
            self.feature_flags.streaming = parse_bool(vars::CHAT_STREAMING_ENABLED, &value)?;
        }
        if let Some(value) = get(vars::CHAT_CACHE_ENABLED) {
            self.feature_flags.caching = parse_bool(vars::CHAT_CACHE_ENABLED, &value)?;
        }
        if let Some(value) = get(vars::CHAT_MAX_INPUT_LENGTH) {
            self.limits.max_input_len = parse_number(vars::CHAT_MAX_INPUT_LENGTH, &value)?;
        }
        if let Some(value) = get(vars::TIMEOUT_SECS) {
            self.request.timeout_secs = parse_number(vars::TIMEOUT_SECS, &value)?;
        }

        Ok(())
    }

    /// Build the process configuration: explicit file or discovered file,
    /// then the process environment, then validation.
    pub fn load(config_override: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_override {
            Some(path) => {
                info!("Loading configuration override from: {:?}", path);
                Self::from_toml_file(path)?
            }
            None => ConfigDiscovery::discover_config()?,
        };
        config.apply_env(|key| std_env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<ProviderConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return ProviderConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(ProviderConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::get_config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Get list of configuration file candidates in priority order
    pub fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.extend(env::local_config_file_paths(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from(env::SYSTEM_CONFIG_PATH));

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Create a default config file in the user's home directory
    pub fn create_default_user_config() -> Result<PathBuf, ConfigError> {
        let home_dir = Self::get_home_dir()
            .ok_or_else(|| ConfigError::Io("Could not determine home directory".to_string()))?;

        let config_dir = env::dealchat_dir_path(&home_dir);
        let config_path = env::user_config_file_path(&home_dir);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .map_err(|e| ConfigError::Io(format!("{}: {}", config_dir.display(), e)))?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if !config_path.exists() {
            ProviderConfig::default().to_toml_file(&config_path)?;
            info!("Created default configuration file: {:?}", config_path);
        } else {
            warn!("Configuration file already exists: {:?}", config_path);
        }

        Ok(config_path)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }
    }
}
