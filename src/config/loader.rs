//! Configuration Loader
//!
//! Environment-aware loading of `conduit-config.yaml`: file discovery, size-limited
//! reads, environment override merging, validation and sanitized logging.

use serde_json::Value as JsonValue;
use serde_yaml::{Mapping, Value as YamlValue};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::ConduitConfig;
use crate::logging::get_environment;

const CONFIG_FILE_NAMES: [&str; 2] = ["conduit-config.yaml", "conduit-config.yml"];
const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];
const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024;
const SENSITIVE_KEYS: [&str; 5] = ["password", "secret", "token", "credential", "url"];

/// Loaded, validated configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: ConduitConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load from the default directory for the detected environment
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory_with_env(config_dir, &get_environment())
    }

    /// Load from `config_dir` (or the default directory) for an explicit
    /// environment; process environment variables are not consulted
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(default_config_directory);
        debug!(
            environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let path = locate_config_file(&config_directory)?;
        let content = read_bounded(&path)?;
        let config = resolve(&content, &path.display().to_string(), environment)?;
        config.validate()?;

        let manager = ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        };
        debug!(config = %manager.debug_config(), "Resolved configuration");
        info!(
            environment,
            request_limit = manager.config.rate_limiter.request_limit,
            window_seconds = manager.config.rate_limiter.window_seconds,
            max_concurrent = manager.config.queue_processor.max_concurrent,
            retry_strategy = ?manager.config.retry.strategy,
            "✅ Configuration loaded"
        );
        Ok(Arc::new(manager))
    }

    /// Parse configuration from YAML text, applying `environment` overrides
    pub fn from_yaml_str(content: &str, environment: &str) -> ConfigResult<ConduitConfig> {
        let config = resolve(content, "<inline>", environment)?;
        config.validate()?;
        Ok(config)
    }

    pub fn config(&self) -> &ConduitConfig {
        &self.config
    }

    /// Configuration as JSON with credentials masked
    pub fn debug_config(&self) -> JsonValue {
        let mut rendered = serde_json::json!(self.config);
        mask_sensitive(&mut rendered);
        rendered
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }
}

/// `CONDUIT_CONFIG_DIR` when set, otherwise `./config`
fn default_config_directory() -> PathBuf {
    env::var("CONDUIT_CONFIG_DIR")
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .map_or_else(|| PathBuf::from("config"), PathBuf::from)
}

fn locate_config_file(directory: &Path) -> ConfigResult<PathBuf> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_NAMES
        .iter()
        .map(|name| directory.join(name))
        .collect();

    match candidates.iter().find(|candidate| candidate.is_file()) {
        Some(found) => {
            debug!(path = %found.display(), "Found configuration file");
            Ok(found.clone())
        }
        None => Err(ConfigurationError::config_file_not_found(candidates)),
    }
}

fn read_bounded(path: &Path) -> ConfigResult<String> {
    let display = path.display().to_string();
    let size = fs::metadata(path)
        .map_err(|e| ConfigurationError::file_read_error(&display, e))?
        .len();

    if size > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigurationError::invalid_value(
            "file_size",
            size.to_string(),
            format!(
                "configuration file exceeds the {}MB limit",
                MAX_CONFIG_FILE_SIZE / (1024 * 1024)
            ),
        ));
    }

    fs::read_to_string(path).map_err(|e| ConfigurationError::file_read_error(display, e))
}

/// Parse a document, fold the `environment` block over the base values and drop
/// every environment block before deserializing
fn resolve(content: &str, source: &str, environment: &str) -> ConfigResult<ConduitConfig> {
    let document: YamlValue =
        serde_yaml::from_str(content).map_err(|e| ConfigurationError::invalid_yaml(source, e))?;

    let mut base = match document {
        YamlValue::Mapping(map) => map,
        // An empty file parses as null
        YamlValue::Null => Mapping::new(),
        other => {
            return Err(ConfigurationError::invalid_yaml(
                source,
                format!("expected a mapping at the top level, found {other:?}"),
            ))
        }
    };

    let overrides = base.get(environment).cloned();
    for section in ENVIRONMENT_SECTIONS {
        base.remove(section);
    }

    let mut merged = YamlValue::Mapping(base);
    if let Some(overrides) = overrides {
        debug!(environment, "Applying environment overrides");
        overlay(&mut merged, overrides);
    }

    serde_yaml::from_value(merged).map_err(|e| ConfigurationError::invalid_yaml(source, e))
}

/// Recursive merge; mappings merge key by key, anything else replaces
fn overlay(base: &mut YamlValue, overrides: YamlValue) {
    match (base, overrides) {
        (YamlValue::Mapping(target), YamlValue::Mapping(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => overlay(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn mask_sensitive(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            for (key, entry) in map.iter_mut() {
                let key = key.to_lowercase();
                if SENSITIVE_KEYS.iter().any(|pattern| key.contains(pattern)) {
                    *entry = masked(entry);
                } else {
                    mask_sensitive(entry);
                }
            }
        }
        JsonValue::Array(items) => items.iter_mut().for_each(mask_sensitive),
        _ => {}
    }
}

fn masked(value: &JsonValue) -> JsonValue {
    let text = match value {
        JsonValue::Null => return JsonValue::Null,
        JsonValue::String(s) if s.is_empty() => "[EMPTY]".to_string(),
        // Keep two characters at each end
        JsonValue::String(s) => match (s.get(..2), s.get(s.len().saturating_sub(2)..)) {
            (Some(head), Some(tail)) if s.len() > 4 => format!("[MASKED: {head}***{tail}]"),
            _ => "[MASKED: ***]".to_string(),
        },
        _ => "[MASKED]".to_string(),
    };
    JsonValue::String(text)
}
