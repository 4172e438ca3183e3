use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use thiserror::Error;

use crate::engine::EngineEnvironment;

pub const BUILTIN_BRIDGE_CONFIG: &str = include_str!("data/bridge_config.json");

#[cfg(windows)]
const SEARCH_PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
const SEARCH_PATH_SEPARATOR: char = ':';

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    thread_name: String,
    search_path_env: String,
    search_paths: Vec<PathBuf>,
    debug_level: u8,
    not_running_message: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            thread_name: "script-engine".to_string(),
            search_path_env: "SCRIPT_ENGINE_PATH".to_string(),
            search_paths: Vec::new(),
            debug_level: 0,
            not_running_message: "The script engine is not running.".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_BRIDGE_CONFIG)
                .expect("builtin bridge config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, BridgeConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| BridgeConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = BridgeConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn search_path_env(&self) -> &str {
        &self.search_path_env
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn debug_level(&self) -> u8 {
        self.debug_level
    }

    pub fn not_running_message(&self) -> &str {
        &self.not_running_message
    }

    pub fn with_debug_level(mut self, level: u8) -> Self {
        self.debug_level = level;
        self
    }

    /// Startup environment for the engine, reading extra search paths from
    /// the configured environment variable.
    pub fn engine_environment(&self) -> EngineEnvironment {
        let value = env::var(&self.search_path_env).ok();
        self.engine_environment_with(value.as_deref())
    }

    /// Like [`Self::engine_environment`] with an explicit variable value.
    /// Paths from the variable come first, configured defaults after.
    pub fn engine_environment_with(&self, value: Option<&str>) -> EngineEnvironment {
        let mut search_paths = value.map(split_search_paths).unwrap_or_default();
        search_paths.extend(self.search_paths.iter().cloned());
        EngineEnvironment {
            search_paths,
            debug_level: self.debug_level,
        }
    }
}

/// Split a host-convention path list, dropping empty segments.
pub fn split_search_paths(value: &str) -> Vec<PathBuf> {
    value
        .split(SEARCH_PATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[derive(Debug, Error)]
pub enum BridgeConfigError {
    #[error("failed to parse bridge config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read bridge config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct BridgeConfigMetadata {
    path: Option<PathBuf>,
}

impl BridgeConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

pub fn load_bridge_config_from_env() -> (Arc<BridgeConfig>, BridgeConfigMetadata) {
    let Some(path) = env::var("SCRIPT_BRIDGE_CONFIG_PATH").ok().map(PathBuf::from) else {
        tracing::info!(target: "script_bridge::config", "bridge_config.loaded=builtin");
        return (BridgeConfig::builtin(), BridgeConfigMetadata::new(None));
    };

    match BridgeConfig::from_file(&path) {
        Ok(config) => {
            tracing::info!(
                target: "script_bridge::config",
                path = %path.display(),
                "bridge_config.loaded=file"
            );
            (Arc::new(config), BridgeConfigMetadata::new(Some(path)))
        }
        Err(err) => {
            tracing::warn!(
                target: "script_bridge::config",
                path = %path.display(),
                error = %err,
                "bridge_config.load_failed"
            );
            (BridgeConfig::builtin(), BridgeConfigMetadata::new(None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_config_parses() {
        let config = BridgeConfig::builtin();
        assert_eq!(config.thread_name(), "script-engine");
        assert_eq!(config.search_path_env(), "SCRIPT_ENGINE_PATH");
        assert_eq!(config.search_paths(), [PathBuf::from("scripts")]);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = BridgeConfig::from_json_str(r#"{ "debug_level": 3 }"#).expect("parse");
        assert_eq!(config.debug_level(), 3);
        assert_eq!(config.thread_name(), "script-engine");
        assert!(config.search_paths().is_empty());
    }

    #[test]
    fn search_paths_split_and_drop_empty_segments() {
        let sep = SEARCH_PATH_SEPARATOR;
        let value = format!("a{sep}{sep}b/c{sep}");
        assert_eq!(
            split_search_paths(&value),
            vec![PathBuf::from("a"), PathBuf::from("b/c")]
        );
        assert!(split_search_paths("").is_empty());
    }

    #[test]
    fn env_paths_precede_configured_defaults() {
        let config = BridgeConfig::builtin();
        let environment = config.engine_environment_with(Some("extra"));
        assert_eq!(
            environment.search_paths,
            vec![PathBuf::from("extra"), PathBuf::from("scripts")]
        );

        let defaults_only = config.engine_environment_with(None);
        assert_eq!(defaults_only.search_paths, vec![PathBuf::from("scripts")]);
    }

    #[test]
    fn unreadable_file_reports_path() {
        let err = BridgeConfig::from_file(Path::new("/nonexistent/bridge.json"))
            .expect_err("missing file");
        assert!(matches!(err, BridgeConfigError::ReadFailed { .. }));
    }
}
