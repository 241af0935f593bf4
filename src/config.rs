use crate::{error::StateError, state::InstalledMod};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CATALOG_URL: &str = "https://thunderstore.io/c/repo/api/v1/package/";
pub const DEFAULT_CORE_RUNTIME_URL: &str = "https://repomods.net/download/47";
const HOME_ENV: &str = "REPOHUB_HOME";
const CONFIG_FILE: &str = "config.json";
const MAX_PARALLEL_DOWNLOADS: usize = 8;

/// The per-user document: game location, install records and tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
    #[serde(default)]
    pub installed_mods: BTreeMap<String, InstalledMod>,
    #[serde(default)]
    pub installed_dependencies: Vec<String>,
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    #[serde(default = "default_core_runtime_url")]
    pub core_runtime_url: String,
    #[serde(default = "default_parallel_downloads")]
    pub max_parallel_downloads: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            repo_path: None,
            installed_mods: BTreeMap::new(),
            installed_dependencies: Vec::new(),
            catalog_url: default_catalog_url(),
            core_runtime_url: default_core_runtime_url(),
            max_parallel_downloads: default_parallel_downloads(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl AppConfig {
    /// Loads the document at `path`, falling back to defaults when it does
    /// not exist yet.
    pub fn load_from(path: &Path) -> std::result::Result<Self, StateError> {
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| StateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: AppConfig =
            serde_json::from_str(&raw).map_err(|source| StateError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.normalize();
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> std::result::Result<(), StateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StateError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let raw = serde_json::to_string_pretty(self).map_err(StateError::Serialize)?;
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, raw).map_err(|source| StateError::Write {
            path: temp.clone(),
            source,
        })?;
        fs::rename(&temp, path).map_err(|source| StateError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn parallel_downloads(&self) -> usize {
        self.max_parallel_downloads.clamp(1, MAX_PARALLEL_DOWNLOADS)
    }

    fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.installed_dependencies
            .retain(|dependency| seen.insert(dependency.clone()));
        self.max_parallel_downloads = self.parallel_downloads();
    }
}

pub fn base_data_dir() -> Result<PathBuf> {
    if let Some(home) = env::var_os(HOME_ENV) {
        return Ok(PathBuf::from(home));
    }
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("repohub"))
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

pub fn scratch_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("tmp")
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_core_runtime_url() -> String {
    DEFAULT_CORE_RUNTIME_URL.to_string()
}

fn default_parallel_downloads() -> usize {
    3
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_read_timeout() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_document_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.catalog_url, DEFAULT_CATALOG_URL);
    }

    #[test]
    fn partial_document_fills_tunables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"repo_path": "/games/REPO", "installed_dependencies": ["a-b", "a-b", "c-d"], "max_parallel_downloads": 40}"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.repo_path, Some(PathBuf::from("/games/REPO")));
        assert_eq!(config.installed_dependencies, vec!["a-b", "c-d"]);
        assert_eq!(config.max_parallel_downloads, MAX_PARALLEL_DOWNLOADS);
        assert_eq!(config.read_timeout_secs, 60);
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(StateError::Parse { .. })
        ));
    }

    #[test]
    fn save_replaces_document_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.repo_path = Some(PathBuf::from("/games/REPO"));
        config.save_to(&path).unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }
}
