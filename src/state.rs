use crate::{catalog::PackageSummary, config::AppConfig, error::StateError};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};
use time::OffsetDateTime;
use tracing::debug;

/// Record of an installed package, captured at install time so it stays
/// meaningful after the package leaves the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledMod {
    #[serde(flatten)]
    pub package: PackageSummary,
    #[serde(default)]
    pub installed_at: i64,
}

impl InstalledMod {
    pub fn new(package: PackageSummary) -> Self {
        Self {
            package,
            installed_at: now_timestamp(),
        }
    }

    pub fn name(&self) -> &str {
        &self.package.name
    }
}

/// Sole owner of the persisted document. Every mutation is a
/// read-modify-write under one mutex and is on disk before it returns.
pub struct StateStore {
    path: PathBuf,
    document: Mutex<AppConfig>,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self, StateError> {
        let document = AppConfig::load_from(path)?;
        debug!(
            path = %path.display(),
            mods = document.installed_mods.len(),
            dependencies = document.installed_dependencies.len(),
            "state loaded"
        );
        Ok(Self {
            path: path.to_path_buf(),
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the whole document.
    pub fn config(&self) -> AppConfig {
        self.lock().clone()
    }

    pub fn repo_path(&self) -> Option<PathBuf> {
        self.lock().repo_path.clone()
    }

    pub fn set_repo_path(&self, repo_path: Option<PathBuf>) -> Result<(), StateError> {
        self.mutate(|document| {
            document.repo_path = repo_path;
        })
    }

    pub fn upsert_mod(&self, name: &str, record: InstalledMod) -> Result<(), StateError> {
        self.mutate(|document| {
            document.installed_mods.insert(name.to_string(), record);
        })
    }

    pub fn remove_mod(&self, name: &str) -> Result<Option<InstalledMod>, StateError> {
        let mut guard = self.lock();
        if !guard.installed_mods.contains_key(name) {
            return Ok(None);
        }
        let mut next = guard.clone();
        let removed = next.installed_mods.remove(name);
        next.save_to(&self.path)?;
        *guard = next;
        Ok(removed)
    }

    pub fn get_mod(&self, name: &str) -> Option<InstalledMod> {
        self.lock().installed_mods.get(name).cloned()
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.lock().installed_mods.contains_key(name)
    }

    pub fn list_mods(&self) -> BTreeMap<String, InstalledMod> {
        self.lock().installed_mods.clone()
    }

    /// Records `reference` as satisfied. Returns `false` when it already was.
    pub fn add_dependency(&self, reference: &str) -> Result<bool, StateError> {
        let mut guard = self.lock();
        if guard
            .installed_dependencies
            .iter()
            .any(|existing| existing == reference)
        {
            return Ok(false);
        }
        let mut next = guard.clone();
        next.installed_dependencies.push(reference.to_string());
        next.save_to(&self.path)?;
        *guard = next;
        Ok(true)
    }

    pub fn is_dependency_installed(&self, reference: &str) -> bool {
        self.lock()
            .installed_dependencies
            .iter()
            .any(|existing| existing == reference)
    }

    pub fn installed_dependencies(&self) -> Vec<String> {
        self.lock().installed_dependencies.clone()
    }

    fn mutate<F>(&self, apply: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self.lock();
        let mut next = guard.clone();
        apply(&mut next);
        next.save_to(&self.path)?;
        *guard = next;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, AppConfig> {
        self.document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn now_timestamp() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
