use crate::{
    archive::{extract_zip, zip_dir, CleanupGuard},
    catalog::{CatalogCache, PackageSummary},
    dependency::{self, is_core_runtime, uses_root_layout},
    download::{download_to_scratch, ArchiveSource, CancelToken, Progress, ScratchFile},
    error::{Operation, WorkflowError},
    game::GamePaths,
    state::{InstalledMod, StateStore},
};
use serde::Serialize;
use std::{
    borrow::Cow,
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex,
    },
};
use tracing::{debug, info, warn};

/// Name the core runtime is locked and reported under.
pub const CORE_RUNTIME_PACKAGE: &str = "BepInEx";
const STAGING_DIR: &str = ".repohub-staging";

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Derived from the filesystem, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModInstallationState {
    Enabled,
    Disabled,
    NotInstalled,
}

impl ModInstallationState {
    pub fn label(self) -> &'static str {
        match self {
            ModInstallationState::Enabled => "enabled",
            ModInstallationState::Disabled => "disabled",
            ModInstallationState::NotInstalled => "not installed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallKind {
    /// A package the user asked for; recorded in the state store.
    Mod,
    /// Installed on behalf of another package; recorded by reference only.
    Dependency,
}

impl InstallKind {
    fn operation(self) -> Operation {
        match self {
            InstallKind::Mod => Operation::Install,
            InstallKind::Dependency => Operation::InstallDependency,
        }
    }
}

/// Which dependency candidates to install alongside a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySelection {
    All,
    None,
    Only(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Placement {
    PluginFolder(PathBuf),
    PluginRoot(PathBuf),
    GameRoot(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub package: String,
    pub version: Option<String>,
    pub placement: Placement,
    pub files: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyReport {
    pub installed: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub dependencies: DependencyReport,
    pub outcome: InstallOutcome,
}

/// Names of packages with an operation in flight.
#[derive(Debug, Default)]
pub struct PackageLocks {
    active: Mutex<HashSet<String>>,
    released: Condvar,
}

pub struct PackageLease<'a> {
    locks: &'a PackageLocks,
    name: String,
}

impl PackageLocks {
    pub fn try_acquire(&self, name: &str, operation: Operation) -> Result<PackageLease<'_>, WorkflowError> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(name.to_string()) {
            return Err(WorkflowError::Busy {
                package: name.to_string(),
                operation,
            });
        }
        Ok(PackageLease {
            locks: self,
            name: name.to_string(),
        })
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(name)
    }

    /// Blocks until no operation holds `name`.
    pub fn wait_until_free(&self, name: &str) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while active.contains(name) {
            active = self
                .released
                .wait(active)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl Drop for PackageLease<'_> {
    fn drop(&mut self) {
        self.locks
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.name);
        self.locks.released.notify_all();
    }
}

/// Drives every on-disk transition of a package and keeps the state store
/// consistent with it.
pub struct InstallWorkflow {
    store: Arc<StateStore>,
    catalog: Arc<CatalogCache>,
    source: Arc<dyn ArchiveSource>,
    scratch_dir: PathBuf,
    core_runtime_url: String,
    locks: PackageLocks,
}

impl InstallWorkflow {
    pub fn new(
        store: Arc<StateStore>,
        catalog: Arc<CatalogCache>,
        source: Arc<dyn ArchiveSource>,
        scratch_dir: PathBuf,
        core_runtime_url: String,
    ) -> Self {
        Self {
            store,
            catalog,
            source,
            scratch_dir,
            core_runtime_url,
            locks: PackageLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<CatalogCache> {
        &self.catalog
    }

    pub fn locks(&self) -> &PackageLocks {
        &self.locks
    }

    pub fn game_paths(&self) -> Option<GamePaths> {
        self.store
            .repo_path()
            .map(|root| GamePaths::new(&root))
    }

    pub fn mod_state(&self, name: &str) -> ModInstallationState {
        match self.game_paths() {
            Some(paths) => disk_state(&paths, name),
            None => ModInstallationState::NotInstalled,
        }
    }

    /// Downloads and extracts `package`. Plain packages land in their own
    /// folder under the plugin root; root-layout packages are merged into the
    /// plugin root itself.
    pub fn install(
        &self,
        package: &PackageSummary,
        kind: InstallKind,
        progress: &mut dyn FnMut(Progress),
        cancel: &CancelToken,
    ) -> Result<InstallOutcome, WorkflowError> {
        let operation = kind.operation();
        let name = package.name.as_str();
        let _lease = self.locks.try_acquire(name, operation)?;
        let paths = self.require_paths(name, operation)?;
        info!(package = name, version = %package.version, %operation, "install started");

        let resolved = self.resolve_download(package, operation)?;
        let package = &*resolved;
        let url = package.download_url.clone().unwrap_or_default();
        let scratch = self.download(name, operation, &url, progress, cancel)?;
        let staging = self.stage(&paths, name, operation, &scratch)?;
        drop(scratch);
        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled {
                package: name.to_string(),
                operation,
            });
        }

        let (placement, files) = if uses_root_layout(name) {
            fs::create_dir_all(&paths.plugins_dir).map_err(|err| {
                WorkflowError::filesystem(name, operation, "create directory", &paths.plugins_dir, err)
            })?;
            merge_staged(name, operation, staging.dir.path(), &paths.plugins_dir)?;
            drop(staging.dir);
            if kind == InstallKind::Mod {
                let reference = format!("{}-{}-{}", package.creator, package.name, package.version);
                self.store
                    .add_dependency(&reference)
                    .map_err(|source| state_error(name, operation, source))?;
            }
            (Placement::PluginRoot(paths.plugins_dir.clone()), staging.files)
        } else {
            let target = paths.mod_dir(name);
            let record = (kind == InstallKind::Mod).then(|| InstalledMod::new(package.clone()));
            self.commit_mod_dir(&paths, name, operation, staging.dir, &target, record)?;
            (Placement::PluginFolder(target), staging.files)
        };

        cleanup_staging_root(&paths);
        info!(package = name, files, "install finished");
        Ok(InstallOutcome {
            package: name.to_string(),
            version: Some(package.version.clone()),
            placement,
            files,
        })
    }

    /// Downloads the plugin loader and merges it into the game root.
    pub fn install_core_runtime(
        &self,
        progress: &mut dyn FnMut(Progress),
        cancel: &CancelToken,
    ) -> Result<InstallOutcome, WorkflowError> {
        let name = CORE_RUNTIME_PACKAGE;
        let operation = Operation::InstallCoreRuntime;
        let _lease = self.locks.try_acquire(name, operation)?;
        let paths = self.require_paths(name, operation)?;
        info!(url = %self.core_runtime_url, "core runtime install started");

        let scratch = self.download(name, operation, &self.core_runtime_url, progress, cancel)?;
        let staging = self.stage(&paths, name, operation, &scratch)?;
        drop(scratch);
        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled {
                package: name.to_string(),
                operation,
            });
        }
        merge_staged(name, operation, staging.dir.path(), &paths.game_root)?;
        drop(staging.dir);
        fs::create_dir_all(&paths.plugins_dir).map_err(|err| {
            WorkflowError::filesystem(name, operation, "create directory", &paths.plugins_dir, err)
        })?;

        cleanup_staging_root(&paths);
        info!(files = staging.files, "core runtime installed");
        Ok(InstallOutcome {
            package: name.to_string(),
            version: None,
            placement: Placement::GameRoot(paths.game_root.clone()),
            files: staging.files,
        })
    }

    /// Flips a package between its plugin folder and its disabled archive.
    /// Returns the new state.
    pub fn toggle(&self, name: &str) -> Result<ModInstallationState, WorkflowError> {
        let operation = Operation::Toggle;
        let _lease = self.locks.try_acquire(name, operation)?;
        let paths = self.require_paths(name, operation)?;

        match disk_state(&paths, name) {
            ModInstallationState::Enabled => {
                self.disable(&paths, name)?;
                info!(package = name, "mod disabled");
                Ok(ModInstallationState::Disabled)
            }
            ModInstallationState::Disabled => {
                self.enable(&paths, name)?;
                info!(package = name, "mod enabled");
                Ok(ModInstallationState::Enabled)
            }
            ModInstallationState::NotInstalled => Err(WorkflowError::NotInstalled {
                package: name.to_string(),
                operation,
            }),
        }
    }

    /// Removes whatever is on disk for `name`, then its record. Succeeds when
    /// either side is already gone. Without a game path the record is kept,
    /// since its files could not be reached.
    pub fn uninstall(&self, name: &str) -> Result<(), WorkflowError> {
        let operation = Operation::Uninstall;
        let _lease = self.locks.try_acquire(name, operation)?;
        let paths = self.require_paths(name, operation)?;

        let dir = paths.mod_dir(name);
        if dir.is_dir() {
            remove_dir_if_present(&dir)
                .map_err(|err| WorkflowError::filesystem(name, operation, "remove directory", &dir, err))?;
        }
        let archive = paths.disabled_archive(name);
        remove_file_if_present(&archive)
            .map_err(|err| WorkflowError::filesystem(name, operation, "remove archive", &archive, err))?;

        let removed = self
            .store
            .remove_mod(name)
            .map_err(|source| state_error(name, operation, source))?;
        info!(package = name, recorded = removed.is_some(), "mod uninstalled");
        Ok(())
    }

    /// Installs each reference in order, skipping ones already recorded and
    /// recording each one as soon as it lands. A dependency another job is
    /// installing is waited for rather than failed. Stops at the first
    /// failure; earlier successes stay installed.
    pub fn install_dependencies(
        &self,
        references: &[String],
        progress: &mut dyn FnMut(&str, Progress),
        cancel: &CancelToken,
    ) -> Result<DependencyReport, WorkflowError> {
        let operation = Operation::InstallDependency;
        let mut report = DependencyReport::default();

        for reference in references {
            if self.store.is_dependency_installed(reference) {
                debug!(dependency = %reference, "dependency already installed");
                report.skipped.push(reference.clone());
                continue;
            }
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled {
                    package: reference.clone(),
                    operation,
                });
            }

            self.ensure_catalog(reference, operation)?;
            let snapshot = self.catalog.snapshot();
            let resolved = dependency::resolve_reference(reference, &snapshot.packages).map_err(
                |source| WorkflowError::Resolution {
                    package: reference.clone(),
                    operation,
                    source,
                },
            )?;

            let mut forward = |update: Progress| progress(reference.as_str(), update);
            let landed = loop {
                match self.install(&resolved.package, InstallKind::Dependency, &mut forward, cancel) {
                    // Another job is installing the same dependency; wait for it.
                    Err(WorkflowError::Busy { .. }) => {
                        debug!(dependency = %reference, "dependency busy, waiting");
                        self.locks.wait_until_free(&resolved.package.name);
                        if self.store.is_dependency_installed(reference) {
                            break false;
                        }
                    }
                    result => {
                        result?;
                        break true;
                    }
                }
            };
            if !landed {
                debug!(dependency = %reference, "dependency installed by another job");
                report.skipped.push(reference.clone());
                continue;
            }
            self.store
                .add_dependency(reference)
                .map_err(|source| state_error(reference, operation, source))?;
            info!(dependency = %reference, "dependency installed");
            report.installed.push(reference.clone());
        }

        Ok(report)
    }

    /// Dependency candidates for `package` that still need installing.
    pub fn pending_dependencies(&self, package: &PackageSummary) -> Vec<String> {
        let core_present = self
            .game_paths()
            .map(|paths| paths.core_runtime_present())
            .unwrap_or(false);
        dependency::filter_already_satisfied(
            &package.dependencies,
            &self.store.installed_dependencies(),
            core_present,
        )
    }

    /// Full install: bookkeeping for a present core runtime, the selected
    /// dependencies, then the package itself. A failed dependency aborts
    /// before the package is touched.
    pub fn install_with_dependencies(
        &self,
        package: &PackageSummary,
        selection: DependencySelection,
        progress: &mut dyn FnMut(&str, Progress),
        cancel: &CancelToken,
    ) -> Result<InstallReport, WorkflowError> {
        let paths = self.require_paths(&package.name, Operation::Install)?;
        self.record_present_core_runtime(&paths, package)?;

        let candidates = self.pending_dependencies(package);
        let chosen: Vec<String> = match selection {
            DependencySelection::All => candidates,
            DependencySelection::None => Vec::new(),
            DependencySelection::Only(wanted) => candidates
                .into_iter()
                .filter(|candidate| wanted.contains(candidate))
                .collect(),
        };
        let dependencies = self.install_dependencies(&chosen, progress, cancel)?;

        let mut forward = |update: Progress| progress(package.name.as_str(), update);
        let outcome = self.install(package, InstallKind::Mod, &mut forward, cancel)?;
        Ok(InstallReport {
            dependencies,
            outcome,
        })
    }

    fn record_present_core_runtime(
        &self,
        paths: &GamePaths,
        package: &PackageSummary,
    ) -> Result<(), WorkflowError> {
        if !paths.core_runtime_present() {
            return Ok(());
        }
        let already = self
            .store
            .installed_dependencies()
            .iter()
            .any(|reference| is_core_runtime(reference));
        if already {
            return Ok(());
        }
        if let Some(reference) = package
            .dependencies
            .iter()
            .find(|reference| is_core_runtime(reference))
        {
            self.store
                .add_dependency(reference)
                .map_err(|source| state_error(&package.name, Operation::Install, source))?;
            debug!(dependency = %reference, "recorded present core runtime");
        }
        Ok(())
    }

    fn require_paths(&self, name: &str, operation: Operation) -> Result<GamePaths, WorkflowError> {
        self.game_paths().ok_or_else(|| WorkflowError::GamePathUnset {
            package: name.to_string(),
            operation,
        })
    }

    fn ensure_catalog(&self, name: &str, operation: Operation) -> Result<(), WorkflowError> {
        if !self.catalog.is_empty() {
            return Ok(());
        }
        self.catalog
            .refresh()
            .map(|_| ())
            .map_err(|source| WorkflowError::Catalog {
                package: name.to_string(),
                operation,
                source,
            })
    }

    /// The summary to download and record. When `package` carries no URL the
    /// catalog's latest version replaces it wholesale, so the record matches
    /// what was actually fetched.
    fn resolve_download<'a>(
        &self,
        package: &'a PackageSummary,
        operation: Operation,
    ) -> Result<Cow<'a, PackageSummary>, WorkflowError> {
        if has_download_url(package) {
            return Ok(Cow::Borrowed(package));
        }
        debug!(package = %package.name, "summary has no download url, asking the catalog");
        let fetched = self
            .catalog
            .fetch_package(&package.name)
            .map_err(|source| WorkflowError::Catalog {
                package: package.name.clone(),
                operation,
                source,
            })?;
        fetched
            .as_ref()
            .and_then(|raw| raw.summary())
            .filter(has_download_url)
            .map(|latest| {
                debug!(package = %latest.name, version = %latest.version, "using catalog's latest version");
                Cow::Owned(latest)
            })
            .ok_or_else(|| WorkflowError::DownloadUrlUnavailable {
                package: package.name.clone(),
                operation,
            })
    }

    fn download(
        &self,
        name: &str,
        operation: Operation,
        url: &str,
        progress: &mut dyn FnMut(Progress),
        cancel: &CancelToken,
    ) -> Result<ScratchFile, WorkflowError> {
        download_to_scratch(self.source.as_ref(), url, &self.scratch_dir, progress, cancel).map_err(|err| {
            warn!(package = name, "download failed: {err}");
            WorkflowError::from_download(name, operation, err)
        })
    }

    fn stage(
        &self,
        paths: &GamePaths,
        name: &str,
        operation: Operation,
        scratch: &ScratchFile,
    ) -> Result<Staged, WorkflowError> {
        let dir = staging_dir(paths, "extract");
        let guard = CleanupGuard::new(&dir);
        let files = extract_zip(scratch.path(), &dir).map_err(|err| {
            warn!(package = name, "extraction failed: {err}");
            WorkflowError::from_archive(name, operation, err)
        })?;
        Ok(Staged { dir: guard, files })
    }

    /// Moves a fully extracted staging directory into place at `target`,
    /// replacing any previous install, and records `record` when given.
    fn commit_mod_dir(
        &self,
        paths: &GamePaths,
        name: &str,
        operation: Operation,
        mut staged: CleanupGuard,
        target: &Path,
        record: Option<InstalledMod>,
    ) -> Result<(), WorkflowError> {
        fs::create_dir_all(&paths.plugins_dir).map_err(|err| {
            WorkflowError::filesystem(name, operation, "create directory", &paths.plugins_dir, err)
        })?;

        let previous = if target.exists() {
            let trash = staging_dir(paths, "previous");
            fs::rename(target, &trash)
                .map_err(|err| WorkflowError::filesystem(name, operation, "move aside", target, err))?;
            Some(trash)
        } else {
            None
        };

        if let Err(err) = fs::rename(staged.path(), target) {
            if let Some(trash) = &previous {
                let _ = fs::rename(trash, target);
            }
            return Err(WorkflowError::filesystem(name, operation, "move into place", target, err));
        }
        staged.disarm();

        if let Some(record) = record {
            if let Err(source) = self.store.upsert_mod(name, record) {
                let _ = fs::remove_dir_all(target);
                if let Some(trash) = &previous {
                    let _ = fs::rename(trash, target);
                }
                return Err(state_error(name, operation, source));
            }
        }

        if let Some(trash) = previous {
            discard(&trash);
        }
        let stale_archive = paths.disabled_archive(name);
        if stale_archive.exists() {
            if let Err(err) = fs::remove_file(&stale_archive) {
                warn!(package = name, "failed to remove stale archive: {err}");
            }
        }
        Ok(())
    }

    fn disable(&self, paths: &GamePaths, name: &str) -> Result<(), WorkflowError> {
        let operation = Operation::Toggle;
        let dir = paths.mod_dir(name);
        let archive = paths.disabled_archive(name);

        zip_dir(&dir, &archive).map_err(|err| WorkflowError::from_archive(name, operation, err))?;

        // The folder only leaves the plugin root after the archive is final.
        let trash = staging_dir(paths, "disabled");
        if let Some(parent) = trash.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                let _ = fs::remove_file(&archive);
                return Err(WorkflowError::filesystem(name, operation, "create directory", parent, err));
            }
        }
        if let Err(err) = fs::rename(&dir, &trash) {
            let _ = fs::remove_file(&archive);
            return Err(WorkflowError::filesystem(name, operation, "remove directory", &dir, err));
        }
        discard(&trash);
        cleanup_staging_root(paths);
        Ok(())
    }

    fn enable(&self, paths: &GamePaths, name: &str) -> Result<(), WorkflowError> {
        let operation = Operation::Toggle;
        let dir = paths.mod_dir(name);
        let archive = paths.disabled_archive(name);

        let staging = staging_dir(paths, "enable");
        let mut guard = CleanupGuard::new(&staging);
        extract_zip(&archive, &staging).map_err(|err| WorkflowError::from_archive(name, operation, err))?;
        fs::rename(&staging, &dir)
            .map_err(|err| WorkflowError::filesystem(name, operation, "move into place", &dir, err))?;
        guard.disarm();

        if let Err(err) = fs::remove_file(&archive) {
            // Back to the disabled state so the toggle can be retried.
            let _ = fs::remove_dir_all(&dir);
            return Err(WorkflowError::filesystem(name, operation, "remove archive", &archive, err));
        }
        cleanup_staging_root(paths);
        Ok(())
    }
}

struct Staged {
    dir: CleanupGuard,
    files: usize,
}

fn has_download_url(package: &PackageSummary) -> bool {
    package
        .download_url
        .as_deref()
        .is_some_and(|url| !url.is_empty())
}

pub fn disk_state(paths: &GamePaths, name: &str) -> ModInstallationState {
    if paths.mod_dir(name).is_dir() {
        ModInstallationState::Enabled
    } else if paths.disabled_archive(name).is_file() {
        ModInstallationState::Disabled
    } else {
        ModInstallationState::NotInstalled
    }
}

fn state_error(name: &str, operation: Operation, source: crate::error::StateError) -> WorkflowError {
    WorkflowError::State {
        package: name.to_string(),
        operation,
        source,
    }
}

fn staging_dir(paths: &GamePaths, purpose: &str) -> PathBuf {
    let serial = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    paths
        .game_root
        .join(STAGING_DIR)
        .join(format!("{purpose}-{}-{serial}", std::process::id()))
}

fn cleanup_staging_root(paths: &GamePaths) {
    // Only succeeds once no other operation is using it.
    let _ = fs::remove_dir(paths.game_root.join(STAGING_DIR));
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path) {
        warn!("failed to remove {}: {err}", path.display());
    }
}

/// A merge that stopped partway. Entries already moved stay in the
/// destination; there is nothing to roll them back to.
#[derive(Debug)]
struct MergeFailure {
    path: PathBuf,
    source: io::Error,
    moved: Vec<PathBuf>,
}

/// Moves every entry of `src` into `dest` in name order, merging
/// directories and replacing files that already exist.
fn merge_dir(src: &Path, dest: &Path) -> Result<Vec<PathBuf>, MergeFailure> {
    let mut moved = Vec::new();
    match merge_entries(src, dest, &mut moved) {
        Ok(()) => Ok(moved),
        Err((path, source)) => Err(MergeFailure { path, source, moved }),
    }
}

fn merge_entries(src: &Path, dest: &Path, moved: &mut Vec<PathBuf>) -> Result<(), (PathBuf, io::Error)> {
    let mut entries = fs::read_dir(src)
        .and_then(|entries| entries.collect::<io::Result<Vec<_>>>())
        .map_err(|err| (src.to_path_buf(), err))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let from_is_dir = entry
            .file_type()
            .map_err(|err| (from.clone(), err))?
            .is_dir();

        if from_is_dir && to.is_dir() {
            merge_entries(&from, &to, moved)?;
            continue;
        }
        if to.is_dir() {
            fs::remove_dir_all(&to).map_err(|err| (to.clone(), err))?;
        } else if to.exists() {
            fs::remove_file(&to).map_err(|err| (to.clone(), err))?;
        }
        fs::rename(&from, &to).map_err(|err| (to.clone(), err))?;
        moved.push(to);
    }
    Ok(())
}

/// Merges a staged tree into `dest`, logging what already landed when the
/// merge fails partway.
fn merge_staged(name: &str, operation: Operation, src: &Path, dest: &Path) -> Result<(), WorkflowError> {
    match merge_dir(src, dest) {
        Ok(moved) => {
            debug!(package = name, entries = moved.len(), "merged into {}", dest.display());
            Ok(())
        }
        Err(failure) => {
            if !failure.moved.is_empty() {
                warn!(
                    package = name,
                    moved = ?failure.moved,
                    "merge into {} stopped partway; moved entries were left in place",
                    dest.display()
                );
            }
            Err(WorkflowError::filesystem(name, operation, "merge into", failure.path, failure.source))
        }
    }
}

fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_file_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lease_on_same_package_is_busy() {
        let locks = PackageLocks::default();
        let lease = locks.try_acquire("Lanterns", Operation::Install).unwrap();
        let busy = locks.try_acquire("Lanterns", Operation::Toggle);
        assert!(matches!(busy, Err(WorkflowError::Busy { .. })));
        assert!(locks.try_acquire("Other", Operation::Install).is_ok());

        drop(lease);
        assert!(!locks.is_locked("Lanterns"));
        assert!(locks.try_acquire("Lanterns", Operation::Install).is_ok());
    }

    #[test]
    fn merge_replaces_files_and_keeps_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::create_dir_all(src.join("core")).unwrap();
        fs::create_dir_all(dest.join("core")).unwrap();
        fs::write(src.join("core/loader.dll"), b"new").unwrap();
        fs::write(dest.join("core/loader.dll"), b"old").unwrap();
        fs::write(dest.join("core/keep.cfg"), b"keep").unwrap();
        fs::write(src.join("top.txt"), b"top").unwrap();

        merge_dir(&src, &dest).unwrap();
        assert_eq!(fs::read(dest.join("core/loader.dll")).unwrap(), b"new");
        assert_eq!(fs::read(dest.join("core/keep.cfg")).unwrap(), b"keep");
        assert_eq!(fs::read(dest.join("top.txt")).unwrap(), b"top");
    }

    #[test]
    fn failed_merge_reports_entries_already_moved() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), b"a").unwrap();

        // Moving `nested` into itself cannot succeed, and it sorts after `a.txt`.
        let dest = src.join("nested");
        let failure = merge_dir(&src, &dest).unwrap_err();
        assert_eq!(failure.moved, vec![dest.join("a.txt")]);
        assert_eq!(failure.path, dest.join("nested"));
        assert!(dest.join("a.txt").is_file());
    }

    #[test]
    fn disk_state_prefers_directory_over_archive() {
        let dir = tempfile::tempdir().unwrap();
        let paths = GamePaths::new(dir.path());
        assert_eq!(disk_state(&paths, "Lanterns"), ModInstallationState::NotInstalled);

        fs::create_dir_all(&paths.disabled_dir).unwrap();
        fs::write(paths.disabled_archive("Lanterns"), b"zip").unwrap();
        assert_eq!(disk_state(&paths, "Lanterns"), ModInstallationState::Disabled);

        fs::create_dir_all(paths.mod_dir("Lanterns")).unwrap();
        assert_eq!(disk_state(&paths, "Lanterns"), ModInstallationState::Enabled);
    }
}
