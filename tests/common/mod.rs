#![allow(dead_code)]

use repohub::{
    catalog::{CatalogCache, CatalogSource, PackageSummary, RawPackage, RawVersion},
    download::{ArchiveSource, RemoteArchive},
    error::{CatalogFetchError, DownloadError},
    state::StateStore,
    workflow::InstallWorkflow,
};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, ZipWriter};

/// Builds an in-memory zip. Names ending in `/` become directory entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(name.to_string(), options).unwrap();
        } else {
            writer.start_file(name.to_string(), options).unwrap();
            writer.write_all(contents).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, zip_bytes(entries)).unwrap();
}

/// Every file under `dir`, keyed by its slash-separated relative path.
pub fn read_tree(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(dir)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(dir)
                .unwrap()
                .components()
                .map(|part| part.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (relative, fs::read(entry.path()).unwrap())
        })
        .collect()
}

#[derive(Default)]
pub struct MemoryArchives {
    files: Mutex<HashMap<String, Vec<u8>>>,
    opened: Mutex<Vec<String>>,
}

impl MemoryArchives {
    pub fn insert(&self, url: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl ArchiveSource for MemoryArchives {
    fn open(&self, url: &str) -> Result<RemoteArchive, DownloadError> {
        self.opened.lock().unwrap().push(url.to_string());
        let bytes = self
            .files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DownloadError::Status {
                url: url.to_string(),
                status: 404,
            })?;
        Ok(RemoteArchive {
            content_length: Some(bytes.len() as u64),
            reader: Box::new(Cursor::new(bytes)),
        })
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    packages: Mutex<Vec<RawPackage>>,
}

impl MemoryCatalog {
    pub fn push(&self, package: RawPackage) {
        self.packages.lock().unwrap().push(package);
    }
}

impl CatalogSource for MemoryCatalog {
    fn fetch_all(&self) -> Result<Vec<RawPackage>, CatalogFetchError> {
        Ok(self.packages.lock().unwrap().clone())
    }
}

pub fn url_for(name: &str, version: &str) -> String {
    format!("https://packages.invalid/{name}/{version}.zip")
}

pub fn raw_package(owner: &str, name: &str, version: &str, dependencies: &[&str]) -> RawPackage {
    RawPackage {
        name: name.to_string(),
        owner: owner.to_string(),
        date_created: None,
        versions: vec![RawVersion {
            version_number: version.to_string(),
            description: format!("{name} for testing"),
            downloads: 1,
            icon: String::new(),
            file_size: 0,
            dependencies: dependencies.iter().map(|dep| dep.to_string()).collect(),
            download_url: Some(url_for(name, version)),
        }],
    }
}

pub fn summary(name: &str, dependencies: &[&str]) -> PackageSummary {
    raw_package("acme", name, "1.0.0", dependencies)
        .summary()
        .unwrap()
}

/// A sandboxed game install wired to in-memory sources.
pub struct Harness {
    _tmp: TempDir,
    pub data_dir: PathBuf,
    pub game_root: PathBuf,
    pub store: Arc<StateStore>,
    pub archives: Arc<MemoryArchives>,
    pub catalog_source: Arc<MemoryCatalog>,
    pub catalog: Arc<CatalogCache>,
    pub workflow: InstallWorkflow,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_core_runtime(true)
    }

    pub fn with_core_runtime(core_runtime: bool) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().join("data");
        let game_root = tmp.path().join("REPO");
        fs::create_dir_all(&game_root).unwrap();
        fs::write(game_root.join("REPO.exe"), b"").unwrap();
        if core_runtime {
            fs::create_dir_all(game_root.join("BepInEx/plugins")).unwrap();
        }

        let store = Arc::new(StateStore::open(&data_dir.join("config.json")).unwrap());
        store.set_repo_path(Some(game_root.clone())).unwrap();

        let archives = Arc::new(MemoryArchives::default());
        let catalog_source = Arc::new(MemoryCatalog::default());
        let catalog = Arc::new(CatalogCache::new(catalog_source.clone()));
        let workflow = InstallWorkflow::new(
            store.clone(),
            catalog.clone(),
            archives.clone(),
            data_dir.join("tmp"),
            "https://core.invalid/bepinex.zip".to_string(),
        );

        Harness {
            _tmp: tmp,
            data_dir,
            game_root,
            store,
            archives,
            catalog_source,
            catalog,
            workflow,
        }
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.game_root.join("BepInEx/plugins")
    }

    pub fn mod_dir(&self, name: &str) -> PathBuf {
        self.plugins_dir().join(name)
    }

    pub fn disabled_archive(&self, name: &str) -> PathBuf {
        self.plugins_dir().join("disabled_mods").join(format!("{name}.zip"))
    }

    pub fn scratch_entries(&self) -> usize {
        fs::read_dir(self.data_dir.join("tmp"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Registers `package` with the catalog and serves `entries` at its URL.
    pub fn publish(&self, package: RawPackage, entries: &[(&str, &[u8])]) {
        let url = package.versions[0].download_url.clone().unwrap();
        self.archives.insert(&url, zip_bytes(entries));
        self.catalog_source.push(package);
    }
}
