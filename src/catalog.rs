use crate::{
    download::{build_agent, USER_AGENT},
    error::CatalogFetchError,
};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    sync::{Arc, RwLock},
    time::Duration,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, info, warn};

const SECTION_SIZE: usize = 10;
const HIDDEN_NAME_MARKERS: [&str; 2] = ["modpack", "bepinex"];
const COSMETIC_MARKER: &str = "cosmetic";

/// A package exactly as the remote catalog publishes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPackage {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub versions: Vec<RawVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVersion {
    pub version_number: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

impl RawPackage {
    /// Version with the greatest `version_number`, compared as plain strings.
    pub fn latest_version(&self) -> Option<&RawVersion> {
        self.versions
            .iter()
            .max_by(|a, b| a.version_number.cmp(&b.version_number))
    }

    pub fn version(&self, version_number: &str) -> Option<&RawVersion> {
        self.versions
            .iter()
            .find(|version| version.version_number == version_number)
    }

    pub fn summary(&self) -> Option<PackageSummary> {
        self.latest_version()
            .map(|version| PackageSummary::from_version(self, version))
    }
}

/// One catalog entry, summarised from a package's newest version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub name: String,
    pub creator: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default, rename = "icon")]
    pub icon_url: String,
    #[serde(default, rename = "file_size")]
    pub file_size_bytes: u64,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

impl PackageSummary {
    pub fn from_version(package: &RawPackage, version: &RawVersion) -> Self {
        PackageSummary {
            name: package.name.clone(),
            creator: package.owner.clone(),
            description: version.description.clone(),
            version: version.version_number.clone(),
            downloads: version.downloads,
            icon_url: version.icon.clone(),
            file_size_bytes: version.file_size,
            dependencies: version.dependencies.clone(),
            download_url: version.download_url.clone(),
        }
    }
}

/// Remote side of the catalog. The HTTP implementation is
/// [`ThunderstoreCatalog`]; tests substitute in-memory sources.
pub trait CatalogSource: Send + Sync {
    fn fetch_all(&self) -> Result<Vec<RawPackage>, CatalogFetchError>;

    fn fetch_package(&self, name: &str) -> Result<Option<RawPackage>, CatalogFetchError> {
        Ok(self
            .fetch_all()?
            .into_iter()
            .find(|package| package.name == name))
    }
}

pub struct ThunderstoreCatalog {
    url: String,
    agent: ureq::Agent,
}

impl ThunderstoreCatalog {
    pub fn new(url: &str, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            agent: build_agent(connect_timeout, read_timeout),
        }
    }

    fn get(&self, url: &str) -> Result<Option<ureq::Response>, CatalogFetchError> {
        match self.agent.get(url).set("User-Agent", USER_AGENT).call() {
            Ok(response) => Ok(Some(response)),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(ureq::Error::Status(status, _)) => Err(CatalogFetchError::Status {
                url: url.to_string(),
                status,
            }),
            Err(err) => Err(CatalogFetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }),
        }
    }
}

impl CatalogSource for ThunderstoreCatalog {
    fn fetch_all(&self) -> Result<Vec<RawPackage>, CatalogFetchError> {
        let response = self.get(&self.url)?.ok_or_else(|| CatalogFetchError::Status {
            url: self.url.clone(),
            status: 404,
        })?;
        response
            .into_json::<Vec<RawPackage>>()
            .map_err(|err| CatalogFetchError::Decode {
                url: self.url.clone(),
                message: err.to_string(),
            })
    }

    fn fetch_package(&self, name: &str) -> Result<Option<RawPackage>, CatalogFetchError> {
        let base = self.url.trim_end_matches('/');
        let url = format!("{base}/{name}/");
        let Some(response) = self.get(&url)? else {
            return Ok(None);
        };
        response
            .into_json::<RawPackage>()
            .map(Some)
            .map_err(|err| CatalogFetchError::Decode {
                url,
                message: err.to_string(),
            })
    }
}

/// An immutable view of one catalog fetch.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    /// Every package the remote returned, including hidden ones.
    pub packages: Vec<RawPackage>,
    /// User-facing summaries, in fetch order.
    pub summaries: Vec<PackageSummary>,
}

impl CatalogSnapshot {
    pub fn build(packages: Vec<RawPackage>) -> Self {
        let summaries = packages
            .iter()
            .filter(|package| is_listed(&package.name))
            .filter_map(RawPackage::summary)
            .collect();
        CatalogSnapshot {
            packages,
            summaries,
        }
    }

    pub fn summary(&self, name: &str) -> Option<&PackageSummary> {
        self.summaries.iter().find(|summary| summary.name == name)
    }

    pub fn package(&self, name: &str) -> Option<&RawPackage> {
        self.packages.iter().find(|package| package.name == name)
    }
}

/// In-memory catalog. Refreshes swap in a new snapshot; readers keep
/// whichever snapshot they already hold.
pub struct CatalogCache {
    source: Arc<dyn CatalogSource>,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
}

impl CatalogCache {
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
        }
    }

    /// Fetches the remote catalog and replaces the cached snapshot. On
    /// failure the previous snapshot stays in place.
    pub fn refresh(&self) -> Result<usize, CatalogFetchError> {
        let packages = match self.source.fetch_all() {
            Ok(packages) => packages,
            Err(err) => {
                warn!("catalog refresh failed: {err}");
                return Err(err);
            }
        };
        let snapshot = Arc::new(CatalogSnapshot::build(packages));
        let listed = snapshot.summaries.len();
        info!(
            packages = snapshot.packages.len(),
            listed, "catalog refreshed"
        );
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = snapshot;
        Ok(listed)
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn all(&self) -> Vec<PackageSummary> {
        self.snapshot().summaries.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().packages.is_empty()
    }

    /// Asks the remote for a single package, bypassing the cache.
    pub fn fetch_package(&self, name: &str) -> Result<Option<RawPackage>, CatalogFetchError> {
        debug!(package = name, "fetching package details");
        self.source.fetch_package(name)
    }
}

pub fn is_listed(name: &str) -> bool {
    let lower = name.to_lowercase();
    !HIDDEN_NAME_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Popular,
    Featured,
    Cosmetic,
    Newest,
}

impl Section {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "popular" => Some(Section::Popular),
            "featured" => Some(Section::Featured),
            "cosmetic" => Some(Section::Cosmetic),
            "newest" | "new" => Some(Section::Newest),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Section::Popular => "Popular",
            Section::Featured => "Game Changers",
            Section::Cosmetic => "Cosmetics",
            Section::Newest => "New",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BrowseSections {
    pub popular: Vec<PackageSummary>,
    pub featured: Vec<PackageSummary>,
    pub cosmetic: Vec<PackageSummary>,
    pub newest: Vec<PackageSummary>,
}

impl BrowseSections {
    pub fn get(&self, section: Section) -> &[PackageSummary] {
        match section {
            Section::Popular => &self.popular,
            Section::Featured => &self.featured,
            Section::Cosmetic => &self.cosmetic,
            Section::Newest => &self.newest,
        }
    }
}

pub fn sections(snapshot: &CatalogSnapshot) -> BrowseSections {
    let mut by_downloads: Vec<&PackageSummary> = snapshot.summaries.iter().collect();
    by_downloads.sort_by(|a, b| b.downloads.cmp(&a.downloads));

    let popular = by_downloads
        .iter()
        .take(SECTION_SIZE)
        .map(|summary| (*summary).clone())
        .collect();
    let featured = by_downloads
        .iter()
        .skip(SECTION_SIZE)
        .take(SECTION_SIZE)
        .map(|summary| (*summary).clone())
        .collect();
    let cosmetic = snapshot
        .summaries
        .iter()
        .filter(|summary| summary.name.to_lowercase().contains(COSMETIC_MARKER))
        .take(SECTION_SIZE)
        .cloned()
        .collect();

    let mut by_created: Vec<(Option<OffsetDateTime>, &RawPackage)> = snapshot
        .packages
        .iter()
        .map(|package| (parse_created(package.date_created.as_deref()), package))
        .collect();
    by_created.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    let newest = by_created
        .into_iter()
        .filter_map(|(_, package)| package.summary())
        .take(SECTION_SIZE)
        .collect();

    BrowseSections {
        popular,
        featured,
        cosmetic,
        newest,
    }
}

fn parse_created(raw: Option<&str>) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw?, &Rfc3339).ok()
}

pub fn format_file_size(size_bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if size_bytes < KB {
        format!("{size_bytes} B")
    } else if size_bytes < MB {
        format!("{:.1} KB", size_bytes as f64 / KB as f64)
    } else if size_bytes < GB {
        format!("{:.1} MB", size_bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", size_bytes as f64 / GB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn version(number: &str, downloads: u64) -> RawVersion {
        RawVersion {
            version_number: number.to_string(),
            description: format!("release {number}"),
            downloads,
            icon: String::new(),
            file_size: 2048,
            dependencies: Vec::new(),
            download_url: Some(format!("https://example.invalid/{number}.zip")),
        }
    }

    fn package(owner: &str, name: &str, versions: Vec<RawVersion>) -> RawPackage {
        RawPackage {
            name: name.to_string(),
            owner: owner.to_string(),
            date_created: None,
            versions,
        }
    }

    struct ScriptedSource {
        responses: Mutex<Vec<Result<Vec<RawPackage>, CatalogFetchError>>>,
    }

    impl CatalogSource for ScriptedSource {
        fn fetch_all(&self) -> Result<Vec<RawPackage>, CatalogFetchError> {
            self.responses.lock().unwrap().remove(0)
        }
    }

    #[test]
    fn summary_uses_lexicographically_greatest_version() {
        let pkg = package(
            "acme",
            "Lanterns",
            vec![version("1.10.0", 5), version("1.9.0", 7), version("1.2.0", 1)],
        );
        let summary = pkg.summary().unwrap();
        assert_eq!(summary.version, "1.9.0");
        assert_eq!(summary.downloads, 7);
        assert_eq!(summary.creator, "acme");
    }

    #[test]
    fn snapshot_hides_modpacks_and_loader_packages() {
        let snapshot = CatalogSnapshot::build(vec![
            package("acme", "Lanterns", vec![version("1.0.0", 1)]),
            package("acme", "Ultimate_ModPack", vec![version("1.0.0", 1)]),
            package("BepInEx", "BepInExPack", vec![version("5.4.21", 1)]),
            package("acme", "Empty", Vec::new()),
        ]);
        let names: Vec<&str> = snapshot.summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Lanterns"]);
        assert_eq!(snapshot.packages.len(), 4);
        assert!(snapshot.package("BepInExPack").is_some());
    }

    #[test]
    fn failed_refresh_keeps_previous_snapshot() {
        let source = ScriptedSource {
            responses: Mutex::new(vec![
                Ok(vec![package("acme", "Lanterns", vec![version("1.0.0", 1)])]),
                Err(CatalogFetchError::Status {
                    url: "https://example.invalid".to_string(),
                    status: 503,
                }),
            ]),
        };
        let cache = CatalogCache::new(Arc::new(source));
        assert_eq!(cache.refresh().unwrap(), 1);
        let held = cache.snapshot();

        assert!(cache.refresh().is_err());
        assert_eq!(cache.all().len(), 1);
        assert!(Arc::ptr_eq(&held, &cache.snapshot()));
    }

    #[test]
    fn sections_split_by_downloads_and_names() {
        let mut packages = Vec::new();
        for index in 0..25u64 {
            packages.push(package(
                "acme",
                &format!("Mod{index:02}"),
                vec![version("1.0.0", index)],
            ));
        }
        packages.push(package("acme", "HatCosmetics", vec![version("1.0.0", 0)]));
        let mut dated = package("acme", "Fresh", vec![version("1.0.0", 0)]);
        dated.date_created = Some("2025-03-01T12:00:00Z".to_string());
        packages.push(dated);
        let mut older = package("acme", "Stale", vec![version("1.0.0", 0)]);
        older.date_created = Some("2024-01-01T00:00:00.000000Z".to_string());
        packages.push(older);

        let sections = sections(&CatalogSnapshot::build(packages));
        assert_eq!(sections.popular.len(), 10);
        assert_eq!(sections.popular[0].name, "Mod24");
        assert_eq!(sections.featured[0].name, "Mod14");
        assert_eq!(sections.cosmetic.len(), 1);
        assert_eq!(sections.newest[0].name, "Fresh");
        assert_eq!(sections.newest[1].name, "Stale");
        assert_eq!(sections.newest.len(), 10);
    }

    #[test]
    fn file_sizes_are_human_readable() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
