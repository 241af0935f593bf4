use crate::{
    catalog::{PackageSummary, RawPackage},
    error::ResolutionError,
};
use serde::Serialize;
use std::{fmt, str::FromStr};

/// Marks references to the plugin loader itself.
pub const CORE_RUNTIME_MARKER: &str = "bepinex";

/// Packages whose archives are laid out relative to the plugin root rather
/// than inside their own folder.
const ROOT_LAYOUT_MARKERS: [&str; 2] = ["bepinex", "repolib"];

/// A parsed `author-name[-version]` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyRef {
    pub author: String,
    pub name: String,
    pub version: Option<String>,
}

impl DependencyRef {
    pub fn parse(reference: &str) -> Result<Self, ResolutionError> {
        let parts: Vec<&str> = reference.split('-').collect();
        match parts.as_slice() {
            [author, name] => Ok(DependencyRef {
                author: author.to_string(),
                name: name.to_string(),
                version: None,
            }),
            [author, middle @ .., version] if !middle.is_empty() => Ok(DependencyRef {
                author: author.to_string(),
                name: middle.join("-"),
                version: Some(version.to_string()),
            }),
            _ => Err(ResolutionError::MalformedReference {
                reference: reference.to_string(),
            }),
        }
    }
}

impl FromStr for DependencyRef {
    type Err = ResolutionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        DependencyRef::parse(value)
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}-{}-{}", self.author, self.name, version),
            None => write!(f, "{}-{}", self.author, self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedDependency {
    /// The reference string exactly as the dependent package declared it.
    pub reference: String,
    pub package: PackageSummary,
}

pub fn is_core_runtime(reference: &str) -> bool {
    reference.to_lowercase().contains(CORE_RUNTIME_MARKER)
}

pub fn uses_root_layout(package_name: &str) -> bool {
    let lower = package_name.to_lowercase();
    ROOT_LAYOUT_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Candidate dependencies still worth offering for installation.
///
/// Drops references already recorded as installed and, when the core runtime
/// is on disk, every reference to it. Order is preserved; nothing is mutated.
pub fn filter_already_satisfied(
    dependencies: &[String],
    installed: &[String],
    core_runtime_present: bool,
) -> Vec<String> {
    dependencies
        .iter()
        .filter(|dependency| !(core_runtime_present && is_core_runtime(dependency)))
        .filter(|dependency| !installed.contains(dependency))
        .cloned()
        .collect()
}

pub fn resolve_reference(
    reference: &str,
    catalog: &[RawPackage],
) -> Result<ResolvedDependency, ResolutionError> {
    let parsed = DependencyRef::parse(reference)?;
    let package = catalog
        .iter()
        .find(|package| package.owner == parsed.author && package.name == parsed.name)
        .ok_or_else(|| ResolutionError::DependencyNotFound {
            author: parsed.author.clone(),
            name: parsed.name.clone(),
        })?;

    let version = match &parsed.version {
        Some(wanted) => package.version(wanted),
        None => package.latest_version(),
    }
    .ok_or_else(|| ResolutionError::VersionNotFound {
        name: parsed.name.clone(),
        version: parsed
            .version
            .clone()
            .unwrap_or_else(|| "latest".to_string()),
    })?;

    Ok(ResolvedDependency {
        reference: reference.to_string(),
        package: PackageSummary::from_version(package, version),
    })
}

/// Resolves every reference, stopping at the first failure.
pub fn resolve(
    references: &[String],
    catalog: &[RawPackage],
) -> Result<Vec<ResolvedDependency>, ResolutionError> {
    references
        .iter()
        .map(|reference| resolve_reference(reference, catalog))
        .collect()
}
