use std::{fmt, io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogFetchError {
    #[error("catalog request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("catalog request to {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("catalog response from {url} could not be decoded: {message}")]
    Decode { url: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("malformed dependency reference: {reference}")]
    MalformedReference { reference: String },
    #[error("could not find mod {name} by author {author}")]
    DependencyNotFound { author: String, name: String },
    #[error("could not find version {version} for {name}")]
    VersionNotFound { name: String, version: String },
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("read state document {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse state document {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("write state document {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialize state document")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive {path:?} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("{action} {path:?}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot archive {path:?}: {message}")]
    Unsupported { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download from {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("download from {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("download from {url} interrupted: {source}")]
    Interrupted {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("write scratch file {path:?}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("download cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    InstallDependency,
    InstallCoreRuntime,
    Toggle,
    Uninstall,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::InstallDependency => "install-dependency",
            Operation::InstallCoreRuntime => "install-core-runtime",
            Operation::Toggle => "toggle",
            Operation::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Coarse classification of a [`WorkflowError`] for callers that only
/// branch on the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CatalogFetch,
    MalformedReference,
    DependencyNotFound,
    VersionNotFound,
    DownloadUrlUnavailable,
    Download,
    ArchiveCorrupt,
    Filesystem,
    State,
    Busy,
    Cancelled,
    NotInstalled,
    GamePathUnset,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{operation} {package}: game path is not set")]
    GamePathUnset { package: String, operation: Operation },
    #[error("{operation} {package}: another operation on this package is in progress")]
    Busy { package: String, operation: Operation },
    #[error("{operation} {package}: not installed")]
    NotInstalled { package: String, operation: Operation },
    #[error("{operation} {package}: could not find a download URL")]
    DownloadUrlUnavailable { package: String, operation: Operation },
    #[error("{operation} {package}: cancelled")]
    Cancelled { package: String, operation: Operation },
    #[error("{operation} {package}: {source}")]
    Catalog {
        package: String,
        operation: Operation,
        #[source]
        source: CatalogFetchError,
    },
    #[error("{operation} {package}: {source}")]
    Resolution {
        package: String,
        operation: Operation,
        #[source]
        source: ResolutionError,
    },
    #[error("{operation} {package}: {source}")]
    Download {
        package: String,
        operation: Operation,
        #[source]
        source: DownloadError,
    },
    #[error("{operation} {package}: {message}")]
    ArchiveCorrupt {
        package: String,
        operation: Operation,
        message: String,
    },
    #[error("{operation} {package}: {action} {path:?}: {source}")]
    Filesystem {
        package: String,
        operation: Operation,
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{operation} {package}: {source}")]
    State {
        package: String,
        operation: Operation,
        #[source]
        source: StateError,
    },
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::GamePathUnset { .. } => ErrorKind::GamePathUnset,
            WorkflowError::Busy { .. } => ErrorKind::Busy,
            WorkflowError::NotInstalled { .. } => ErrorKind::NotInstalled,
            WorkflowError::DownloadUrlUnavailable { .. } => ErrorKind::DownloadUrlUnavailable,
            WorkflowError::Cancelled { .. } => ErrorKind::Cancelled,
            WorkflowError::Catalog { .. } => ErrorKind::CatalogFetch,
            WorkflowError::Resolution { source, .. } => match source {
                ResolutionError::MalformedReference { .. } => ErrorKind::MalformedReference,
                ResolutionError::DependencyNotFound { .. } => ErrorKind::DependencyNotFound,
                ResolutionError::VersionNotFound { .. } => ErrorKind::VersionNotFound,
            },
            WorkflowError::Download { .. } => ErrorKind::Download,
            WorkflowError::ArchiveCorrupt { .. } => ErrorKind::ArchiveCorrupt,
            WorkflowError::Filesystem { .. } => ErrorKind::Filesystem,
            WorkflowError::State { .. } => ErrorKind::State,
        }
    }

    pub fn package(&self) -> &str {
        match self {
            WorkflowError::GamePathUnset { package, .. }
            | WorkflowError::Busy { package, .. }
            | WorkflowError::NotInstalled { package, .. }
            | WorkflowError::DownloadUrlUnavailable { package, .. }
            | WorkflowError::Cancelled { package, .. }
            | WorkflowError::Catalog { package, .. }
            | WorkflowError::Resolution { package, .. }
            | WorkflowError::Download { package, .. }
            | WorkflowError::ArchiveCorrupt { package, .. }
            | WorkflowError::Filesystem { package, .. }
            | WorkflowError::State { package, .. } => package,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            WorkflowError::GamePathUnset { operation, .. }
            | WorkflowError::Busy { operation, .. }
            | WorkflowError::NotInstalled { operation, .. }
            | WorkflowError::DownloadUrlUnavailable { operation, .. }
            | WorkflowError::Cancelled { operation, .. }
            | WorkflowError::Catalog { operation, .. }
            | WorkflowError::Resolution { operation, .. }
            | WorkflowError::Download { operation, .. }
            | WorkflowError::ArchiveCorrupt { operation, .. }
            | WorkflowError::Filesystem { operation, .. }
            | WorkflowError::State { operation, .. } => *operation,
        }
    }

    pub(crate) fn from_archive(package: &str, operation: Operation, err: ArchiveError) -> Self {
        match err {
            ArchiveError::Corrupt { path, message } => WorkflowError::ArchiveCorrupt {
                package: package.to_string(),
                operation,
                message: format!("archive {} is corrupt: {message}", path.display()),
            },
            ArchiveError::Io {
                action,
                path,
                source,
            } => WorkflowError::Filesystem {
                package: package.to_string(),
                operation,
                action,
                path,
                source,
            },
            ArchiveError::Unsupported { path, message } => WorkflowError::Filesystem {
                package: package.to_string(),
                operation,
                action: "archive",
                path,
                source: io::Error::new(io::ErrorKind::Unsupported, message),
            },
        }
    }

    pub(crate) fn from_download(package: &str, operation: Operation, err: DownloadError) -> Self {
        match err {
            DownloadError::Cancelled => WorkflowError::Cancelled {
                package: package.to_string(),
                operation,
            },
            DownloadError::Scratch { path, source } => WorkflowError::Filesystem {
                package: package.to_string(),
                operation,
                action: "write scratch file",
                path,
                source,
            },
            other => WorkflowError::Download {
                package: package.to_string(),
                operation,
                source: other,
            },
        }
    }

    pub(crate) fn filesystem(
        package: &str,
        operation: Operation,
        action: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        WorkflowError::Filesystem {
            package: package.to_string(),
            operation,
            action,
            path: path.into(),
            source,
        }
    }
}
