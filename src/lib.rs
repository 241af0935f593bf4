//! Catalog search, dependency resolution and install-state management for
//! R.E.P.O. mods distributed through Thunderstore.

pub mod archive;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod dependency;
pub mod download;
pub mod error;
pub mod fuzzy;
pub mod game;
pub mod logging;
pub mod search;
pub mod state;
pub mod worker;
pub mod workflow;

pub use catalog::{CatalogCache, CatalogSource, PackageSummary, ThunderstoreCatalog};
pub use dependency::{DependencyRef, ResolvedDependency};
pub use download::{ArchiveSource, CancelToken, HttpArchiveSource, Progress};
pub use error::{ErrorKind, Operation, WorkflowError};
pub use search::{search, SearchHit};
pub use state::{InstalledMod, StateStore};
pub use worker::{Job, WorkerMessage, WorkerPool};
pub use workflow::{DependencySelection, InstallKind, InstallWorkflow, ModInstallationState};
