use crate::{
    catalog::{self, CatalogCache, PackageSummary, Section, ThunderstoreCatalog},
    config::{self, AppConfig},
    dependency,
    download::{CancelToken, HttpArchiveSource, Progress},
    game,
    search::{self, SearchHit},
    state::StateStore,
    worker::{Job, JobOutput, WorkerMessage, WorkerPool},
    workflow::{DependencySelection, InstallReport, InstallWorkflow, ModInstallationState},
};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathCommand {
    Show,
    Set(PathBuf),
    Detect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search(String),
    Browse(Option<Section>),
    Mods,
    Deps(String),
    Install { name: String, with_dependencies: bool },
    Toggle(String),
    Uninstall(String),
    Path(PathCommand),
    CoreRuntime,
    Launch,
    Status,
    Help,
    Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Command,
    pub format: OutputFormat,
    pub verbose: bool,
}

pub fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut format = OutputFormat::Text;
    let mut verbose = false;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            format = OutputFormat::parse(value).ok_or_else(|| anyhow!("unknown format: {value}"))?;
            continue;
        }
        match arg.as_str() {
            "--format" => {
                let value = iter.next().ok_or_else(|| anyhow!("--format requires a value"))?;
                format =
                    OutputFormat::parse(value).ok_or_else(|| anyhow!("unknown format: {value}"))?;
            }
            "--verbose" | "-v" => verbose = true,
            _ => tokens.push(arg.clone()),
        }
    }

    let command = parse_command(&tokens)?;
    Ok(Invocation {
        command,
        format,
        verbose,
    })
}

fn parse_command(tokens: &[String]) -> Result<Command> {
    let Some(head) = tokens.first() else {
        return Ok(Command::Help);
    };
    let rest = &tokens[1..];
    let command = match head.as_str() {
        "search" => {
            if rest.is_empty() {
                bail!("search requires a query");
            }
            Command::Search(rest.join(" "))
        }
        "browse" => match rest.first() {
            None => Command::Browse(None),
            Some(value) => Command::Browse(Some(
                Section::parse(value).ok_or_else(|| {
                    anyhow!("unknown section: {value} (use popular, featured, cosmetic or newest)")
                })?,
            )),
        },
        "mods" | "list" => Command::Mods,
        "deps" => Command::Deps(required_name(rest, "deps")?),
        "install" => {
            let with_dependencies = !rest.iter().any(|arg| arg == "--no-deps");
            let names: Vec<&String> = rest.iter().filter(|arg| *arg != "--no-deps").collect();
            let name = names
                .first()
                .ok_or_else(|| anyhow!("install requires a package name"))?;
            Command::Install {
                name: name.to_string(),
                with_dependencies,
            }
        }
        "toggle" => Command::Toggle(required_name(rest, "toggle")?),
        "uninstall" | "remove" => Command::Uninstall(required_name(rest, "uninstall")?),
        "path" => match rest.first().map(String::as_str) {
            None => Command::Path(PathCommand::Show),
            Some("--detect") => Command::Path(PathCommand::Detect),
            Some(dir) => Command::Path(PathCommand::Set(PathBuf::from(dir))),
        },
        "bepinex" => Command::CoreRuntime,
        "launch" => Command::Launch,
        "status" => Command::Status,
        "help" | "--help" | "-h" => Command::Help,
        "version" | "--version" | "-V" => Command::Version,
        other => bail!("unknown command: {other} (see 'repohub help')"),
    };
    Ok(command)
}

fn required_name(rest: &[String], command: &str) -> Result<String> {
    rest.first()
        .cloned()
        .ok_or_else(|| anyhow!("{command} requires a package name"))
}

struct Session {
    config: AppConfig,
    store: Arc<StateStore>,
    catalog: Arc<CatalogCache>,
    workflow: Arc<InstallWorkflow>,
}

impl Session {
    fn open(data_dir: &Path) -> Result<Self> {
        let store = Arc::new(
            StateStore::open(&config::config_path(data_dir)).context("load config")?,
        );
        let config = store.config();
        let connect = Duration::from_secs(config.connect_timeout_secs);
        let read = Duration::from_secs(config.read_timeout_secs);

        let catalog = Arc::new(CatalogCache::new(Arc::new(ThunderstoreCatalog::new(
            &config.catalog_url,
            connect,
            read,
        ))));
        let workflow = Arc::new(InstallWorkflow::new(
            store.clone(),
            catalog.clone(),
            Arc::new(HttpArchiveSource::new(connect, read)),
            config::scratch_dir(data_dir),
            config.core_runtime_url.clone(),
        ));
        Ok(Session {
            config,
            store,
            catalog,
            workflow,
        })
    }

    fn refresh_catalog(&self) -> Result<()> {
        self.catalog.refresh().context("refresh catalog")?;
        Ok(())
    }

    fn find_package(&self, name: &str) -> Result<PackageSummary> {
        let snapshot = self.catalog.snapshot();
        snapshot
            .summary(name)
            .cloned()
            .or_else(|| snapshot.package(name).and_then(|package| package.summary()))
            .or_else(|| {
                snapshot
                    .summaries
                    .iter()
                    .find(|summary| summary.name.eq_ignore_ascii_case(name))
                    .cloned()
            })
            .ok_or_else(|| anyhow!("no package named {name} in the catalog"))
    }
}

pub fn run(invocation: Invocation, data_dir: &Path) -> Result<()> {
    let format = invocation.format;
    match invocation.command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            println!("repohub v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let session = Session::open(data_dir)?;
            run_command(&session, command, format, data_dir)
        }
    }
}

fn run_command(session: &Session, command: Command, format: OutputFormat, data_dir: &Path) -> Result<()> {
    match command {
        Command::Search(query) => search_catalog(session, &query, format),
        Command::Browse(section) => browse(session, section, format),
        Command::Mods => list_mods(session, format),
        Command::Deps(name) => list_dependencies(session, &name, format),
        Command::Install {
            name,
            with_dependencies,
        } => install(session, &name, with_dependencies, format),
        Command::Toggle(name) => {
            let state = session.workflow.toggle(&name)?;
            print_state_change(&name, state, format)
        }
        Command::Uninstall(name) => {
            session.workflow.uninstall(&name)?;
            print_state_change(&name, ModInstallationState::NotInstalled, format)
        }
        Command::Path(path) => game_path(session, path, format),
        Command::CoreRuntime => install_core_runtime(session, format),
        Command::Launch => launch(format),
        Command::Status => status(session, data_dir, format),
        Command::Help | Command::Version => Ok(()),
    }
}

fn search_catalog(session: &Session, query: &str, format: OutputFormat) -> Result<()> {
    if query.chars().count() < search::MIN_QUERY_CHARS {
        warn!(
            "queries shorter than {} characters match nothing",
            search::MIN_QUERY_CHARS
        );
    }
    session.refresh_catalog()?;
    let hits = search::search(query, &session.catalog.all());
    match format {
        OutputFormat::Json => print_json(&hits),
        OutputFormat::Text => {
            if hits.is_empty() {
                println!("No mods match '{query}'");
            }
            for SearchHit { package, score } in &hits {
                println!("{score:>6.1}  {}", package_line(package));
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct SectionItem<'a> {
    section: &'static str,
    packages: &'a [PackageSummary],
}

fn browse(session: &Session, section: Option<Section>, format: OutputFormat) -> Result<()> {
    session.refresh_catalog()?;
    let sections = catalog::sections(&session.catalog.snapshot());
    let wanted = match section {
        Some(section) => vec![section],
        None => vec![
            Section::Popular,
            Section::Featured,
            Section::Cosmetic,
            Section::Newest,
        ],
    };
    let items: Vec<SectionItem<'_>> = wanted
        .into_iter()
        .map(|section| SectionItem {
            section: section.label(),
            packages: sections.get(section),
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&items),
        OutputFormat::Text => {
            for item in items {
                println!("{}", item.section);
                for package in item.packages {
                    println!("  {}", package_line(package));
                }
                println!();
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct ModListItem {
    name: String,
    version: String,
    creator: String,
    state: ModInstallationState,
    installed_at: i64,
}

fn list_mods(session: &Session, format: OutputFormat) -> Result<()> {
    let items: Vec<ModListItem> = session
        .store
        .list_mods()
        .into_iter()
        .map(|(name, record)| ModListItem {
            state: session.workflow.mod_state(&name),
            version: record.package.version,
            creator: record.package.creator,
            installed_at: record.installed_at,
            name,
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&items),
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No mods installed");
            }
            for item in items {
                let marker = match item.state {
                    ModInstallationState::Enabled => "x",
                    ModInstallationState::Disabled => " ",
                    ModInstallationState::NotInstalled => "?",
                };
                println!(
                    "[{marker}] {name:<32} {version:<10} by {creator}",
                    name = item.name,
                    version = item.version,
                    creator = item.creator
                );
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct DependencyItem {
    reference: String,
    pending: bool,
    resolves_to: Option<String>,
    error: Option<String>,
}

fn list_dependencies(session: &Session, name: &str, format: OutputFormat) -> Result<()> {
    session.refresh_catalog()?;
    let package = session.find_package(name)?;
    let pending = session.workflow.pending_dependencies(&package);
    let snapshot = session.catalog.snapshot();

    let items: Vec<DependencyItem> = package
        .dependencies
        .iter()
        .map(|reference| {
            let resolved = dependency::resolve_reference(reference, &snapshot.packages);
            DependencyItem {
                reference: reference.clone(),
                pending: pending.contains(reference),
                resolves_to: resolved
                    .as_ref()
                    .ok()
                    .map(|dep| format!("{} {}", dep.package.name, dep.package.version)),
                error: resolved.err().map(|err| err.to_string()),
            }
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&items),
        OutputFormat::Text => {
            if items.is_empty() {
                println!("{} has no dependencies", package.name);
            }
            for item in items {
                let status = if item.pending { "pending" } else { "satisfied" };
                let detail = item
                    .resolves_to
                    .or(item.error)
                    .unwrap_or_default();
                println!("{status:<10} {:<48} {detail}", item.reference);
            }
            Ok(())
        }
    }
}

fn install(session: &Session, name: &str, with_dependencies: bool, format: OutputFormat) -> Result<()> {
    session.refresh_catalog()?;
    let package = session.find_package(name)?;
    let selection = if with_dependencies {
        DependencySelection::All
    } else {
        DependencySelection::None
    };

    let (mut pool, messages) =
        WorkerPool::new(session.workflow.clone(), session.config.parallel_downloads());
    let handle = pool.submit(Job::InstallWithDependencies { package, selection });

    let mut report: Option<InstallReport> = None;
    for message in messages.iter() {
        match message {
            WorkerMessage::Started { package, .. } => info!(package = %package, "job started"),
            WorkerMessage::Progress {
                package, progress, ..
            } => {
                if format == OutputFormat::Text {
                    print_progress(&package, progress);
                }
            }
            WorkerMessage::Completed { id, output, .. } if id == handle.id => {
                if let JobOutput::InstalledWithDependencies(done) = output {
                    report = Some(done);
                }
                break;
            }
            WorkerMessage::Failed { id, error, .. } if id == handle.id => {
                finish_progress(format);
                return Err(error.into());
            }
            WorkerMessage::Completed { .. } | WorkerMessage::Failed { .. } => {}
        }
    }
    pool.shutdown();
    finish_progress(format);

    let report = report.ok_or_else(|| anyhow!("install of {name} ended without a result"))?;
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            for reference in &report.dependencies.installed {
                println!("Installed dependency {reference}");
            }
            println!(
                "Installed {} ({} files)",
                report.outcome.package, report.outcome.files
            );
            Ok(())
        }
    }
}

fn install_core_runtime(session: &Session, format: OutputFormat) -> Result<()> {
    let mut progress = |update: Progress| {
        if format == OutputFormat::Text {
            print_progress("BepInEx", update);
        }
    };
    let outcome = session
        .workflow
        .install_core_runtime(&mut progress, &CancelToken::new());
    finish_progress(format);
    let outcome = outcome?;
    match format {
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Text => {
            println!("Installed BepInEx ({} files)", outcome.files);
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct PathReport {
    repo_path: Option<PathBuf>,
    plugins_dir: Option<PathBuf>,
    core_runtime_present: bool,
    warnings: Vec<String>,
}

fn game_path(session: &Session, command: PathCommand, format: OutputFormat) -> Result<()> {
    let mut warnings = Vec::new();
    match command {
        PathCommand::Show => {}
        PathCommand::Set(dir) => warnings = set_game_path(session, &dir)?,
        PathCommand::Detect => {
            let dir = game::detect_game_root()
                .ok_or_else(|| anyhow!("could not find {} in any Steam library", game::GAME_NAME))?;
            warnings = set_game_path(session, &dir)?;
        }
    }

    let paths = session.workflow.game_paths();
    let report = PathReport {
        repo_path: session.store.repo_path(),
        plugins_dir: paths.as_ref().map(|paths| paths.plugins_dir.clone()),
        core_runtime_present: paths
            .as_ref()
            .map(|paths| paths.core_runtime_present())
            .unwrap_or(false),
        warnings,
    };
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            match &report.repo_path {
                Some(path) => println!("Game path: {}", path.display()),
                None => println!("Game path: not set"),
            }
            if let Some(plugins) = &report.plugins_dir {
                println!("Plugins:   {}", plugins.display());
            }
            for warning in &report.warnings {
                println!("Warning: {warning}");
            }
            Ok(())
        }
    }
}

fn set_game_path(session: &Session, dir: &Path) -> Result<Vec<String>> {
    match game::validate_game_root(dir) {
        Ok(validated) => {
            session
                .store
                .set_repo_path(Some(validated.paths.game_root.clone()))
                .context("save game path")?;
            for warning in &validated.warnings {
                warn!("{warning}");
            }
            info!(path = %dir.display(), "game path set");
            Ok(validated.warnings)
        }
        Err(err) => {
            session
                .store
                .set_repo_path(None)
                .context("clear game path")?;
            Err(err)
        }
    }
}

fn launch(format: OutputFormat) -> Result<()> {
    let already_running = game::is_game_running();
    if !already_running {
        game::launch_game()?;
    }
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "already_running": already_running })),
        OutputFormat::Text => {
            if already_running {
                println!("{} is already running", game::GAME_NAME);
            } else {
                println!("Launching {}", game::GAME_NAME);
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct StatusReport {
    data_dir: PathBuf,
    repo_path: Option<PathBuf>,
    core_runtime_present: bool,
    game_running: bool,
    installed_mods: usize,
    installed_dependencies: usize,
    catalog_url: String,
}

fn status(session: &Session, data_dir: &Path, format: OutputFormat) -> Result<()> {
    let report = StatusReport {
        data_dir: data_dir.to_path_buf(),
        repo_path: session.store.repo_path(),
        core_runtime_present: session
            .workflow
            .game_paths()
            .map(|paths| paths.core_runtime_present())
            .unwrap_or(false),
        game_running: game::is_game_running(),
        installed_mods: session.store.list_mods().len(),
        installed_dependencies: session.store.installed_dependencies().len(),
        catalog_url: session.config.catalog_url.clone(),
    };
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!("Data dir:      {}", report.data_dir.display());
            match &report.repo_path {
                Some(path) => println!("Game path:     {}", path.display()),
                None => println!("Game path:     not set"),
            }
            println!("BepInEx:       {}", yes_no(report.core_runtime_present));
            println!("Game running:  {}", yes_no(report.game_running));
            println!("Mods:          {}", report.installed_mods);
            println!("Dependencies:  {}", report.installed_dependencies);
            Ok(())
        }
    }
}

fn print_state_change(name: &str, state: ModInstallationState, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "package": name, "state": state })),
        OutputFormat::Text => {
            println!("{name}: {}", state.label());
            Ok(())
        }
    }
}

fn package_line(package: &PackageSummary) -> String {
    format!(
        "{name:<32} {version:<10} {downloads:>9} dl {size:>9}  by {creator}",
        name = package.name,
        version = package.version,
        downloads = package.downloads,
        size = catalog::format_file_size(package.file_size_bytes),
        creator = package.creator
    )
}

fn print_progress(package: &str, progress: Progress) {
    let mut stderr = std::io::stderr();
    let _ = match progress.fraction() {
        Some(fraction) => write!(stderr, "\r{package}: {:>3.0}%   ", fraction * 100.0),
        None => write!(
            stderr,
            "\r{package}: {}   ",
            catalog::format_file_size(progress.received)
        ),
    };
    let _ = stderr.flush();
}

fn finish_progress(format: OutputFormat) {
    if format == OutputFormat::Text {
        eprintln!();
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn print_help() {
    println!("repohub v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  repohub search <query...>        Search the mod catalog");
    println!("  repohub browse [section]         popular | featured | cosmetic | newest");
    println!("  repohub mods                     List installed mods");
    println!("  repohub deps <name>              Show a package's dependencies");
    println!("  repohub install <name>           Install a mod and its dependencies");
    println!("      --no-deps                    Skip dependency installation");
    println!("  repohub toggle <name>            Enable or disable an installed mod");
    println!("  repohub uninstall <name>         Remove an installed mod");
    println!("  repohub path [<dir>|--detect]    Show or set the game directory");
    println!("  repohub bepinex                  Install BepInEx into the game directory");
    println!("  repohub launch                   Start the game through Steam");
    println!("  repohub status                   Show paths and install counts");
    println!();
    println!("Global options:");
    println!("  --format <json|text>             Output format");
    println!("  -v, --verbose                    Debug logging");
    println!("  -h, --help                       Show help");
    println!("  -V, --version                    Show version");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn empty_args_show_help() {
        let invocation = parse_args(&[]).unwrap();
        assert_eq!(invocation.command, Command::Help);
        assert_eq!(invocation.format, OutputFormat::Text);
    }

    #[test]
    fn global_flags_anywhere() {
        let invocation = parse_args(&args(&["search", "--format", "json", "more", "loot", "-v"])).unwrap();
        assert_eq!(invocation.command, Command::Search("more loot".to_string()));
        assert_eq!(invocation.format, OutputFormat::Json);
        assert!(invocation.verbose);

        let invocation = parse_args(&args(&["--format=json", "mods"])).unwrap();
        assert_eq!(invocation.command, Command::Mods);
        assert_eq!(invocation.format, OutputFormat::Json);
    }

    #[test]
    fn install_flags() {
        let invocation = parse_args(&args(&["install", "--no-deps", "Lanterns"])).unwrap();
        assert_eq!(
            invocation.command,
            Command::Install {
                name: "Lanterns".to_string(),
                with_dependencies: false
            }
        );
        assert!(parse_args(&args(&["install"])).is_err());
    }

    #[test]
    fn path_and_browse_variants() {
        assert_eq!(
            parse_args(&args(&["path"])).unwrap().command,
            Command::Path(PathCommand::Show)
        );
        assert_eq!(
            parse_args(&args(&["path", "--detect"])).unwrap().command,
            Command::Path(PathCommand::Detect)
        );
        assert_eq!(
            parse_args(&args(&["browse", "newest"])).unwrap().command,
            Command::Browse(Some(Section::Newest))
        );
        assert!(parse_args(&args(&["browse", "weird"])).is_err());
        assert!(parse_args(&args(&["--format", "yaml", "mods"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
    }
}
