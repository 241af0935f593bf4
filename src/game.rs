use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use sysinfo::System;
use tracing::{debug, warn};

pub const GAME_NAME: &str = "R.E.P.O.";
pub const STEAM_APP_ID: &str = "3241660";
const GAME_EXECUTABLE: &str = "REPO.exe";
const PROCESS_NAME: &str = "repo.exe";
const STEAM_FOLDER: &str = "REPO";
const CORE_RUNTIME_DIR: &str = "BepInEx";
const PLUGINS_DIR: &str = "plugins";
const DISABLED_DIR: &str = "disabled_mods";

/// Directory layout of one game install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamePaths {
    pub game_root: PathBuf,
    pub core_runtime_dir: PathBuf,
    pub plugins_dir: PathBuf,
    pub disabled_dir: PathBuf,
}

impl GamePaths {
    pub fn new(game_root: &Path) -> Self {
        let core_runtime_dir = game_root.join(CORE_RUNTIME_DIR);
        let plugins_dir = core_runtime_dir.join(PLUGINS_DIR);
        let disabled_dir = plugins_dir.join(DISABLED_DIR);
        GamePaths {
            game_root: game_root.to_path_buf(),
            core_runtime_dir,
            plugins_dir,
            disabled_dir,
        }
    }

    pub fn mod_dir(&self, name: &str) -> PathBuf {
        self.plugins_dir.join(name)
    }

    pub fn disabled_archive(&self, name: &str) -> PathBuf {
        self.disabled_dir.join(format!("{name}.zip"))
    }

    pub fn core_runtime_present(&self) -> bool {
        self.core_runtime_dir.is_dir()
    }
}

pub fn looks_like_game_root(path: &Path) -> bool {
    path.join(GAME_EXECUTABLE).is_file()
}

/// Outcome of accepting a user-supplied game root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub paths: GamePaths,
    pub warnings: Vec<String>,
}

pub fn validate_game_root(path: &Path) -> Result<Validated> {
    if !path.is_dir() {
        bail!("game directory does not exist: {}", path.display());
    }
    if !looks_like_game_root(path) {
        bail!(
            "invalid game root: expected {GAME_EXECUTABLE} in {}",
            path.display()
        );
    }
    let paths = GamePaths::new(path);
    let mut warnings = Vec::new();
    if !paths.core_runtime_present() {
        warnings.push(format!(
            "{CORE_RUNTIME_DIR} not found in {}; install it before adding mods",
            path.display()
        ));
    }
    Ok(Validated { paths, warnings })
}

/// Looks for the game in every Steam library the current user knows about.
pub fn detect_game_root() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(home) = dirs_home() {
        candidates.push(home.join(".local/share/Steam"));
        candidates.push(home.join(".steam/steam"));
        candidates.push(home.join("Library/Application Support/Steam"));
    }
    if let Some(program_files) = std::env::var_os("ProgramFiles(x86)") {
        candidates.push(PathBuf::from(program_files).join("Steam"));
    }

    let mut libraries = Vec::new();
    for base in candidates {
        let vdf = base.join("steamapps/libraryfolders.vdf");
        if vdf.exists() {
            match parse_steam_library_paths(&vdf) {
                Ok(paths) => libraries.extend(paths),
                Err(err) => debug!("skipping {}: {err:#}", vdf.display()),
            }
        }
        libraries.push(base);
    }

    libraries
        .into_iter()
        .map(|library| library.join("steamapps/common").join(STEAM_FOLDER))
        .find(|candidate| looks_like_game_root(candidate))
}

pub(crate) fn parse_steam_library_paths(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = fs::read_to_string(path).context("read libraryfolders.vdf")?;
    Ok(library_paths_from_vdf(&raw))
}

fn library_paths_from_vdf(raw: &str) -> Vec<PathBuf> {
    raw.lines()
        .map(str::trim)
        .filter(|line| line.contains("\"path\""))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('"').collect();
            (parts.len() >= 4).then(|| PathBuf::from(parts[3].replace("\\\\", "\\")))
        })
        .collect()
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|base| base.home_dir().to_path_buf())
}

/// Hands the Steam launch URL to the platform opener.
pub fn launch_game() -> Result<()> {
    let target = format!("steam://run/{STEAM_APP_ID}");
    let candidates: Vec<(&str, Vec<&str>)> = if cfg!(target_os = "windows") {
        vec![("cmd", vec!["/C", "start", "", target.as_str()])]
    } else if cfg!(target_os = "macos") {
        vec![("open", vec![target.as_str()])]
    } else {
        vec![
            ("xdg-open", vec![target.as_str()]),
            ("gio", vec!["open", target.as_str()]),
            ("steam", vec![target.as_str()]),
        ]
    };

    let mut errors = Vec::new();
    for (command, args) in candidates {
        match Command::new(command)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {
                debug!(command, "launched {GAME_NAME}");
                return Ok(());
            }
            Ok(status) => errors.push(format!("{command} exited {status}")),
            Err(err) => errors.push(format!("{command} failed: {err}")),
        }
    }
    warn!("failed to launch {GAME_NAME}: {}", errors.join("; "));
    bail!("failed to launch {GAME_NAME}: {}", errors.join("; "))
}

pub fn is_game_running() -> bool {
    let mut system = System::new();
    system.refresh_processes();
    system
        .processes()
        .values()
        .any(|process| process.name().eq_ignore_ascii_case(PROCESS_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_places_disabled_archives_under_plugins() {
        let paths = GamePaths::new(Path::new("/games/REPO"));
        assert_eq!(paths.plugins_dir, Path::new("/games/REPO/BepInEx/plugins"));
        assert_eq!(
            paths.disabled_archive("Lanterns"),
            Path::new("/games/REPO/BepInEx/plugins/disabled_mods/Lanterns.zip")
        );
        assert_eq!(
            paths.mod_dir("Lanterns"),
            Path::new("/games/REPO/BepInEx/plugins/Lanterns")
        );
    }

    #[test]
    fn validation_requires_executable_and_warns_without_runtime() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_game_root(dir.path()).is_err());
        assert!(validate_game_root(&dir.path().join("missing")).is_err());

        fs::write(dir.path().join(GAME_EXECUTABLE), b"").unwrap();
        let validated = validate_game_root(dir.path()).unwrap();
        assert_eq!(validated.warnings.len(), 1);
        assert!(!validated.paths.core_runtime_present());

        fs::create_dir_all(dir.path().join("BepInEx/plugins")).unwrap();
        let validated = validate_game_root(dir.path()).unwrap();
        assert!(validated.warnings.is_empty());
        assert!(validated.paths.core_runtime_present());
    }

    #[test]
    fn parses_library_folders() {
        let raw = r#"
"libraryfolders"
{
    "0"
    {
        "path"		"/home/user/.local/share/Steam"
        "label"		""
    }
    "1"
    {
        "path"		"D:\\SteamLibrary"
    }
}
"#;
        let paths = library_paths_from_vdf(raw);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/home/user/.local/share/Steam"),
                PathBuf::from("D:\\SteamLibrary"),
            ]
        );
    }
}
