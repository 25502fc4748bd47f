/// Config file discovery locations, in priority order:
///   1. the process working directory,
///   2. the directory holding the daemon executable,
///   3. `<Documents>/Foley/`.
///
/// Each directory is probed for `config.toml` first, then `config.json`.
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "Foley";
pub const CONFIG_FILE_NAMES: [&str; 2] = ["config.toml", "config.json"];

/// Returns the per-user application directory: `<Documents>/Foley/`.
pub fn user_app_dir() -> Option<PathBuf> {
    dirs::document_dir().map(|d| d.join(APP_DIR_NAME))
}

/// Directories searched for a config file, highest priority first.
pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }
    if let Some(user_dir) = user_app_dir() {
        dirs.push(user_dir);
    }
    dirs
}

/// Expands `dirs` into the concrete candidate file paths, preserving order.
pub fn candidate_files(dirs: &[PathBuf]) -> Vec<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .collect()
}

/// Directories watched by the filesystem monitor.
pub fn watched_user_dirs() -> Vec<PathBuf> {
    [dirs::document_dir(), dirs::desktop_dir()]
        .into_iter()
        .flatten()
        .collect()
}
