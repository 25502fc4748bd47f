use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::ConfigError;
use crate::event::DaemonEvent;
use crate::paths;

/// Environment variables with this prefix add or override a sound table entry,
/// keyed by the lower-cased remainder (`FOLEY_SOUND_WINDOW_CLOSE` → `window_close`).
pub const SOUND_ENV_PREFIX: &str = "FOLEY_SOUND_";

/// Behavioural thresholds. Every field can be overridden from the `[tuning]`
/// table of the config file; missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Minimum gap between two sounds for the same physical key.
    pub key_repeat_ms: u64,
    /// Minimum gap between two fires of a generic event, and between title changes.
    pub ui_activity_ms: u64,
    /// Minimum gap between two "UI content changed" cues.
    pub content_change_ms: u64,
    /// Fade-out length when a continuous event stops.
    pub fade_ms: u64,
    /// Extra wait after the fade before the looping voice is stopped.
    pub fade_margin_ms: u64,
    /// How long a one-shot voice is kept after its nominal duration.
    pub oneshot_cleanup_margin_ms: u64,
    /// Window geometry poll period.
    pub window_poll_ms: u64,
    /// Windows narrower or shorter than this (in pixels) are ignored.
    pub min_window_size: f64,
    /// Filesystem events arriving within this window are reported together.
    pub fs_coalesce_ms: u64,
    /// Network counter sample period.
    pub network_poll_ms: u64,
    /// A byte delta above this in either direction counts as network activity.
    pub network_threshold_bytes: u64,
    /// Foreground window poll period.
    pub foreground_poll_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            key_repeat_ms: 50,
            ui_activity_ms: 100,
            content_change_ms: 250,
            fade_ms: 200,
            fade_margin_ms: 50,
            oneshot_cleanup_margin_ms: 500,
            window_poll_ms: 100,
            min_window_size: 50.0,
            fs_coalesce_ms: 100,
            network_poll_ms: 1000,
            network_threshold_bytes: 1024,
            foreground_poll_ms: 100,
        }
    }
}

impl Tuning {
    pub fn key_repeat(&self) -> Duration {
        Duration::from_millis(self.key_repeat_ms)
    }

    pub fn ui_activity(&self) -> Duration {
        Duration::from_millis(self.ui_activity_ms)
    }

    pub fn content_change(&self) -> Duration {
        Duration::from_millis(self.content_change_ms)
    }

    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.fade_ms)
    }

    pub fn fade_margin(&self) -> Duration {
        Duration::from_millis(self.fade_margin_ms)
    }

    pub fn oneshot_cleanup_margin(&self) -> Duration {
        Duration::from_millis(self.oneshot_cleanup_margin_ms)
    }
}

/// On-disk config file, either `config.toml` or `config.json`.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    /// Event name → sound file path.
    #[serde(default)]
    pub events: HashMap<String, String>,
    /// Key code (as a string) → sound file path.
    pub keys: Option<HashMap<String, String>>,
    /// Key name (e.g. "F12") that toggles mute.
    pub mute_hotkey: Option<String>,
    #[serde(default)]
    pub tuning: Tuning,
}

/// The effective lookup tables handed to the dispatcher.
/// Every path in here is absolute or was taken verbatim from the user.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SoundTables {
    pub events: HashMap<String, PathBuf>,
    pub keys: HashMap<u32, PathBuf>,
}

/// Result of config discovery plus environment overlay.
#[derive(Debug, Default, Clone)]
pub struct ResolvedConfig {
    pub sounds: SoundTables,
    pub tuning: Tuning,
    pub mute_hotkey: Option<String>,
    /// The file the config was read from, if any.
    pub source: Option<PathBuf>,
}

/// Parses a single config file. The format is chosen by extension: `.json`
/// is JSON, anything else is TOML.
pub fn parse_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let parsed = if is_json {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    } else {
        toml::from_str(&content).map_err(|e| e.to_string())
    };
    parsed.map_err(|reason| ConfigError::Parse { path: path.to_path_buf(), reason })
}

/// Collects `FOLEY_SOUND_*` overrides from an environment listing.
/// Empty names and empty values are skipped.
pub fn env_overlay<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| {
            let name = key.strip_prefix(SOUND_ENV_PREFIX)?.trim().to_lowercase();
            let value = value.trim().to_string();
            (!name.is_empty() && !value.is_empty()).then_some((name, value))
        })
        .collect()
}

/// Resolves `./` and `../` prefixed values against `base`; everything else is
/// returned unchanged.
pub fn resolve_path(value: &str, base: &Path) -> PathBuf {
    let relative = ["./", "../", ".\\", "..\\"]
        .iter()
        .any(|prefix| value.starts_with(prefix));
    if relative {
        normalize(&base.join(value))
    } else {
        PathBuf::from(value)
    }
}

/// Lexically removes `.` and `..` segments without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Builds the effective sound and key tables.
///
/// Relative paths are resolved against `source_dir`. Overlay entries replace
/// file entries of the same name.
pub fn resolve_tables(
    events: &HashMap<String, String>,
    keys: Option<&HashMap<String, String>>,
    source_dir: &Path,
    overlay: &[(String, String)],
) -> SoundTables {
    let mut tables = SoundTables::default();

    for (name, value) in events {
        tables.events.insert(name.clone(), resolve_path(value, source_dir));
    }

    for (code, value) in keys.into_iter().flatten() {
        match code.trim().parse::<u32>() {
            Ok(code) => {
                tables.keys.insert(code, resolve_path(value, source_dir));
            }
            Err(_) => warn!(key = %code, "dropping key sound with non-numeric key code"),
        }
    }

    for (name, value) in overlay {
        debug!(event = %name, "sound overridden from environment");
        tables.events.insert(name.clone(), resolve_path(value, source_dir));
    }

    tables
}

/// Tries each candidate file in order and returns the first one that parses.
/// Unreadable or malformed candidates are logged and skipped.
fn first_parsed(candidates: &[PathBuf]) -> Option<(PathBuf, RawConfig)> {
    for path in candidates {
        if !path.exists() {
            continue;
        }
        match parse_file(path) {
            Ok(raw) => return Some((path.clone(), raw)),
            Err(e) => error!("{e}"),
        }
    }
    None
}

/// Runs discovery over `candidates` and applies the environment overlay.
pub fn discover<I>(candidates: &[PathBuf], env: I) -> Result<ResolvedConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    debug!(?candidates, "searching for config");
    let overlay = env_overlay(env);
    let found = first_parsed(candidates);

    if found.is_none() && overlay.is_empty() {
        return Err(ConfigError::NotFound);
    }

    let (source, raw) = match found {
        Some((path, raw)) => {
            info!(path = %path.display(), "loaded config");
            (Some(path), raw)
        }
        None => (None, RawConfig::default()),
    };

    let base = match source.as_deref().and_then(Path::parent) {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().unwrap_or_default(),
    };
    let sounds = resolve_tables(&raw.events, raw.keys.as_ref(), &base, &overlay);

    Ok(ResolvedConfig {
        sounds,
        tuning: raw.tuning,
        mute_hotkey: raw.mute_hotkey,
        source,
    })
}

/// Discovers the config from the standard search directories and the process
/// environment.
pub fn load() -> Result<ResolvedConfig, ConfigError> {
    discover(&candidates(), std::env::vars())
}

/// Every config file location, highest priority first.
pub fn candidates() -> Vec<PathBuf> {
    paths::candidate_files(&paths::search_dirs())
}

/// Existing parent directories of `candidates`, deduplicated, in order.
pub fn watch_dirs(candidates: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for dir in candidates.iter().filter_map(|c| c.parent()) {
        if dir.is_dir() && !dirs.iter().any(|d| d == dir) {
            dirs.push(dir.to_path_buf());
        }
    }
    dirs
}

/// Whether `event` creates, changes or removes one of the candidate files.
fn is_config_change(event: &notify::Event, candidates: &[PathBuf]) -> bool {
    let is_write = matches!(
        event.kind,
        notify::EventKind::Create(_) | notify::EventKind::Modify(_) | notify::EventKind::Remove(_)
    );
    is_write && event.paths.iter().any(|p| candidates.contains(p))
}

/// Watches every search directory. Whenever any candidate file is created,
/// modified or removed, discovery runs again over all candidates and a
/// `ConfigReloaded` event is sent, so a file that appears later or in a
/// higher-priority directory takes over.
pub async fn watch_config(candidates: Vec<PathBuf>, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!("failed to create config watcher: {e}");
            return;
        }
    };

    // Directories rather than files, so editor-style atomic saves are caught.
    let mut watched = 0;
    for dir in watch_dirs(&candidates) {
        match watcher.watch(&dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                debug!(dir = %dir.display(), "watching for config changes");
                watched += 1;
            }
            Err(e) => warn!(dir = %dir.display(), "failed to watch config directory: {e}"),
        }
    }
    if watched == 0 {
        warn!("no config directory could be watched, hot reload disabled");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        if !is_config_change(&event, &candidates) {
            continue;
        }
        match discover(&candidates, std::env::vars()) {
            Ok(config) => {
                if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("config reload failed, keeping previous tables: {e}"),
        }
    }
}
