use crate::config::ResolvedConfig;

/// Semantic event names used as keys into the sound table.
pub mod names {
    pub const WINDOW_CLOSE: &str = "window_close";
    pub const WINDOW_OPEN: &str = "window_open";
    pub const WINDOW_MIN: &str = "window_min";
    pub const WINDOW_ZOOM: &str = "window_zoom";
    pub const WINDOW_MOVE: &str = "window_move";
    pub const WINDOW_RESIZE: &str = "window_resize";
    pub const APP_ACTIVITY: &str = "app_activity";
    pub const DISK_WRITE: &str = "disk_write";
    pub const NETWORK_ACTIVITY: &str = "network_activity";
    pub const KEY_DOWN: &str = "key_down";

    /// Throttle key for a single physical key, e.g. `key_36`.
    pub fn key_throttle_name(code: u32) -> String {
        format!("key_{code}")
    }
}

/// Events delivered to the daemon's main loop by the sensor tasks.
pub enum DaemonEvent {
    /// A key went down somewhere on the desktop.
    KeyDown(u32),
    /// The configured mute hotkey was pressed.
    MuteToggled,
    /// The foreground window's title changed.
    TitleChanged(String),
    /// The process that owns the foreground window changed.
    TargetChanged(u32),
    /// The config file changed on disk and discovery ran again.
    ConfigReloaded(ResolvedConfig),
    /// Ctrl+C received; silence everything and exit.
    Shutdown,
}
