/// Error types shared by the engine and its sensors.
///
/// None of these are fatal: every caller logs the error and keeps running with
/// whatever configuration or sensors remain available.
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while discovering and parsing the sound configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found and no FOLEY_SOUND_* overrides set")]
    NotFound,

    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Errors raised by the audio device while loading or playing a cue.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("sound file not found: {0}")]
    SoundFileMissing(PathBuf),

    #[error("failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("audio output device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Raised by a sensor that cannot be started on this machine.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("{sensor} unavailable: {reason}")]
    Unavailable { sensor: &'static str, reason: String },
}

impl SensorError {
    pub fn unavailable(sensor: &'static str, reason: impl Into<String>) -> Self {
        SensorError::Unavailable { sensor, reason: reason.into() }
    }
}
