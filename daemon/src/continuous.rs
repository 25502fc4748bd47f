/// Looping cues tied to a condition that is either active or not, such as
/// "some window is being dragged".
///
/// Each event name moves through `Idle → Playing → Fading → Idle`. Leaving
/// `Playing` starts a fade to silence and schedules the stop for after the
/// fade; every transition bumps a generation counter, so a scheduled stop that
/// belongs to an older fade episode does nothing when it finally runs.
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::debug;

use crate::device::{DeviceQueue, VoiceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Fading,
}

#[derive(Debug, Default)]
struct Channel {
    state: PlaybackState,
    /// Present exactly when the state is not `Idle`.
    voice: Option<VoiceId>,
    generation: u64,
}

#[derive(Debug, Default)]
struct Channels {
    by_name: HashMap<String, Channel>,
    /// Read and written under the same lock as the channels, so a start can
    /// never slip in between muting and the hard stop.
    muted: bool,
}

pub struct ContinuousPlayer {
    device: DeviceQueue,
    runtime: Handle,
    fade: Duration,
    fade_margin: Duration,
    channels: Mutex<Channels>,
}

impl ContinuousPlayer {
    /// `runtime` hosts the delayed stop tasks.
    pub fn new(device: DeviceQueue, runtime: Handle, fade: Duration, fade_margin: Duration) -> Self {
        Self {
            device,
            runtime,
            fade,
            fade_margin,
            channels: Mutex::new(Channels::default()),
        }
    }

    fn channels(&self) -> MutexGuard<'_, Channels> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self, name: &str) -> PlaybackState {
        self.channels().by_name.get(name).map(|c| c.state).unwrap_or_default()
    }

    /// Reports whether the condition behind `name` currently holds.
    /// `path` is the loop to start; with no path, or while muted, the event
    /// stays idle.
    pub fn update(self: &Arc<Self>, name: &str, active: bool, path: Option<&Path>) {
        let mut channels = self.channels();
        let muted = channels.muted;
        let channel = channels.by_name.entry(name.to_string()).or_default();

        match (channel.state, active) {
            (PlaybackState::Idle, true) => {
                if muted {
                    return;
                }
                let Some(path) = path else { return };
                channel.voice = Some(self.device.play(path, true, 1.0));
                channel.state = PlaybackState::Playing;
                channel.generation += 1;
                debug!(event = name, "continuous cue started");
            }
            (PlaybackState::Fading, true) => {
                if let Some(voice) = channel.voice {
                    self.device.set_volume(voice, 1.0, Duration::ZERO);
                }
                channel.state = PlaybackState::Playing;
                channel.generation += 1;
                debug!(event = name, "continuous cue resumed during fade");
            }
            (PlaybackState::Playing, false) => {
                if let Some(voice) = channel.voice {
                    self.device.set_volume(voice, 0.0, self.fade);
                }
                channel.state = PlaybackState::Fading;
                channel.generation += 1;
                self.schedule_stop(name, channel.generation);
            }
            (PlaybackState::Playing, true)
            | (PlaybackState::Idle, false)
            | (PlaybackState::Fading, false) => {}
        }
    }

    fn schedule_stop(self: &Arc<Self>, name: &str, generation: u64) {
        let this = Arc::clone(self);
        let name = name.to_string();
        let delay = self.fade + self.fade_margin;
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            this.finish_fade(&name, generation);
        });
    }

    /// Stops the voice if `name` is still in the fade episode `generation`.
    pub fn finish_fade(&self, name: &str, generation: u64) {
        let mut channels = self.channels();
        let Some(channel) = channels.by_name.get_mut(name) else { return };
        if channel.state != PlaybackState::Fading || channel.generation != generation {
            return;
        }
        if let Some(voice) = channel.voice.take() {
            self.device.stop(voice);
        }
        channel.state = PlaybackState::Idle;
        channel.generation += 1;
        debug!(event = name, "continuous cue stopped");
    }

    /// While muted no loop starts. Muting cuts every loop at once, in the
    /// same critical section that raises the flag.
    pub fn set_muted(&self, muted: bool) {
        let mut channels = self.channels();
        channels.muted = muted;
        if muted {
            self.cut_all(&mut channels);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.channels().muted
    }

    /// Hard stop of every loop without fading. Pending fade stops become no-ops.
    pub fn stop_all(&self) {
        let mut channels = self.channels();
        self.cut_all(&mut channels);
    }

    fn cut_all(&self, channels: &mut Channels) {
        for (name, channel) in channels.by_name.iter_mut() {
            if let Some(voice) = channel.voice.take() {
                self.device.stop(voice);
                debug!(event = %name, "continuous cue cut");
            }
            channel.state = PlaybackState::Idle;
            channel.generation += 1;
        }
    }
}
