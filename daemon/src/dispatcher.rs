use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::config::{SoundTables, Tuning};
use crate::continuous::{ContinuousPlayer, PlaybackState};
use crate::device::DeviceQueue;
use crate::event::names;
use crate::throttle::ThrottleLedger;

/// Single entry point from semantic events to device commands.
///
/// Lookups and throttle decisions happen on the caller's thread; the resulting
/// device work is queued onto the device thread.
pub struct Dispatcher {
    sounds: RwLock<SoundTables>,
    ledger: Arc<ThrottleLedger>,
    device: DeviceQueue,
    continuous: Arc<ContinuousPlayer>,
    muted: AtomicBool,
    tuning: Tuning,
}

impl Dispatcher {
    pub fn new(
        sounds: SoundTables,
        tuning: Tuning,
        device: DeviceQueue,
        runtime: Handle,
        ledger: Arc<ThrottleLedger>,
    ) -> Self {
        let continuous = Arc::new(ContinuousPlayer::new(
            device.clone(),
            runtime,
            tuning.fade(),
            tuning.fade_margin(),
        ));
        Self {
            sounds: RwLock::new(sounds),
            ledger,
            device,
            continuous,
            muted: AtomicBool::new(false),
            tuning,
        }
    }

    /// Swaps in new sound tables. Loops already playing keep their voice.
    pub fn configure(&self, sounds: SoundTables) {
        info!(
            events = sounds.events.len(),
            keys = sounds.keys.len(),
            "sound tables configured"
        );
        match self.sounds.write() {
            Ok(mut guard) => *guard = sounds,
            Err(poisoned) => *poisoned.into_inner() = sounds,
        }
    }

    fn with_sounds<T>(&self, f: impl FnOnce(&SoundTables) -> T) -> T {
        match self.sounds.read() {
            Ok(guard) => f(&*guard),
            Err(poisoned) => f(&*poisoned.into_inner()),
        }
    }

    fn event_path(&self, name: &str) -> Option<PathBuf> {
        self.with_sounds(|s| s.events.get(name).cloned())
    }

    fn interval_for(&self, name: &str) -> Duration {
        if name == names::KEY_DOWN {
            self.tuning.key_repeat()
        } else {
            self.tuning.ui_activity()
        }
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn ledger(&self) -> &Arc<ThrottleLedger> {
        &self.ledger
    }

    pub fn fire_once(&self, name: &str) -> bool {
        self.fire_once_at(name, Instant::now())
    }

    /// Plays the one-shot cue for `name` unless it is unconfigured, throttled
    /// or muted. Returns whether a play command was issued.
    ///
    /// While muted the ledger is still updated, so unmuting in the middle of a
    /// burst does not replay it.
    pub fn fire_once_at(&self, name: &str, now: Instant) -> bool {
        let Some(path) = self.event_path(name) else {
            return false;
        };
        if !self.ledger.should_fire(name, now, self.interval_for(name)) {
            return false;
        }
        if self.is_muted() {
            return false;
        }
        debug!(event = name, "fire");
        self.device.play(&path, false, 1.0);
        true
    }

    pub fn fire_key(&self, code: u32) -> bool {
        self.fire_key_at(code, Instant::now())
    }

    /// Plays the sound for one physical key: its own entry if configured,
    /// otherwise the generic `key_down` sound.
    pub fn fire_key_at(&self, code: u32, now: Instant) -> bool {
        let path = self.with_sounds(|s| {
            s.keys
                .get(&code)
                .or_else(|| s.events.get(names::KEY_DOWN))
                .cloned()
        });
        let Some(path) = path else {
            return false;
        };
        let key = names::key_throttle_name(code);
        if !self.ledger.should_fire(&key, now, self.tuning.key_repeat()) {
            return false;
        }
        if self.is_muted() {
            return false;
        }
        self.device.play(&path, false, 1.0);
        true
    }

    /// Reports the condition behind a continuous event. Nothing starts while
    /// muted; the player checks that under its own lock.
    pub fn set_continuous(&self, name: &str, active: bool) {
        let path = if active { self.event_path(name) } else { None };
        self.continuous.update(name, active, path.as_deref());
    }

    pub fn continuous_state(&self, name: &str) -> PlaybackState {
        self.continuous.state(name)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Muting cuts every loop immediately; one-shots already playing finish.
    pub fn set_muted(&self, muted: bool) {
        let was_muted = self.muted.swap(muted, Ordering::SeqCst);
        self.continuous.set_muted(muted);
        if muted != was_muted {
            info!(muted, "mute toggled");
        }
    }

    /// Flips the mute state and returns the new value.
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.is_muted();
        self.set_muted(muted);
        muted
    }
}
