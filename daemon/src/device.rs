/// Audio output.
///
/// Every device operation runs on one dedicated thread. Producers hold a cheap
/// [`DeviceQueue`] and submit [`DeviceCommand`]s without waiting; voice ids are
/// allocated on the caller's side so a producer can refer to a voice before the
/// device thread has even loaded it. Commands for a voice that failed to load
/// are dropped quietly.
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, info, warn};

use crate::error::PlaybackError;

pub type VoiceId = u64;

/// Volume ramps are advanced at this rate while any fade is in progress.
const RAMP_STEP: Duration = Duration::from_millis(10);

/// Lifetime assumed for a one-shot whose decoder cannot report its length.
const UNKNOWN_DURATION_LIFETIME: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Play { voice: VoiceId, path: PathBuf, looping: bool, volume: f32 },
    SetVolume { voice: VoiceId, level: f32, fade: Duration },
    Stop { voice: VoiceId },
}

/// Producer side of the device thread.
#[derive(Clone)]
pub struct DeviceQueue {
    tx: Sender<DeviceCommand>,
    next_voice: Arc<AtomicU64>,
}

impl DeviceQueue {
    /// Creates a queue and the receiver to hand to [`spawn_worker`].
    pub fn channel() -> (Self, Receiver<DeviceCommand>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx, next_voice: Arc::new(AtomicU64::new(1)) }, rx)
    }

    /// Queues a new voice and returns its id.
    pub fn play(&self, path: &Path, looping: bool, volume: f32) -> VoiceId {
        let voice = self.next_voice.fetch_add(1, Ordering::Relaxed);
        self.submit(DeviceCommand::Play {
            voice,
            path: path.to_path_buf(),
            looping,
            volume,
        });
        voice
    }

    /// Moves the voice's volume to `level` over `fade` (immediately when zero).
    pub fn set_volume(&self, voice: VoiceId, level: f32, fade: Duration) {
        self.submit(DeviceCommand::SetVolume { voice, level, fade });
    }

    pub fn stop(&self, voice: VoiceId) {
        self.submit(DeviceCommand::Stop { voice });
    }

    fn submit(&self, command: DeviceCommand) {
        if self.tx.send(command).is_err() {
            debug!("device thread has exited; dropping command");
        }
    }
}

/// Minimal capability set of an output backend.
///
/// Called only from the device thread, so implementations need not be `Send`.
pub trait AudioDevice {
    type Handle;

    fn load(&mut self, path: &Path) -> Result<Self::Handle, PlaybackError>;
    fn play(&mut self, handle: &mut Self::Handle, looping: bool);
    fn set_volume(&mut self, handle: &mut Self::Handle, level: f32);
    fn stop(&mut self, handle: &mut Self::Handle);
    fn is_playing(&self, handle: &Self::Handle) -> bool;
    /// Nominal length of the loaded sound, when the decoder knows it.
    fn duration(&self, handle: &Self::Handle) -> Option<Duration>;
}

#[derive(Debug, Clone, Copy)]
struct Ramp {
    from: f32,
    to: f32,
    start: Instant,
    length: Duration,
}

impl Ramp {
    fn level_at(&self, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.start);
        let progress = (elapsed.as_secs_f32() / self.length.as_secs_f32()).min(1.0);
        self.from + (self.to - self.from) * progress
    }

    fn is_done(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start) >= self.length
    }
}

struct Voice<H> {
    handle: H,
    volume: f32,
    ramp: Option<Ramp>,
    /// One-shots are released at this instant; loops live until stopped.
    expires: Option<Instant>,
}

/// Command executor owned by the device thread.
struct Worker<D: AudioDevice, F> {
    open: F,
    device: Option<D>,
    voices: HashMap<VoiceId, Voice<D::Handle>>,
    cleanup_margin: Duration,
}

impl<D, F> Worker<D, F>
where
    D: AudioDevice,
    F: FnMut() -> Result<D, PlaybackError>,
{
    fn new(open: F, cleanup_margin: Duration) -> Self {
        Self { open, device: None, voices: HashMap::new(), cleanup_margin }
    }

    /// Opens the output device lazily, retrying on every play until it works.
    fn device(&mut self) -> Option<&mut D> {
        if self.device.is_none() {
            match (self.open)() {
                Ok(device) => {
                    info!("audio output opened");
                    self.device = Some(device);
                }
                Err(e) => warn!("{e}"),
            }
        }
        self.device.as_mut()
    }

    fn handle(&mut self, command: DeviceCommand, now: Instant) {
        match command {
            DeviceCommand::Play { voice, path, looping, volume } => {
                self.play(voice, &path, looping, volume, now)
            }
            DeviceCommand::SetVolume { voice, level, fade } => {
                let (Some(device), Some(v)) = (self.device.as_mut(), self.voices.get_mut(&voice))
                else {
                    return;
                };
                if fade.is_zero() {
                    v.ramp = None;
                    v.volume = level;
                    device.set_volume(&mut v.handle, level);
                } else {
                    v.ramp = Some(Ramp { from: v.volume, to: level, start: now, length: fade });
                }
            }
            DeviceCommand::Stop { voice } => self.release(voice),
        }
    }

    fn play(&mut self, voice: VoiceId, path: &Path, looping: bool, volume: f32, now: Instant) {
        if !path.exists() {
            warn!("{}", PlaybackError::SoundFileMissing(path.to_path_buf()));
            return;
        }
        self.release(voice);

        let margin = self.cleanup_margin;
        let Some(device) = self.device() else { return };
        let mut handle = match device.load(path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{e}");
                return;
            }
        };
        device.set_volume(&mut handle, volume);
        device.play(&mut handle, looping);

        let expires = (!looping).then(|| {
            now + device.duration(&handle).unwrap_or(UNKNOWN_DURATION_LIFETIME) + margin
        });
        debug!(voice, path = %path.display(), looping, "voice started");
        self.voices.insert(voice, Voice { handle, volume, ramp: None, expires });
    }

    fn release(&mut self, voice: VoiceId) {
        if let (Some(device), Some(mut v)) = (self.device.as_mut(), self.voices.remove(&voice)) {
            device.stop(&mut v.handle);
            debug!(voice, "voice released");
        }
    }

    /// Advances fades and releases one-shots whose time is up.
    fn tick(&mut self, now: Instant) {
        let Some(device) = self.device.as_mut() else { return };
        let mut expired = Vec::new();

        for (id, voice) in &mut self.voices {
            if let Some(ramp) = voice.ramp {
                voice.volume = ramp.level_at(now);
                device.set_volume(&mut voice.handle, voice.volume);
                if ramp.is_done(now) {
                    voice.ramp = None;
                }
            }
            if let Some(expires) = voice.expires {
                if now >= expires {
                    if device.is_playing(&voice.handle) {
                        voice.expires = Some(now + self.cleanup_margin);
                    } else {
                        expired.push(*id);
                    }
                }
            }
        }

        for id in expired {
            self.release(id);
        }
    }

    /// How long the thread may sleep before `tick` has work to do.
    fn next_wakeup(&self, now: Instant) -> Option<Duration> {
        if self.voices.values().any(|v| v.ramp.is_some()) {
            return Some(RAMP_STEP);
        }
        self.voices
            .values()
            .filter_map(|v| v.expires)
            .min()
            .map(|at| at.saturating_duration_since(now))
    }

    fn run(mut self, rx: Receiver<DeviceCommand>) {
        loop {
            let received = match self.next_wakeup(Instant::now()) {
                Some(wait) => rx.recv_timeout(wait),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(command) => self.handle(command, Instant::now()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.tick(Instant::now());
        }
        let ids: Vec<VoiceId> = self.voices.keys().copied().collect();
        for id in ids {
            self.release(id);
        }
        debug!("device thread exited");
    }
}

/// Starts the device thread. `open` runs on that thread (output streams are
/// usually not `Send`) and is retried whenever a play finds no open device.
pub fn spawn_worker<D, F>(
    open: F,
    rx: Receiver<DeviceCommand>,
    cleanup_margin: Duration,
) -> std::io::Result<JoinHandle<()>>
where
    D: AudioDevice + 'static,
    F: FnMut() -> Result<D, PlaybackError> + Send + 'static,
{
    std::thread::Builder::new()
        .name("audio-device".into())
        .spawn(move || Worker::new(open, cleanup_margin).run(rx))
}

// ── rodio backend ─────────────────────────────────────────────────────────────

/// Default output device via rodio.
pub struct RodioDevice {
    // Dropping the stream silences every sink.
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
}

pub struct RodioVoice {
    sink: Sink,
    source: Option<Decoder<BufReader<File>>>,
    duration: Option<Duration>,
}

impl RodioDevice {
    pub fn open() -> Result<Self, PlaybackError> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;
        Ok(Self { _stream: stream, stream_handle })
    }
}

impl AudioDevice for RodioDevice {
    type Handle = RodioVoice;

    fn load(&mut self, path: &Path) -> Result<RodioVoice, PlaybackError> {
        let decode_error = |reason: String| PlaybackError::Decode {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PlaybackError::SoundFileMissing(path.to_path_buf()),
            _ => decode_error(e.to_string()),
        })?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| decode_error(e.to_string()))?;
        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;
        let duration = source.total_duration();
        Ok(RodioVoice { sink, source: Some(source), duration })
    }

    fn play(&mut self, handle: &mut RodioVoice, looping: bool) {
        let Some(source) = handle.source.take() else { return };
        if looping {
            handle.sink.append(source.repeat_infinite());
        } else {
            handle.sink.append(source);
        }
        handle.sink.play();
    }

    fn set_volume(&mut self, handle: &mut RodioVoice, level: f32) {
        handle.sink.set_volume(level.clamp(0.0, 1.0));
    }

    fn stop(&mut self, handle: &mut RodioVoice) {
        handle.sink.stop();
    }

    fn is_playing(&self, handle: &RodioVoice) -> bool {
        !handle.sink.empty() && !handle.sink.is_paused()
    }

    fn duration(&self, handle: &RodioVoice) -> Option<Duration> {
        handle.duration
    }
}
