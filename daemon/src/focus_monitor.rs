use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::error::SensorError;
use crate::event::DaemonEvent;

/// The foreground window at one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Foreground {
    pub pid: u32,
    pub title: String,
}

/// Source of the current foreground window.
pub trait ForegroundProbe: Send {
    fn foreground(&mut self) -> Option<Foreground>;
}

pub fn platform_probe() -> Result<Box<dyn ForegroundProbe>, SensorError> {
    #[cfg(windows)]
    {
        Ok(Box::new(imp::Win32Probe))
    }
    #[cfg(not(windows))]
    {
        Err(SensorError::unavailable("foreground watcher", "not supported on this platform"))
    }
}

/// Remembers the last foreground owner and title and reports what changed.
#[derive(Debug, Default)]
pub struct FocusTracker {
    pid: Option<u32>,
    title: Option<String>,
}

impl FocusTracker {
    /// Returns the events for this observation: `TargetChanged` first when the
    /// owning process changed, then `TitleChanged` when the title did.
    pub fn observe(&mut self, current: Foreground) -> Vec<DaemonEvent> {
        let mut events = Vec::new();
        if self.pid != Some(current.pid) {
            self.pid = Some(current.pid);
            events.push(DaemonEvent::TargetChanged(current.pid));
        }
        if self.title.as_deref() != Some(current.title.as_str()) {
            events.push(DaemonEvent::TitleChanged(current.title.clone()));
            self.title = Some(current.title);
        }
        events
    }
}

/// Polls the foreground window every `period` and emits
/// [`DaemonEvent::TargetChanged`] / [`DaemonEvent::TitleChanged`] on change.
pub async fn run(mut probe: Box<dyn ForegroundProbe>, tx: mpsc::Sender<DaemonEvent>, period: Duration) {
    let mut sys = System::new();
    let mut tracker = FocusTracker::default();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let Some(current) = probe.foreground() else {
            continue;
        };
        for event in tracker.observe(current) {
            if let DaemonEvent::TargetChanged(pid) = &event {
                info!(pid, app = %process_name(&mut sys, *pid), "monitoring app");
            }
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

fn process_name(sys: &mut System, pid: u32) -> String {
    let pid = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
    sys.process(pid)
        .map(|p| p.name().to_string_lossy().into_owned())
        .unwrap_or_else(|| "<unknown>".to_string())
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use windows::Win32::UI::WindowsAndMessaging::{
        GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId,
    };

    use super::{Foreground, ForegroundProbe};

    pub struct Win32Probe;

    impl ForegroundProbe for Win32Probe {
        fn foreground(&mut self) -> Option<Foreground> {
            unsafe {
                let hwnd = GetForegroundWindow();
                if hwnd.0 == 0 {
                    return None;
                }
                let mut pid = 0u32;
                GetWindowThreadProcessId(hwnd, Some(&mut pid));
                if pid == 0 {
                    return None;
                }
                let mut buf = [0u16; 512];
                let len = GetWindowTextW(hwnd, &mut buf).max(0) as usize;
                Some(Foreground {
                    pid,
                    title: String::from_utf16_lossy(&buf[..len]),
                })
            }
        }
    }
}
