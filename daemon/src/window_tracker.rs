/// Window geometry polling.
///
/// Each tick the visible top-level windows are listed and compared with the
/// previous tick. Windows that vanished count as closed, new ones as opened,
/// and any geometry change as moving (same size) or resizing (size changed).
/// The snapshot is owned by the poll task alone.
///
/// Only Windows has a lister; elsewhere [`platform_lister`] reports the sensor
/// as unavailable.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::SensorError;

pub type WindowId = u64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    fn same_size(&self, other: &Rect) -> bool {
        self.width == other.width && self.height == other.height
    }
}

pub type WindowSnapshot = HashMap<WindowId, Rect>;

/// What changed between two consecutive snapshots.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WindowDeltas {
    pub closed: Vec<WindowId>,
    pub opened: Vec<WindowId>,
    pub moving: bool,
    pub resizing: bool,
}

pub struct WindowTracker {
    previous: Option<WindowSnapshot>,
    min_size: f64,
}

impl WindowTracker {
    pub fn new(min_size: f64) -> Self {
        Self { previous: None, min_size }
    }

    /// Replaces the stored snapshot and returns the changes. The first call
    /// only records a baseline.
    pub fn observe(&mut self, mut current: WindowSnapshot) -> WindowDeltas {
        // Tooltips and tiny overlays.
        current.retain(|_, r| r.width >= self.min_size && r.height >= self.min_size);

        let Some(previous) = self.previous.replace(current) else {
            return WindowDeltas::default();
        };
        let Some(current) = self.previous.as_ref() else {
            return WindowDeltas::default();
        };

        let mut deltas = WindowDeltas::default();
        for id in previous.keys().filter(|id| !current.contains_key(id)) {
            deltas.closed.push(*id);
        }
        for (id, rect) in current {
            match previous.get(id) {
                None => deltas.opened.push(*id),
                Some(prev) if prev != rect => {
                    if prev.same_size(rect) {
                        deltas.moving = true;
                    } else {
                        deltas.resizing = true;
                    }
                }
                Some(_) => {}
            }
        }
        deltas.closed.sort_unstable();
        deltas.opened.sort_unstable();
        deltas
    }
}

/// Source of window snapshots.
pub trait WindowLister: Send {
    fn list(&mut self) -> Result<WindowSnapshot, SensorError>;
}

/// Returns this platform's window lister.
pub fn platform_lister() -> Result<Box<dyn WindowLister>, SensorError> {
    #[cfg(windows)]
    {
        Ok(Box::new(imp::EnumWindowsLister))
    }
    #[cfg(not(windows))]
    {
        Err(SensorError::unavailable("window poller", "not supported on this platform"))
    }
}

/// Polls `lister` every `period` and feeds the deltas to `engine`.
pub async fn run(mut lister: Box<dyn WindowLister>, engine: Arc<Engine>, period: Duration) {
    let mut tracker = WindowTracker::new(engine.tuning().min_window_size);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match lister.list() {
            Ok(snapshot) => {
                let deltas = tracker.observe(snapshot);
                if deltas != WindowDeltas::default() {
                    debug!(?deltas, "window changes");
                }
                engine.on_window_deltas(&deltas);
            }
            Err(e) => warn!("{e}"),
        }
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowRect, IsIconic, IsWindowVisible,
    };

    use super::{Rect, WindowLister, WindowSnapshot};
    use crate::error::SensorError;

    /// `EnumWindows` callback; `lparam` points at the snapshot being filled.
    unsafe extern "system" fn collect(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let snapshot = &mut *(lparam.0 as *mut WindowSnapshot);
        // Minimised windows are off screen and count as gone.
        if IsWindowVisible(hwnd).as_bool() && !IsIconic(hwnd).as_bool() {
            let mut rect = RECT::default();
            if GetWindowRect(hwnd, &mut rect).is_ok() {
                snapshot.insert(
                    hwnd.0 as u64,
                    Rect {
                        x: rect.left as f64,
                        y: rect.top as f64,
                        width: (rect.right - rect.left) as f64,
                        height: (rect.bottom - rect.top) as f64,
                    },
                );
            }
        }
        BOOL(1)
    }

    pub struct EnumWindowsLister;

    impl WindowLister for EnumWindowsLister {
        fn list(&mut self) -> Result<WindowSnapshot, SensorError> {
            let mut snapshot = WindowSnapshot::new();
            unsafe {
                EnumWindows(
                    Some(collect),
                    LPARAM(&mut snapshot as *mut WindowSnapshot as isize),
                )
            }
            .map_err(|e| SensorError::unavailable("window poller", e.to_string()))?;
            Ok(snapshot)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: f64, y: f64, width: f64, height: f64) -> Rect {
        Rect { x, y, width, height }
    }

    fn snapshot(entries: &[(WindowId, Rect)]) -> WindowSnapshot {
        entries.iter().copied().collect()
    }

    fn tracker_with_baseline(entries: &[(WindowId, Rect)]) -> WindowTracker {
        let mut tracker = WindowTracker::new(50.0);
        tracker.observe(snapshot(entries));
        tracker
    }

    #[test]
    fn first_observation_is_baseline_only() {
        let mut tracker = WindowTracker::new(50.0);
        let deltas = tracker.observe(snapshot(&[(1, rect(0.0, 0.0, 800.0, 600.0))]));
        assert_eq!(deltas, WindowDeltas::default());
    }

    #[test]
    fn unchanged_windows_produce_no_deltas() {
        let entries = [(1, rect(0.0, 0.0, 800.0, 600.0))];
        let mut tracker = tracker_with_baseline(&entries);
        assert_eq!(tracker.observe(snapshot(&entries)), WindowDeltas::default());
    }

    #[test]
    fn vanished_window_is_closed_and_new_one_opened() {
        let mut tracker = tracker_with_baseline(&[(1, rect(0.0, 0.0, 800.0, 600.0))]);
        let deltas = tracker.observe(snapshot(&[(2, rect(10.0, 10.0, 400.0, 300.0))]));
        assert_eq!(deltas.closed, vec![1]);
        assert_eq!(deltas.opened, vec![2]);
        assert!(!deltas.moving && !deltas.resizing);
    }

    #[test]
    fn position_change_is_moving() {
        let mut tracker = tracker_with_baseline(&[(1, rect(0.0, 0.0, 800.0, 600.0))]);
        let deltas = tracker.observe(snapshot(&[(1, rect(25.0, 40.0, 800.0, 600.0))]));
        assert!(deltas.moving);
        assert!(!deltas.resizing);
    }

    #[test]
    fn size_change_is_resizing_not_moving() {
        let mut tracker = tracker_with_baseline(&[(1, rect(0.0, 0.0, 800.0, 600.0))]);
        let deltas = tracker.observe(snapshot(&[(1, rect(-5.0, 0.0, 820.0, 600.0))]));
        assert!(deltas.resizing);
        assert!(!deltas.moving);
    }

    #[test]
    fn move_and_resize_on_different_windows() {
        let mut tracker = tracker_with_baseline(&[
            (1, rect(0.0, 0.0, 800.0, 600.0)),
            (2, rect(0.0, 0.0, 300.0, 300.0)),
        ]);
        let deltas = tracker.observe(snapshot(&[
            (1, rect(5.0, 0.0, 800.0, 600.0)),
            (2, rect(0.0, 0.0, 310.0, 300.0)),
        ]));
        assert!(deltas.moving && deltas.resizing);
    }

    #[test]
    fn small_windows_are_ignored() {
        let mut tracker = tracker_with_baseline(&[(1, rect(0.0, 0.0, 800.0, 600.0))]);
        let deltas = tracker.observe(snapshot(&[
            (1, rect(0.0, 0.0, 800.0, 600.0)),
            (9, rect(0.0, 0.0, 40.0, 400.0)),
        ]));
        assert!(deltas.opened.is_empty());
    }

    #[test]
    fn stopping_motion_clears_flags() {
        let mut tracker = tracker_with_baseline(&[(1, rect(0.0, 0.0, 800.0, 600.0))]);
        assert!(tracker.observe(snapshot(&[(1, rect(5.0, 0.0, 800.0, 600.0))])).moving);
        assert!(!tracker.observe(snapshot(&[(1, rect(5.0, 0.0, 800.0, 600.0))])).moving);
    }
}
