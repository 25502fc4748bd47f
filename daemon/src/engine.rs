use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::config::Tuning;
use crate::dispatcher::Dispatcher;
use crate::event::names;
use crate::roles::{ElementInspector, HitTest, Point, RoleClass, RoleFilter, WindowControl};
use crate::throttle::TitleDebouncer;
use crate::window_tracker::WindowDeltas;

/// Ledger key shared by all content-change notifications.
const CONTENT_CHANGED_KEY: &str = "content_changed";

/// Turns raw sensor observations into cue requests.
///
/// Every handler is safe to call from any sensor thread or task; all shared
/// state lives behind the dispatcher's ledger and the title debouncer.
pub struct Engine {
    dispatcher: Arc<Dispatcher>,
    roles: RoleFilter,
    titles: TitleDebouncer,
    inspector: Option<Arc<dyn ElementInspector>>,
}

impl Engine {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        roles: RoleFilter,
        inspector: Option<Arc<dyn ElementInspector>>,
    ) -> Self {
        Self {
            dispatcher,
            roles,
            titles: TitleDebouncer::new(),
            inspector,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn tuning(&self) -> &Tuning {
        self.dispatcher.tuning()
    }

    // ── clicks ────────────────────────────────────────────────────────────────

    /// Hit-tests `point` and handles the result. The inspector may block, so
    /// input hooks should hand this off to a blocking task.
    pub fn on_click_at(&self, point: Point) -> Option<WindowControl> {
        let hit = self.inspector.as_ref()?.hit_test(point)?;
        self.on_click_hit(&hit)
    }

    /// Fires the window-control cue when the click landed on a close, minimise
    /// or zoom button. Other clicks are silent.
    pub fn on_click_hit(&self, hit: &HitTest) -> Option<WindowControl> {
        match self.roles.classify(hit) {
            RoleClass::WindowControl(control) => {
                debug!(?control, "window control clicked");
                self.dispatcher.fire_once(control.event_name());
                Some(control)
            }
            RoleClass::IgnoredContent | RoleClass::SignificantContent => None,
        }
    }

    // ── foreground app ────────────────────────────────────────────────────────

    pub fn on_title_changed(&self, title: &str) -> bool {
        self.on_title_changed_at(title, Instant::now())
    }

    /// A title dropped by the `app_activity` throttle or by mute is not
    /// remembered, so the same title is announced when it shows up again.
    pub fn on_title_changed_at(&self, title: &str, now: Instant) -> bool {
        self.titles.fire_if_new(title, now, self.tuning().ui_activity(), || {
            self.dispatcher.fire_once_at(names::APP_ACTIVITY, now)
        })
    }

    pub fn on_content_changed(&self, role: &str) -> bool {
        self.on_content_changed_at(role, Instant::now())
    }

    /// Content changes from ignored roles are dropped; the rest share one
    /// slower throttle before reaching `app_activity`.
    pub fn on_content_changed_at(&self, role: &str, now: Instant) -> bool {
        if self.roles.classify_content(role) == RoleClass::IgnoredContent {
            trace!(role, "content change ignored");
            return false;
        }
        let interval = self.tuning().content_change();
        if !self.dispatcher.ledger().should_fire(CONTENT_CHANGED_KEY, now, interval) {
            return false;
        }
        self.dispatcher.fire_once_at(names::APP_ACTIVITY, now)
    }

    // ── windows ───────────────────────────────────────────────────────────────

    pub fn on_window_created(&self) -> bool {
        self.dispatcher.fire_once(names::WINDOW_OPEN)
    }

    pub fn on_window_closed(&self) -> bool {
        self.dispatcher.fire_once(names::WINDOW_CLOSE)
    }

    /// Applies one poll tick. Drag and resize are reported every tick so the
    /// loops stop when the geometry settles.
    pub fn on_window_deltas(&self, deltas: &WindowDeltas) {
        if !deltas.closed.is_empty() {
            self.on_window_closed();
        }
        if !deltas.opened.is_empty() {
            self.on_window_created();
        }
        self.dispatcher.set_continuous(names::WINDOW_MOVE, deltas.moving);
        self.dispatcher.set_continuous(names::WINDOW_RESIZE, deltas.resizing);
    }

    // ── disk, network, keys ───────────────────────────────────────────────────

    pub fn on_disk_activity(&self, changes: usize) -> bool {
        if changes == 0 {
            return false;
        }
        trace!(changes, "disk activity");
        self.dispatcher.fire_once(names::DISK_WRITE)
    }

    /// `bytes_in` and `bytes_out` are deltas since the previous sample.
    pub fn on_network_sample(&self, bytes_in: u64, bytes_out: u64) -> bool {
        let threshold = self.tuning().network_threshold_bytes;
        if bytes_in <= threshold && bytes_out <= threshold {
            return false;
        }
        trace!(bytes_in, bytes_out, "network activity");
        self.dispatcher.fire_once(names::NETWORK_ACTIVITY)
    }

    pub fn on_key_down(&self, code: u32) -> bool {
        self.dispatcher.fire_key(code)
    }

    pub fn toggle_mute(&self) -> bool {
        self.dispatcher.toggle_mute()
    }

    /// Silences every loop before the process exits.
    pub fn shutdown(&self) {
        self.dispatcher.set_muted(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoundTables;
    use crate::continuous::PlaybackState;
    use crate::device::{DeviceCommand, DeviceQueue};
    use crate::roles::ElementInfo;
    use crate::throttle::ThrottleLedger;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::mpsc::Receiver;
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn tables() -> SoundTables {
        let mut sounds = SoundTables::default();
        for name in [
            names::WINDOW_CLOSE,
            names::WINDOW_OPEN,
            names::WINDOW_MIN,
            names::WINDOW_ZOOM,
            names::WINDOW_MOVE,
            names::WINDOW_RESIZE,
            names::APP_ACTIVITY,
            names::DISK_WRITE,
            names::NETWORK_ACTIVITY,
            names::KEY_DOWN,
        ] {
            sounds.events.insert(name.into(), PathBuf::from(format!("/s/{name}.wav")));
        }
        sounds
    }

    fn engine_with(inspector: Option<Arc<dyn ElementInspector>>) -> (Engine, Receiver<DeviceCommand>) {
        let (queue, rx) = DeviceQueue::channel();
        let dispatcher = Dispatcher::new(
            tables(),
            Tuning::default(),
            queue,
            Handle::current(),
            Arc::new(ThrottleLedger::new()),
        );
        let roles = RoleFilter::new(HashSet::from(["AXStaticText".to_string()]));
        (Engine::new(Arc::new(dispatcher), roles, inspector), rx)
    }

    fn engine() -> (Engine, Receiver<DeviceCommand>) {
        engine_with(None)
    }

    fn played(rx: &Receiver<DeviceCommand>) -> Vec<String> {
        rx.try_iter()
            .filter_map(|c| match c {
                DeviceCommand::Play { path, .. } => path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect()
    }

    fn button(subrole: &str) -> HitTest {
        HitTest {
            element: ElementInfo {
                role: "AXButton".into(),
                subrole: Some(subrole.into()),
                ..Default::default()
            },
            ancestors: Vec::new(),
        }
    }

    // ── clicks ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn click_on_close_button_fires_window_close() {
        let (engine, rx) = engine();
        assert_eq!(engine.on_click_hit(&button("AXCloseButton")), Some(WindowControl::Close));
        assert_eq!(played(&rx), vec!["window_close"]);
    }

    #[tokio::test]
    async fn click_on_plain_content_is_silent() {
        let (engine, rx) = engine();
        let hit = HitTest {
            element: ElementInfo { role: "AXTextArea".into(), ..Default::default() },
            ancestors: Vec::new(),
        };
        assert_eq!(engine.on_click_hit(&hit), None);
        assert!(played(&rx).is_empty());
    }

    struct FixedInspector(HitTest);

    impl ElementInspector for FixedInspector {
        fn hit_test(&self, _point: Point) -> Option<HitTest> {
            Some(self.0.clone())
        }
    }

    #[tokio::test]
    async fn click_at_point_goes_through_inspector() {
        let inspector: Arc<dyn ElementInspector> = Arc::new(FixedInspector(button("AXZoomButton")));
        let (engine, rx) = engine_with(Some(inspector));
        assert_eq!(engine.on_click_at(Point { x: 1.0, y: 2.0 }), Some(WindowControl::Zoom));
        assert_eq!(played(&rx), vec!["window_zoom"]);
    }

    #[tokio::test]
    async fn click_without_inspector_is_silent() {
        let (engine, rx) = engine();
        assert_eq!(engine.on_click_at(Point { x: 0.0, y: 0.0 }), None);
        assert!(played(&rx).is_empty());
    }

    // ── titles and content ────────────────────────────────────────────────────

    #[tokio::test]
    async fn title_changes_are_debounced() {
        let (engine, rx) = engine();
        let t0 = Instant::now();
        assert!(engine.on_title_changed_at("A", t0));
        assert!(!engine.on_title_changed_at("A", t0 + ms(50)));
        assert!(!engine.on_title_changed_at("B", t0 + ms(60)));
        assert!(engine.on_title_changed_at("B", t0 + ms(120)));
        assert_eq!(played(&rx), vec!["app_activity", "app_activity"]);
    }

    #[tokio::test]
    async fn title_blocked_by_content_cue_is_announced_on_resend() {
        let (engine, rx) = engine();
        let t0 = Instant::now();
        assert!(engine.on_content_changed_at("AXTable", t0));
        assert!(!engine.on_title_changed_at("B", t0 + ms(50)), "app_activity throttled");
        assert!(engine.on_title_changed_at("B", t0 + ms(300)));
        assert_eq!(played(&rx), vec!["app_activity", "app_activity"]);
    }

    #[tokio::test]
    async fn title_seen_while_muted_is_announced_after_unmute() {
        let (engine, rx) = engine();
        let t0 = Instant::now();
        engine.dispatcher().set_muted(true);
        assert!(!engine.on_title_changed_at("Inbox", t0));
        engine.dispatcher().set_muted(false);
        assert!(engine.on_title_changed_at("Inbox", t0 + ms(150)));
        assert_eq!(played(&rx), vec!["app_activity"]);
    }

    #[tokio::test]
    async fn content_change_from_ignored_role_is_dropped() {
        let (engine, rx) = engine();
        assert!(!engine.on_content_changed("AXStaticText"));
        assert!(!engine.on_content_changed("AXUnknown"));
        assert!(played(&rx).is_empty());
    }

    #[tokio::test]
    async fn content_changes_use_slower_throttle() {
        let (engine, rx) = engine();
        let t0 = Instant::now();
        assert!(engine.on_content_changed_at("AXTextArea", t0));
        assert!(!engine.on_content_changed_at("AXTable", t0 + ms(150)));
        assert!(engine.on_content_changed_at("AXTable", t0 + ms(250)));
        assert_eq!(played(&rx).len(), 2);
    }

    // ── windows ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn window_deltas_fire_open_close_and_loops() {
        let (engine, rx) = engine();
        engine.on_window_deltas(&WindowDeltas {
            closed: vec![1, 2],
            opened: vec![3],
            moving: true,
            resizing: false,
        });
        let sounds = played(&rx);
        assert_eq!(sounds, vec!["window_close", "window_open", "window_move"]);
        assert_eq!(
            engine.dispatcher().continuous_state(names::WINDOW_MOVE),
            PlaybackState::Playing
        );
        assert_eq!(
            engine.dispatcher().continuous_state(names::WINDOW_RESIZE),
            PlaybackState::Idle
        );
    }

    #[tokio::test(start_paused = true)]
    async fn settled_geometry_fades_loop() {
        let (engine, _rx) = engine();
        engine.on_window_deltas(&WindowDeltas { resizing: true, ..Default::default() });
        engine.on_window_deltas(&WindowDeltas::default());
        assert_eq!(
            engine.dispatcher().continuous_state(names::WINDOW_RESIZE),
            PlaybackState::Fading
        );
        tokio::time::sleep(ms(300)).await;
        assert_eq!(
            engine.dispatcher().continuous_state(names::WINDOW_RESIZE),
            PlaybackState::Idle
        );
    }

    // ── disk, network, keys ───────────────────────────────────────────────────

    #[tokio::test]
    async fn disk_activity_needs_changes() {
        let (engine, rx) = engine();
        assert!(!engine.on_disk_activity(0));
        assert!(engine.on_disk_activity(7));
        assert_eq!(played(&rx), vec!["disk_write"]);
    }

    #[tokio::test]
    async fn network_sample_must_exceed_threshold() {
        let (engine, rx) = engine();
        assert!(!engine.on_network_sample(1024, 0), "threshold is exclusive");
        assert!(engine.on_network_sample(0, 4096));
        assert_eq!(played(&rx), vec!["network_activity"]);
    }

    #[tokio::test]
    async fn key_down_falls_back_to_generic_sound() {
        let (engine, rx) = engine();
        assert!(engine.on_key_down(65));
        assert_eq!(played(&rx), vec!["key_down"]);
    }

    #[tokio::test]
    async fn shutdown_mutes_and_cuts_loops() {
        let (engine, _rx) = engine();
        engine.on_window_deltas(&WindowDeltas { moving: true, ..Default::default() });
        engine.shutdown();
        assert!(engine.dispatcher().is_muted());
        assert_eq!(
            engine.dispatcher().continuous_state(names::WINDOW_MOVE),
            PlaybackState::Idle
        );
        assert!(!engine.on_disk_activity(1));
    }
}
