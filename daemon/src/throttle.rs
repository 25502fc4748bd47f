use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Last-fired instants per throttle key.
///
/// `should_fire` holds the lock across read, decide and write, so when several
/// threads race on one key inside a window exactly one of them wins.
#[derive(Debug, Default)]
pub struct ThrottleLedger {
    last_fired: Mutex<HashMap<String, Instant>>,
}

impl ThrottleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and records `now` if `key` has not fired within
    /// `min_interval`; otherwise returns `false` and leaves the ledger alone.
    pub fn should_fire(&self, key: &str, now: Instant, min_interval: Duration) -> bool {
        let mut last_fired = match self.last_fired.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(last) = last_fired.get(key) {
            // saturating: a racing caller may carry a slightly older `now`.
            if now.saturating_duration_since(*last) < min_interval {
                return false;
            }
        }
        last_fired.insert(key.to_string(), now);
        true
    }
}

/// Suppresses repeated window titles.
///
/// A title equal to the last announced one is always dropped; a new title is
/// still subject to the interval. The stored title only advances when a cue is
/// actually fired, so a change dropped by the interval is announced when it
/// shows up again later.
#[derive(Debug, Default)]
pub struct TitleDebouncer {
    last: Mutex<Option<(String, Instant)>>,
}

impl TitleDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_fire(&self, title: &str, now: Instant, min_interval: Duration) -> bool {
        self.fire_if_new(title, now, min_interval, || true)
    }

    /// Runs `fire` when `title` passes the duplicate and interval checks, and
    /// records the title only if `fire` reports that a cue went out. The lock
    /// is held across `fire`, so concurrent titles cannot both pass.
    pub fn fire_if_new(
        &self,
        title: &str,
        now: Instant,
        min_interval: Duration,
        fire: impl FnOnce() -> bool,
    ) -> bool {
        if title.is_empty() {
            return false;
        }
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((last_title, last_at)) = last.as_ref() {
            if last_title == title {
                return false;
            }
            if now.saturating_duration_since(*last_at) < min_interval {
                return false;
            }
        }
        if !fire() {
            return false;
        }
        *last = Some((title.to_string(), now));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    const INTERVAL: Duration = Duration::from_millis(100);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // ── ThrottleLedger ────────────────────────────────────────────────────────

    #[test]
    fn burst_fires_first_and_after_interval() {
        let ledger = ThrottleLedger::new();
        let t0 = Instant::now();
        let fired: Vec<u64> = [0, 30, 60, 90, 150]
            .into_iter()
            .filter(|&t| ledger.should_fire("window_close", t0 + ms(t), INTERVAL))
            .collect();
        assert_eq!(fired, vec![0, 150]);
    }

    #[test]
    fn keys_are_independent() {
        let ledger = ThrottleLedger::new();
        let t0 = Instant::now();
        assert!(ledger.should_fire("key_1", t0, INTERVAL));
        assert!(ledger.should_fire("key_2", t0, INTERVAL));
        assert!(!ledger.should_fire("key_1", t0 + ms(10), INTERVAL));
    }

    #[test]
    fn exact_interval_boundary_fires() {
        let ledger = ThrottleLedger::new();
        let t0 = Instant::now();
        assert!(ledger.should_fire("k", t0, INTERVAL));
        assert!(ledger.should_fire("k", t0 + INTERVAL, INTERVAL));
    }

    #[test]
    fn suppressed_call_does_not_extend_window() {
        let ledger = ThrottleLedger::new();
        let t0 = Instant::now();
        assert!(ledger.should_fire("k", t0, INTERVAL));
        assert!(!ledger.should_fire("k", t0 + ms(90), INTERVAL));
        assert!(ledger.should_fire("k", t0 + ms(100), INTERVAL));
    }

    #[test]
    fn older_timestamp_than_recorded_is_suppressed() {
        let ledger = ThrottleLedger::new();
        let t0 = Instant::now();
        assert!(ledger.should_fire("k", t0 + ms(50), INTERVAL));
        assert!(!ledger.should_fire("k", t0, INTERVAL));
    }

    #[test]
    fn concurrent_callers_have_exactly_one_winner() {
        const CALLERS: usize = 16;
        let ledger = Arc::new(ThrottleLedger::new());
        let barrier = Arc::new(Barrier::new(CALLERS));
        let now = Instant::now();

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    ledger.should_fire("shared", now, INTERVAL)
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
    }

    // ── TitleDebouncer ────────────────────────────────────────────────────────

    #[test]
    fn duplicate_then_interval_then_resend() {
        let titles = TitleDebouncer::new();
        let t0 = Instant::now();
        assert!(titles.should_fire("A", t0, INTERVAL));
        assert!(!titles.should_fire("A", t0 + ms(50), INTERVAL), "duplicate");
        assert!(!titles.should_fire("B", t0 + ms(60), INTERVAL), "inside interval");
        assert!(titles.should_fire("B", t0 + ms(120), INTERVAL), "resent after interval");
    }

    #[test]
    fn identical_title_never_fires_even_much_later() {
        let titles = TitleDebouncer::new();
        let t0 = Instant::now();
        assert!(titles.should_fire("Inbox", t0, INTERVAL));
        assert!(!titles.should_fire("Inbox", t0 + Duration::from_secs(60), INTERVAL));
    }

    #[test]
    fn dropped_cue_does_not_record_title() {
        let titles = TitleDebouncer::new();
        let t0 = Instant::now();
        assert!(!titles.fire_if_new("B", t0, INTERVAL, || false));
        assert!(titles.fire_if_new("B", t0 + ms(200), INTERVAL, || true));
        assert!(!titles.fire_if_new("B", t0 + ms(400), INTERVAL, || true), "now a duplicate");
    }

    #[test]
    fn fire_is_not_called_for_duplicates() {
        let titles = TitleDebouncer::new();
        let t0 = Instant::now();
        assert!(titles.should_fire("A", t0, INTERVAL));
        let mut called = false;
        titles.fire_if_new("A", t0 + ms(500), INTERVAL, || {
            called = true;
            true
        });
        assert!(!called);
    }

    #[test]
    fn empty_title_is_ignored() {
        let titles = TitleDebouncer::new();
        assert!(!titles.should_fire("", Instant::now(), INTERVAL));
    }
}
