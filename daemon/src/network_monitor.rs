/// Network activity sampler.
///
/// Cumulative byte counters are read once per period and the difference from
/// the previous read is handed to the engine. The sampler follows the
/// foreground app: on every retarget the running sampler is cancelled and
/// awaited before a new one starts, so there is never more than one, and the
/// first read after a retarget is only a baseline.
use std::sync::Arc;
use std::time::Duration;

use sysinfo::Networks;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::engine::Engine;

/// Received/transmitted byte totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteCounters {
    pub received: u64,
    pub transmitted: u64,
}

/// Turns successive counter reads into deltas.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    previous: Option<ByteCounters>,
}

impl DeltaTracker {
    /// Returns `(in, out)` since the previous sample, or `None` for the
    /// baseline. Counters that went backwards (interface reset) count as zero.
    pub fn sample(&mut self, current: ByteCounters) -> Option<(u64, u64)> {
        let previous = self.previous.replace(current)?;
        Some((
            current.received.saturating_sub(previous.received),
            current.transmitted.saturating_sub(previous.transmitted),
        ))
    }
}

/// Source of cumulative byte counters.
pub trait CounterSource: Send + 'static {
    fn read(&mut self) -> ByteCounters;
}

/// System-wide totals over all interfaces.
pub struct InterfaceCounters {
    networks: Networks,
}

impl InterfaceCounters {
    pub fn new() -> Self {
        Self { networks: Networks::new_with_refreshed_list() }
    }
}

impl Default for InterfaceCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for InterfaceCounters {
    fn read(&mut self) -> ByteCounters {
        self.networks.refresh();
        self.networks
            .list()
            .values()
            .fold(ByteCounters::default(), |acc, data| ByteCounters {
                received: acc.received + data.total_received(),
                transmitted: acc.transmitted + data.total_transmitted(),
            })
    }
}

pub struct NetworkMonitor<S, F> {
    engine: Arc<Engine>,
    period: Duration,
    make_source: F,
    current: Option<(u32, JoinHandle<()>)>,
    _source: std::marker::PhantomData<fn() -> S>,
}

impl<S, F> NetworkMonitor<S, F>
where
    S: CounterSource,
    F: FnMut() -> S,
{
    pub fn new(engine: Arc<Engine>, period: Duration, make_source: F) -> Self {
        Self {
            engine,
            period,
            make_source,
            current: None,
            _source: std::marker::PhantomData,
        }
    }

    pub fn target(&self) -> Option<u32> {
        self.current.as_ref().map(|(pid, _)| *pid)
    }

    /// Starts sampling for `pid`. A no-op if it is already the target.
    pub async fn retarget(&mut self, pid: u32) {
        if self.target() == Some(pid) {
            return;
        }
        self.stop().await;

        debug!(pid, "network sampler retargeted");
        let source = (self.make_source)();
        let handle = tokio::spawn(sample_loop(source, Arc::clone(&self.engine), self.period));
        self.current = Some((pid, handle));
    }

    /// Cancels the running sampler and waits until it has exited.
    pub async fn stop(&mut self) {
        if let Some((_, handle)) = self.current.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

async fn sample_loop<S: CounterSource>(mut source: S, engine: Arc<Engine>, period: Duration) {
    let mut deltas = DeltaTracker::default();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if let Some((bytes_in, bytes_out)) = deltas.sample(source.read()) {
            engine.on_network_sample(bytes_in, bytes_out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SoundTables, Tuning};
    use crate::device::{DeviceCommand, DeviceQueue};
    use crate::dispatcher::Dispatcher;
    use crate::event::names;
    use crate::roles::RoleFilter;
    use crate::throttle::ThrottleLedger;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::mpsc::Receiver;
    use tokio::runtime::Handle;

    fn counters(received: u64, transmitted: u64) -> ByteCounters {
        ByteCounters { received, transmitted }
    }

    // ── DeltaTracker ──────────────────────────────────────────────────────────

    #[test]
    fn first_sample_is_baseline() {
        let mut tracker = DeltaTracker::default();
        assert_eq!(tracker.sample(counters(1_000_000, 5_000)), None);
        assert_eq!(tracker.sample(counters(1_002_000, 5_100)), Some((2_000, 100)));
    }

    #[test]
    fn counter_reset_counts_as_zero() {
        let mut tracker = DeltaTracker::default();
        tracker.sample(counters(5_000, 5_000));
        assert_eq!(tracker.sample(counters(10, 6_000)), Some((0, 1_000)));
    }

    // ── NetworkMonitor ────────────────────────────────────────────────────────

    /// Counts up by `step` received bytes on every read.
    struct Ramp {
        total: u64,
        step: u64,
        reads: Arc<AtomicU64>,
    }

    impl CounterSource for Ramp {
        fn read(&mut self) -> ByteCounters {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.total += self.step;
            counters(self.total, 0)
        }
    }

    fn engine() -> (Arc<Engine>, Receiver<DeviceCommand>) {
        let (queue, rx) = DeviceQueue::channel();
        let mut sounds = SoundTables::default();
        sounds
            .events
            .insert(names::NETWORK_ACTIVITY.into(), PathBuf::from("/s/net.wav"));
        let dispatcher = Dispatcher::new(
            sounds,
            Tuning::default(),
            queue,
            Handle::current(),
            Arc::new(ThrottleLedger::new()),
        );
        let engine = Engine::new(Arc::new(dispatcher), RoleFilter::new(Default::default()), None);
        (Arc::new(engine), rx)
    }

    fn plays(rx: &Receiver<DeviceCommand>) -> usize {
        rx.try_iter()
            .filter(|c| matches!(c, DeviceCommand::Play { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn busy_link_fires_after_baseline() {
        let (engine, rx) = engine();
        let reads = Arc::new(AtomicU64::new(0));
        let r = Arc::clone(&reads);
        let mut monitor = NetworkMonitor::new(engine, Duration::from_secs(1), move || Ramp {
            total: 0,
            step: 4096,
            reads: Arc::clone(&r),
        });

        monitor.retarget(42).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(reads.load(Ordering::SeqCst), 1, "baseline read");
        assert_eq!(plays(&rx), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(plays(&rx), 1);
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_link_stays_silent() {
        let (engine, rx) = engine();
        let reads = Arc::new(AtomicU64::new(0));
        let r = Arc::clone(&reads);
        let mut monitor = NetworkMonitor::new(engine, Duration::from_secs(1), move || Ramp {
            total: 0,
            step: 512,
            reads: Arc::clone(&r),
        });

        monitor.retarget(42).await;
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(reads.load(Ordering::SeqCst) >= 3);
        assert_eq!(plays(&rx), 0);
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn retarget_replaces_sampler() {
        let (engine, _rx) = engine();
        let reads = Arc::new(AtomicU64::new(0));
        let r = Arc::clone(&reads);
        let mut monitor = NetworkMonitor::new(engine, Duration::from_secs(1), move || Ramp {
            total: 0,
            step: 0,
            reads: Arc::clone(&r),
        });

        monitor.retarget(1).await;
        monitor.retarget(1).await;
        assert_eq!(monitor.target(), Some(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(reads.load(Ordering::SeqCst), 1, "same pid keeps the sampler");

        monitor.retarget(2).await;
        assert_eq!(monitor.target(), Some(2));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(reads.load(Ordering::SeqCst), 2, "new baseline for new target");

        monitor.stop().await;
        assert_eq!(monitor.target(), None);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(reads.load(Ordering::SeqCst), 2, "stopped sampler reads nothing");
    }
}
