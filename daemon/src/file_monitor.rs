use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Config as NotifyConfig, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::SensorError;

/// Only writes count; reads and metadata access do not.
fn is_write(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Groups events that arrive within `window` of the first one and calls
/// `on_batch` with the group size. Returns when the sender side closes.
pub async fn coalesce<T>(
    rx: &mut mpsc::Receiver<T>,
    window: Duration,
    mut on_batch: impl FnMut(usize),
) {
    while rx.recv().await.is_some() {
        let mut count = 1;
        let deadline = Instant::now() + window;
        while let Ok(Some(_)) = timeout_at(deadline, rx.recv()).await {
            count += 1;
        }
        on_batch(count);
    }
}

/// Recursively watches `dirs` and reports coalesced write bursts to the engine.
///
/// Directories that cannot be watched are skipped; fails only when none can.
pub async fn run(dirs: Vec<PathBuf>, engine: Arc<Engine>, window: Duration) -> Result<(), SensorError> {
    let (fs_tx, mut fs_rx) = mpsc::channel::<()>(256);

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if is_write(&event.kind) {
                    // A full channel already guarantees a pending batch.
                    let _ = fs_tx.try_send(());
                }
            }
        },
        NotifyConfig::default(),
    )
    .map_err(|e| SensorError::unavailable("filesystem monitor", e.to_string()))?;

    let mut watched = 0;
    for dir in &dirs {
        match watcher.watch(dir, RecursiveMode::Recursive) {
            Ok(()) => {
                info!(dir = %dir.display(), "watching for writes");
                watched += 1;
            }
            Err(e) => warn!(dir = %dir.display(), "cannot watch directory: {e}"),
        }
    }
    if watched == 0 {
        return Err(SensorError::unavailable("filesystem monitor", "no watchable directories"));
    }

    coalesce(&mut fs_rx, window, |count| {
        engine.on_disk_activity(count);
    })
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn writes_are_recognised() {
        assert!(is_write(&EventKind::Create(CreateKind::File)));
        assert!(is_write(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_write(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_write(&EventKind::Access(AccessKind::Any)));
        assert!(!is_write(&EventKind::Other));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_reported_once_with_count() {
        let (tx, mut rx) = mpsc::channel::<()>(16);
        for _ in 0..5 {
            tx.send(()).await.unwrap();
        }
        drop(tx);

        let mut batches = Vec::new();
        coalesce(&mut rx, Duration::from_millis(100), |n| batches.push(n)).await;
        assert_eq!(batches, vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn events_after_window_start_new_batch() {
        let (tx, mut rx) = mpsc::channel::<()>(16);
        let producer = tokio::spawn(async move {
            tx.send(()).await.unwrap();
            tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(250)).await;
            tx.send(()).await.unwrap();
        });

        let mut batches = Vec::new();
        coalesce(&mut rx, Duration::from_millis(100), |n| batches.push(n)).await;
        producer.await.unwrap();
        assert_eq!(batches, vec![2, 1]);
    }

    #[tokio::test]
    async fn missing_directories_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let (queue, _rx) = crate::device::DeviceQueue::channel();
        let dispatcher = crate::dispatcher::Dispatcher::new(
            Default::default(),
            Default::default(),
            queue,
            tokio::runtime::Handle::current(),
            Arc::new(crate::throttle::ThrottleLedger::new()),
        );
        let engine = Arc::new(Engine::new(
            Arc::new(dispatcher),
            crate::roles::RoleFilter::new(Default::default()),
            None,
        ));
        let result = run(vec![missing], engine, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(SensorError::Unavailable { .. })));
    }
}
