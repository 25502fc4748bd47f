use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{info, warn};

use foley_daemon::config::{self, ResolvedConfig};
use foley_daemon::device::{self, DeviceQueue, RodioDevice};
use foley_daemon::dispatcher::Dispatcher;
use foley_daemon::engine::Engine;
use foley_daemon::error::{ConfigError, SensorError};
use foley_daemon::event::DaemonEvent;
use foley_daemon::launcher::{self, LaunchMode};
use foley_daemon::network_monitor::{InterfaceCounters, NetworkMonitor};
use foley_daemon::roles::RoleFilter;
use foley_daemon::throttle::ThrottleLedger;
use foley_daemon::{file_monitor, focus_monitor, input_hook, logging, paths, window_tracker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Launch mode ───────────────────────────────────────────────────────────
    let args: Vec<String> = std::env::args().skip(1).collect();
    let foreground = std::env::var(launcher::FOREGROUND_VAR).ok();
    if launcher::launch_mode(&args, foreground.as_deref()) == LaunchMode::Detach {
        let pid = launcher::spawn_detached()?;
        println!("foley-daemon started in background (PID {pid})");
        return Ok(());
    }

    logging::init();

    // ── Configuration ─────────────────────────────────────────────────────────
    // The per-user config directory must exist to be watched.
    if let Some(app_dir) = paths::user_app_dir() {
        if let Err(e) = std::fs::create_dir_all(&app_dir) {
            warn!(dir = %app_dir.display(), "failed to create config directory: {e}");
        }
    }

    let initial = match config::load() {
        Ok(config) => config,
        Err(e @ ConfigError::NotFound) => {
            warn!("{e}; no cues will play until a config file appears");
            ResolvedConfig::default()
        }
        Err(e) => {
            warn!("{e}; starting with empty sound tables");
            ResolvedConfig::default()
        }
    };
    let tuning = initial.tuning.clone();
    let roles = RoleFilter::from_env(std::env::vars());

    // ── Playback ──────────────────────────────────────────────────────────────
    let (device_queue, device_rx) = DeviceQueue::channel();
    let _device_thread =
        device::spawn_worker(RodioDevice::open, device_rx, tuning.oneshot_cleanup_margin())
            .context("failed to start the audio thread")?;

    let dispatcher = Arc::new(Dispatcher::new(
        initial.sounds.clone(),
        tuning.clone(),
        device_queue,
        Handle::current(),
        Arc::new(ThrottleLedger::new()),
    ));
    warn!(
        "{}",
        SensorError::unavailable("element inspector", "no accessibility hit-testing on this platform")
    );
    let engine = Arc::new(Engine::new(Arc::clone(&dispatcher), roles, None));

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(256);

    // ── Sensors ───────────────────────────────────────────────────────────────
    match window_tracker::platform_lister() {
        Ok(lister) => {
            tokio::spawn(window_tracker::run(
                lister,
                Arc::clone(&engine),
                Duration::from_millis(tuning.window_poll_ms),
            ));
        }
        Err(e) => warn!("{e}"),
    }

    let mut network = NetworkMonitor::new(
        Arc::clone(&engine),
        Duration::from_millis(tuning.network_poll_ms),
        InterfaceCounters::new,
    );

    match focus_monitor::platform_probe() {
        Ok(probe) => {
            tokio::spawn(focus_monitor::run(
                probe,
                event_tx.clone(),
                Duration::from_millis(tuning.foreground_poll_ms),
            ));
        }
        Err(e) => {
            warn!("{e}");
            // No foreground target to follow; sample system-wide from the start.
            network.retarget(0).await;
        }
    }

    {
        let engine = Arc::clone(&engine);
        let window = Duration::from_millis(tuning.fs_coalesce_ms);
        tokio::spawn(async move {
            if let Err(e) = file_monitor::run(paths::watched_user_dirs(), engine, window).await {
                warn!("{e}");
            }
        });
    }

    let hook = match input_hook::start(initial.mute_hotkey.as_deref(), event_tx.clone()) {
        Ok(hook) => Some(hook),
        Err(e) => {
            warn!("{e}");
            None
        }
    };

    tokio::spawn(config::watch_config(config::candidates(), event_tx.clone()));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    info!("foley-daemon v{} started", env!("CARGO_PKG_VERSION"));

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            DaemonEvent::KeyDown(code) => {
                engine.on_key_down(code);
            }

            DaemonEvent::MuteToggled => {
                let muted = engine.toggle_mute();
                info!(muted, "mute hotkey pressed");
            }

            DaemonEvent::TitleChanged(title) => {
                engine.on_title_changed(&title);
            }

            DaemonEvent::TargetChanged(pid) => {
                network.retarget(pid).await;
            }

            DaemonEvent::ConfigReloaded(config) => {
                match &config.source {
                    Some(path) => info!(path = %path.display(), "config reloaded"),
                    None => info!("config reloaded from environment only"),
                }
                if config.tuning != tuning {
                    warn!("tuning changes take effect after a restart");
                }
                dispatcher.configure(config.sounds);
                if let Some(hook) = &hook {
                    hook.set_mute_key(config.mute_hotkey.as_deref());
                }
            }

            DaemonEvent::Shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    engine.shutdown();
    network.stop().await;
    if let Some(hook) = hook {
        hook.stop();
    }
    Ok(())
}
