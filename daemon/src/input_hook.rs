/// System-wide keyboard listener using a low-level Windows keyboard hook
/// (`WH_KEYBOARD_LL`).
///
/// The hook runs on a dedicated OS thread with its own message pump. Every
/// key-down is forwarded as [`DaemonEvent::KeyDown`]; the configured mute key is
/// forwarded as [`DaemonEvent::MuteToggled`] instead. The hook thread exits when
/// [`InputHook::stop`] is called.
///
/// On other platforms [`start`] returns [`SensorError::Unavailable`].
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use tokio::sync::mpsc;

use crate::error::SensorError;
use crate::event::DaemonEvent;

/// Virtual-key code of the mute key (0 = none).
/// Written by [`InputHook::set_mute_key`]; read inside the hook callback.
static MUTE_VK: AtomicU32 = AtomicU32::new(0);

/// Channel into the main event loop. Set once by [`start`].
static HOOK_TX: OnceLock<mpsc::Sender<DaemonEvent>> = OnceLock::new();

/// Converts a key name (e.g. `"F12"`, `"M"`, `"Pause"`) to a Windows
/// virtual-key code.
///
/// Supported keys:
/// - Function keys `F1`–`F12` (case-insensitive).
/// - `Pause` and `ScrollLock`.
/// - ASCII letters `A`–`Z` and digits `0`–`9`.
pub fn parse_vk(name: &str) -> Option<u32> {
    match name.to_uppercase().as_str() {
        "F1"  => Some(0x70),
        "F2"  => Some(0x71),
        "F3"  => Some(0x72),
        "F4"  => Some(0x73),
        "F5"  => Some(0x74),
        "F6"  => Some(0x75),
        "F7"  => Some(0x76),
        "F8"  => Some(0x77),
        "F9"  => Some(0x78),
        "F10" => Some(0x79),
        "F11" => Some(0x7A),
        "F12" => Some(0x7B),
        "PAUSE" => Some(0x13),
        "SCROLLLOCK" => Some(0x91),
        s if s.len() == 1 => {
            let c = s.chars().next()?;
            // Letters and digits map to their uppercase ASCII value.
            c.is_ascii_alphanumeric().then(|| c.to_ascii_uppercase() as u32)
        }
        _ => None,
    }
}

/// Classifies a key-down seen by the hook.
fn key_event(vk: u32, mute_vk: u32) -> DaemonEvent {
    if mute_vk != 0 && vk == mute_vk {
        DaemonEvent::MuteToggled
    } else {
        DaemonEvent::KeyDown(vk)
    }
}

// ── Public handle ─────────────────────────────────────────────────────────────

/// Handle to the running keyboard hook.
pub struct InputHook {
    #[cfg(windows)]
    thread: std::thread::JoinHandle<()>,
    /// Thread ID of the message-pump thread, used to post `WM_QUIT`.
    #[cfg(windows)]
    thread_id: u32,
}

impl InputHook {
    /// Changes the mute key. `None` or an unknown name disables it.
    pub fn set_mute_key(&self, name: Option<&str>) {
        MUTE_VK.store(name.and_then(parse_vk).unwrap_or(0), Ordering::Relaxed);
    }

    /// Signals the hook thread to stop and blocks until it exits.
    pub fn stop(self) {
        #[cfg(windows)]
        {
            imp::post_quit(self.thread_id);
            let _ = self.thread.join();
        }
    }
}

// ── Startup ───────────────────────────────────────────────────────────────────

/// Installs the keyboard hook on a dedicated OS thread.
///
/// Events go to `tx` through a non-blocking `try_send`; while the channel is
/// full, key presses are dropped.
pub fn start(mute_key: Option<&str>, tx: mpsc::Sender<DaemonEvent>) -> Result<InputHook, SensorError> {
    MUTE_VK.store(mute_key.and_then(parse_vk).unwrap_or(0), Ordering::Relaxed);
    if let Some(name) = mute_key {
        if parse_vk(name).is_none() {
            tracing::warn!(key = name, "unknown mute hotkey, mute toggle disabled");
        }
    }
    // Ignored if already set (test binaries).
    let _ = HOOK_TX.set(tx);

    #[cfg(windows)]
    {
        let (id_tx, id_rx) = std::sync::mpsc::sync_channel::<Result<u32, String>>(1);
        let thread = std::thread::Builder::new()
            .name("input-hook".into())
            .spawn(move || imp::run_message_pump(id_tx))
            .map_err(|e| SensorError::unavailable("input hook", e.to_string()))?;
        let thread_id = id_rx
            .recv()
            .map_err(|_| SensorError::unavailable("input hook", "hook thread exited early"))?
            .map_err(|reason| SensorError::unavailable("input hook", reason))?;
        Ok(InputHook { thread, thread_id })
    }

    #[cfg(not(windows))]
    Err(SensorError::unavailable("input hook", "not supported on this platform"))
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::sync::atomic::Ordering;
    use std::sync::mpsc as std_mpsc;

    use windows::Win32::Foundation::{HINSTANCE, LPARAM, LRESULT, WPARAM};
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::WindowsAndMessaging::{
        CallNextHookEx, DispatchMessageW, GetMessageW, PostThreadMessageW,
        SetWindowsHookExW, UnhookWindowsHookEx,
        KBDLLHOOKSTRUCT, MSG, WH_KEYBOARD_LL, WM_KEYDOWN, WM_QUIT, WM_SYSKEYDOWN,
    };

    use super::{key_event, HOOK_TX, MUTE_VK};

    /// Low-level keyboard hook procedure. Must return quickly; Windows drops
    /// hooks that stall the input queue.
    unsafe extern "system" fn keyboard_proc(
        n_code: i32,
        w_param: WPARAM,
        l_param: LPARAM,
    ) -> LRESULT {
        let message = w_param.0 as u32;
        if n_code >= 0 && (message == WM_KEYDOWN || message == WM_SYSKEYDOWN) {
            let kb = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
            if let Some(tx) = HOOK_TX.get() {
                let _ = tx.try_send(key_event(kb.vkCode, MUTE_VK.load(Ordering::Relaxed)));
            }
        }
        CallNextHookEx(None, n_code, w_param, l_param)
    }

    /// Installs `WH_KEYBOARD_LL`, reports the thread ID (or the install error)
    /// to `id_tx`, runs the message pump until `WM_QUIT`, then unhooks.
    pub fn run_message_pump(id_tx: std_mpsc::SyncSender<Result<u32, String>>) {
        unsafe {
            let hook = match SetWindowsHookExW(
                WH_KEYBOARD_LL,
                Some(keyboard_proc),
                HINSTANCE::default(),
                0,
            ) {
                Ok(hook) => hook,
                Err(e) => {
                    let _ = id_tx.send(Err(format!("SetWindowsHookExW failed: {e}")));
                    return;
                }
            };
            let _ = id_tx.send(Ok(GetCurrentThreadId()));
            drop(id_tx);

            let mut msg = MSG::default();
            // GetMessageW: >0 = message, 0 = WM_QUIT, <0 = error.
            while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
                DispatchMessageW(&msg);
            }

            let _ = UnhookWindowsHookEx(hook);
            tracing::info!("input hook thread exited");
        }
    }

    /// Posts `WM_QUIT` to `thread_id`, ending its `GetMessageW` loop.
    pub fn post_quit(thread_id: u32) {
        unsafe {
            let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
