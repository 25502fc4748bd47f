/// Detaching from the terminal.
///
/// A plain invocation re-spawns the binary with [`CHILD_FLAG`] and exits, so
/// the daemon keeps running after the shell closes. `FOLEY_FOREGROUND=1`
/// keeps it attached, which is what you want under a debugger.
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

pub const CHILD_FLAG: &str = "--child-daemon";
pub const FOREGROUND_VAR: &str = "FOLEY_FOREGROUND";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Run the daemon in this process.
    InPlace,
    /// Start a detached child and exit.
    Detach,
}

/// `args` excludes the program name.
pub fn launch_mode(args: &[String], foreground: Option<&str>) -> LaunchMode {
    if args.iter().any(|a| a == CHILD_FLAG) || foreground == Some("1") {
        LaunchMode::InPlace
    } else {
        LaunchMode::Detach
    }
}

/// Starts a detached copy of the current executable and returns its PID.
pub fn spawn_detached() -> Result<u32> {
    let exe = std::env::current_exe().context("cannot locate the running executable")?;
    let mut command = Command::new(&exe);
    command
        .arg(CHILD_FLAG)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let child = command
        .spawn()
        .with_context(|| format!("failed to start {}", exe.display()))?;
    Ok(child.id())
}
