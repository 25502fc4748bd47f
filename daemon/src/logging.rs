/// Logging setup.
///
/// Logs go to stdout at INFO+. Set `FOLEY_DEBUG=1` for debug output from this
/// crate; a `RUST_LOG` filter, when present, replaces both.
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

pub const DEBUG_VAR: &str = "FOLEY_DEBUG";

fn filter_directive(rust_log: Option<&str>, debug_logging: bool) -> String {
    match rust_log {
        Some(directive) if !directive.trim().is_empty() => directive.to_string(),
        _ if debug_logging => "info,foley_daemon=debug".to_string(),
        _ => "info".to_string(),
    }
}

/// Installs the global subscriber. Call once, before anything logs.
pub fn init() {
    let debug_logging = std::env::var(DEBUG_VAR).is_ok_and(|v| v == "1");
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(rust_log.as_deref(), debug_logging);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_span_events(FmtSpan::NONE);

    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("invalid log filter {directive:?}: {e}, using \"info\"");
        EnvFilter::new("info")
    });

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(filter)
        .init();

    tracing::info!(debug_logging, filter = %directive, "logging initialized");
}
