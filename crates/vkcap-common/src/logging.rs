use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "VKCAP_LOG";

/// Subscriber configuration shared by both initializers.
fn subscriber() -> SubscriberBuilder<DefaultFields, Format, EnvFilter> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
}

/// Initialize structured logging with environment filter.
/// Set VKCAP_LOG=debug (or trace, info, warn, error) for verbosity control.
/// `vkcap::calls=trace` shows every intercepted call.
pub fn init_logging() {
    subscriber().init();
}

/// Like [`init_logging`], but safe to call more than once (tests, embedded use).
/// Returns false if a global subscriber was already installed.
pub fn try_init_logging() -> bool {
    subscriber().try_init().is_ok()
}
