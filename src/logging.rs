//! Structured logging setup.
//!
//! Grounded in `inc/logger.h`'s four-level scheme (`MSG_ERROR`/`MSG_WARNING`/`MSG_INFO`/
//! `MSG_DEBUG`), carried forward as `tracing`'s `error!`/`warn!`/`info!`/`debug!` macros instead of
//! the original's `printf`-to-syslog helper. The teacher's own stack (`log`/`env_logger`) is
//! unmaintained relative to `tracing`, which the `wilsonzlin-aero` example repo in the pack uses
//! for the same "structured logs from a long-running supervisor process" shape this crate has.
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber from `filter` (an `EnvFilter` directive string, e.g.
/// `"info"` or `"qti_bridge=debug,tokio=warn"`).
pub fn init(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}
