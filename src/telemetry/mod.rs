//! Observability bootstrap.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

pub mod events;

/// Directory for the rolling JSON log file. Unset means console only.
pub const LOG_DIR_ENV: &str = "CALLSHIELD_LOG_DIR";

/// Installs the global subscriber. The returned guard must be held for the
/// lifetime of the process when file logging is enabled.
pub fn init_tracing() -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false);
    let registry = Registry::default().with(env_filter).with(fmt_layer);

    match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "callshield.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().json().with_writer(writer);
            tracing::subscriber::set_global_default(registry.with(file_layer))
                .expect("failed to set global subscriber");
            Some(guard)
        }
        None => {
            tracing::subscriber::set_global_default(registry)
                .expect("failed to set global subscriber");
            None
        }
    }
}
