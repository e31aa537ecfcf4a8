//! Tracing setup: stderr plus a daily-rolling file under `~/.itch-bridge/logs`.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "itch-bridge.log";
const DEBUG_LOG_ENV: &str = "ITCH_BRIDGE_DEBUG_LOG";

/// Installs the global subscriber. The returned guard flushes the file writer
/// on drop and must live as long as the process.
pub fn init(logs_dir: Option<&Path>) -> Option<WorkerGuard> {
    let debug_enabled = std::env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let file_writer = logs_dir.and_then(|dir| match fs_err::create_dir_all(dir) {
        Ok(()) => Some(tracing_appender::non_blocking(
            tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX),
        )),
        Err(err) => {
            eprintln!("itch-bridge: file logging disabled: {}", err);
            None
        }
    });

    match file_writer {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
