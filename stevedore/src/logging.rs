//! Logging setup.
//!
//! Structured logging via `tracing`: a compact stderr layer always, plus
//! an optional non-blocking file layer. Stdout is never written to —
//! worker processes use it for wire frames, and the CLI uses it for
//! payloads.
//!
//! Filtering is controlled by `RUST_LOG`, defaulting to `info`.

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keep this alive for as long as logging should flush.
///
/// Dropping the guard flushes and closes the file writer.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initializes the global subscriber.
///
/// With `log_dir` set, log lines are additionally appended to
/// `<log_dir>/stevedore.log`; the directory is created if needed.
///
/// # Errors
///
/// Returns an error when the log directory cannot be created.
pub fn init_logging(log_dir: Option<&Path>) -> io::Result<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(true)
        .compact();

    let (file_layer, file_guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, "stevedore.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
