use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable that redirects debug logging to a file
pub const DEBUG_ENV: &str = "THUMBNAILER_DEBUG";

/// Directory holding the rolling debug log
pub fn log_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| std::env::var_os("LOCALAPPDATA").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("thumbnailer")
}

/// Initialize logging based on the THUMBNAILER_DEBUG environment variable
///
/// With the variable set everything down to DEBUG goes to a daily file under
/// [`log_dir`]; keep the returned guard alive so buffered lines get flushed.
/// Otherwise logs go to stderr, filtered by `RUST_LOG` (`thumbnailer=info`
/// or `thumbnailer=debug` with `verbose`).
pub fn init_logging(verbose: bool) -> Option<WorkerGuard> {
    if std::env::var_os(DEBUG_ENV).is_some() {
        let log_dir = log_dir();
        let _ = std::fs::create_dir_all(&log_dir);

        let file_appender = tracing_appender::rolling::daily(&log_dir, "thumbnailer.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .init();

        tracing::info!(dir = %log_dir.display(), "Thumbnailer debug logging initialized");
        Some(guard)
    } else {
        let default_filter = if verbose {
            "thumbnailer=debug"
        } else {
            "thumbnailer=info"
        };

        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
            )
            .init();
        None
    }
}
