use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

use tracing_appender::{
    non_blocking::{self, WorkerGuard},
    rolling::RollingFileAppender,
};
use tracing_subscriber::{
    filter::LevelFilter, fmt, prelude::*, reload, util::SubscriberInitExt, EnvFilter,
};

use crate::settings::app_support_dir;

const LOG_FILE: &str = "fetch.log";
const KEEP_LOGS: usize = 10;

static FILE_FILTER_HANDLE: OnceCell<FileFilterHandle> = OnceCell::new();
static _GUARD: OnceCell<WorkerGuard> = OnceCell::new(); // keep writer alive

fn log_dir() -> PathBuf {
    app_support_dir().join("logs")
}

fn file_filter(enabled: bool) -> EnvFilter {
    if enabled {
        EnvFilter::new("info")
    } else {
        EnvFilter::new("off")
    }
}

type FileFilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Console at INFO+ plus a daily rolling `file_name` in `dir`, whose filter
/// the returned handle switches. Logs reach the file until the guard drops.
fn build_subscriber(
    dir: &Path,
    file_name: &str,
    file_enabled: bool,
) -> (impl tracing::Subscriber + Send + Sync + 'static, FileFilterHandle, WorkerGuard) {
    let file_appender: RollingFileAppender = tracing_appender::rolling::daily(dir, file_name);
    let (nb_writer, guard): (non_blocking::NonBlocking, WorkerGuard) =
        tracing_appender::non_blocking(file_appender);

    let console = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_line_number(true)
        .with_thread_ids(false)
        .with_ansi(true);

    let file_layer = fmt::layer()
        .with_writer(nb_writer)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_line_number(true);

    let (reloadable_filter, handle) = reload::Layer::new(file_filter(file_enabled));

    // The reloadable layer must sit directly on the registry for its handle type.
    let subscriber = tracing_subscriber::registry()
        .with(file_layer.with_filter(reloadable_filter))
        .with(console.with_filter(LevelFilter::INFO));
    (subscriber, handle, guard)
}

/// Install the global subscriber and prune old log files. Later calls only
/// update the file filter.
pub fn init(file_enabled: bool) {
    if FILE_FILTER_HANDLE.get().is_some() {
        set_file_logging_enabled(file_enabled);
        return;
    }

    let dir = log_dir();
    let _ = std::fs::create_dir_all(&dir);
    let (subscriber, handle, guard) = build_subscriber(&dir, LOG_FILE, file_enabled);

    if let Err(e) = subscriber.try_init() {
        // Another subscriber owns the process (e.g. a host application).
        eprintln!("fetch-queue: logging not installed: {e}");
        return;
    }
    let _ = _GUARD.set(guard);
    let _ = FILE_FILTER_HANDLE.set(handle);

    prune_old_logs(&dir);
}

/// Enable/disable file logging after startup.
pub fn set_file_logging_enabled(enabled: bool) {
    if let Some(h) = FILE_FILTER_HANDLE.get() {
        let _ = h.modify(|f| *f = file_filter(enabled));
    }
}

/// Keep the newest rotated logs, delete the rest.
fn prune_old_logs(dir: &Path) {
    use std::fs;

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let mut files: Vec<_> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| e.file_name().to_string_lossy().starts_with(LOG_FILE))
        .collect();

    files.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok()); // oldest first

    if files.len() > KEEP_LOGS {
        let excess = files.len() - KEEP_LOGS;
        for e in files.iter().take(excess) {
            let _ = fs::remove_file(e.path());
        }
    }
}
