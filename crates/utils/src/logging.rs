//! provides logging helpers

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

/// Env var naming a log file; when unset logs go to stderr.
pub const LOG_PATH_ENV_VAR: &str = "FLEX_LOG_PATH";

const DEFAULT_LOG_FILE: &str = "flex-device-plugin.log";

pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// build the formatting layer, either stderr or a daily rolling file at `log_path`
pub fn get_fmt_layer(log_path: Option<String>) -> (BoxedLayer, Option<WorkerGuard>) {
    let Some(log_path) = log_path else {
        return (stderr_layer(), None);
    };

    let path = Path::new(&log_path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);

    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)
    {
        Ok(appender) => {
            let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
            let fmt_layer = layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (fmt_layer, Some(file_guard))
        }
        Err(e) => {
            eprintln!("failed to create log file under {}: {e}", dir.display());
            (stderr_layer(), None)
        }
    }
}

fn stderr_layer() -> BoxedLayer {
    layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .boxed()
}

/// initiate the global tracing subscriber
///
/// The returned guard must be held for the lifetime of the process when logging to a file.
pub fn init() -> Option<WorkerGuard> {
    let log_path = env::var(LOG_PATH_ENV_VAR).ok();
    let (fmt_layer, guard) = get_fmt_layer(log_path);

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    registry().with(fmt_layer.with_filter(env_filter)).init();
    guard
}
