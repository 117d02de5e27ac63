/*!
 * Logging for transfer runs
 *
 * A run logs JSON lines to `<root>/logs/shardline.log` (or the file given
 * with `--log`). The file is appended to, so reruns against the same dataset
 * keep one history. Every event emitted inside a worker's `job` span carries
 * that span's `job`, `object` and `direction` fields.
 *
 * With a log file the terminal only gets warnings and errors, leaving it to
 * the progress bar. Without one everything at the configured level goes to
 * stderr.
 */

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::MakeWriterExt},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::EngineConfig;
use crate::error::{Result, ShardlineError};
use crate::layout::DatasetLayout;

pub const LOG_FILE_NAME: &str = "shardline.log";

/// `<root>/logs/shardline.log`
pub fn default_log_path(layout: &DatasetLayout) -> PathBuf {
    layout.log_dir().join(LOG_FILE_NAME)
}

/// Resolve the effective level, `verbose` forcing debug
pub fn effective_level(config: &EngineConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

/// Filter covering this crate and the throttle/backoff crate
pub fn filter_directives(level: Level) -> String {
    format!("shardline={},shardline_core_resilience={}", level, level)
}

/// Install the global subscriber; returns the log file in use, if any
///
/// `RUST_LOG` replaces the level-derived filter when set. A subscriber that
/// is already installed (tests, embedding applications) is left in place.
pub fn init_logging(config: &EngineConfig) -> Result<Option<PathBuf>> {
    let directives = filter_directives(effective_level(config));
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .map_err(|e| ShardlineError::Config(format!("bad log filter {:?}: {}", directives, e)))?;

    let Some(ref log_path) = config.log_file else {
        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .try_init()
            .ok();
        return Ok(None);
    };

    let file = open_log_file(log_path)?;
    let console = fmt::layer()
        .with_writer(std::io::stderr.with_max_level(Level::WARN))
        .with_target(false)
        .compact();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_file_layer(file))
        .with(console)
        .try_init()
        .ok();

    Ok(Some(log_path.clone()))
}

/// JSON lines with the enclosing job span flattened into `span`
fn json_file_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .with_current_span(true)
        .with_span_list(false)
}

fn open_log_file(log_path: &Path) -> Result<File> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                ShardlineError::Config(format!("cannot create log directory {}: {}", parent.display(), e))
            })?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| ShardlineError::Config(format!("cannot open log file {}: {}", log_path.display(), e)))
}

#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardline=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
