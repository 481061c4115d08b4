//! Build logging.
//!
//! Events go to stdout and are appended to `<workspace>/kernjit_jit.log`,
//! one line each:
//!
//! ```text
//! 2026-10-19T08:12:44.120Z - INFO - kernjit.jit: Loading JIT ops: batch_decode_...
//! ```
//!
//! The filter is read from `KERNJIT_LOG` and defaults to `info`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::Result;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "KERNJIT_LOG";

/// Prefix added to messages emitted by this crate.
pub const LOG_PREFIX: &str = "kernjit.jit: ";

/// `<time> - <LEVEL> - <message>` line format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JitLogFormat;

impl<S, N> FormatEvent<S, N> for JitLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        SystemTime.format_time(&mut writer)?;
        let meta = event.metadata();
        write!(writer, " - {} - ", meta.level())?;
        if meta.target().starts_with("kernjit") {
            write!(writer, "{LOG_PREFIX}")?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_log(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Subscriber writing to `log_file` and, when `stdout` is set, to stdout.
///
/// Filtered by `KERNJIT_LOG`.
pub fn subscriber(log_file: File, stdout: bool) -> impl Subscriber + Send + Sync + 'static {
    subscriber_with_filter(log_file, stdout, env_filter())
}

/// Like [`subscriber`], with an explicit filter.
pub fn subscriber_with_filter(
    log_file: File,
    stdout: bool,
    filter: EnvFilter,
) -> impl Subscriber + Send + Sync + 'static {
    let stdout_layer = stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .event_format(JitLogFormat)
            .with_writer(std::io::stdout)
    });
    let file_layer = tracing_subscriber::fmt::layer()
        .event_format(JitLogFormat)
        .with_ansi(false)
        .with_writer(Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
}

/// Installs the global subscriber, creating the log file if needed.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case that subscriber is kept.
pub fn init_logging(log_path: &Path) -> Result<bool> {
    init_logging_with_filter(log_path, env_filter())
}

/// Like [`init_logging`], with an explicit filter.
pub fn init_logging_with_filter(log_path: &Path, filter: EnvFilter) -> Result<bool> {
    let file = open_log(log_path)?;
    Ok(subscriber_with_filter(file, true, filter)
        .try_init()
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_log_line_format() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kernjit_jit.log");
        let file = open_log(&path).unwrap();

        tracing::subscriber::with_default(subscriber(file, false), || {
            tracing::info!("Loading JIT ops: {}", "act_ops");
        });

        let content = fs::read_to_string(&path).unwrap();
        let line = content.lines().next().expect("one log line");
        assert!(
            line.ends_with(" - INFO - kernjit.jit: Loading JIT ops: act_ops"),
            "unexpected line: {line}"
        );
        assert!(line.as_bytes()[0].is_ascii_digit());
    }

    #[test]
    fn test_log_file_is_appended() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kernjit_jit.log");
        fs::write(&path, "previous run\n").unwrap();

        let file = open_log(&path).unwrap();
        tracing::subscriber::with_default(subscriber(file, false), || {
            tracing::warn!("second run");
        });

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("previous run\n"));
        assert!(content.contains(" - WARN - kernjit.jit: second run"));
    }

    #[test]
    fn test_explicit_filter_drops_lower_levels() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kernjit_jit.log");
        let file = open_log(&path).unwrap();

        let subscriber = subscriber_with_filter(file, false, EnvFilter::new("error"));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hidden");
            tracing::error!("shown");
        });

        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("hidden"));
        assert!(content.contains(" - ERROR - kernjit.jit: shown"));
    }
}
