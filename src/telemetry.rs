use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LogSettings};

const DEFAULT_FILTER: &str = "info,fee_portal=debug,tower_http=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Runs before [`crate::config::Config::from_env`] so config warnings are recorded.
/// With a log dir set, output is also written to a daily-rotated file; keep the
/// returned guard alive until shutdown so buffered lines get flushed.
pub fn init(settings: &LogSettings) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_writer, guard) = match settings.dir.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fee_portal.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (settings.format, file_writer) {
        (LogFormat::Json, Some(file)) => builder.json().with_writer(std::io::stdout.and(file)).init(),
        (LogFormat::Json, None) => builder.json().init(),
        (LogFormat::Pretty, Some(file)) => builder
            .with_ansi(false)
            .with_writer(std::io::stdout.and(file))
            .init(),
        (LogFormat::Pretty, None) => builder.init(),
    }

    guard
}
