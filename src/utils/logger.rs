// Logger initialization

use crate::config::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// Logs go to stderr; when `log_dir` is set they are also written to a daily
/// rolling file. Keep the returned guard alive until exit so the file writer flushes.
pub fn init_logger(config: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| "reflexion_agent=info".into());

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "reflexion.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}
