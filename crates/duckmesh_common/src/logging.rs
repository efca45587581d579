use std::io;

use tracing::Level;
use tracing_subscriber::{
    fmt::format::format,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// Held for the lifetime of the process to keep any non-blocking file writer
/// alive.
pub struct LoggingGuard {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Call at startup of the long-running `serve` process.
pub fn init_service() -> LoggingGuard {
    init(io::stdout, Level::INFO)
}

/// Call at startup of one-shot operator subcommands (`compact`, `gc`, ...).
pub fn init_tool() -> LoggingGuard {
    init(io::stderr, Level::ERROR)
}

fn init<W>(writer: W, default_level: Level) -> LoggingGuard
where
    W: Send + Sync + for<'w> tracing_subscriber::fmt::MakeWriter<'w> + 'static,
{
    let color_disabled = std::env::var("NO_COLOR").is_ok();
    let format_layer = tracing_subscriber::fmt::layer()
        .with_ansi(!color_disabled)
        .with_writer(writer);
    let format_layer = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => format_layer.event_format(format().json()).boxed(),
        Ok("pretty") => format_layer.event_format(format().pretty()).boxed(),
        _ => format_layer.event_format(format().compact()).boxed(),
    };
    let format_layer = format_layer
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.as_str())),
        )
        .boxed();

    tracing_subscriber::registry().with(format_layer).init();
    LoggingGuard { _guard: None }
}

/// Best-effort subscriber init for use in `#[tokio::test]`; ignores the
/// error raised when a subscriber is already installed.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}
