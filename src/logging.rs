//! Process-wide log setup for the engine binary.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::config::AppConfig;

/// Per-block scan and poll chatter of the watchers
const WATCH_TARGET: &str = "bridge_transfer::transfer::watch";

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered log lines are lost.
///
/// `RUST_LOG`, when set, replaces the configured directives.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let appender = RollingFileAppender::new(
        rotation(&config.rotation),
        &config.log_dir,
        &config.log_file,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    // JSON keeps the target for structured queries
    let file_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.use_json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(filter)
            .boxed()
    };

    let stdout_layer = (!config.use_json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_ansi(true)
            .with_filter(EnvFilter::new(filter_directives(config)))
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    guard
}

fn rotation(name: &str) -> Rotation {
    match name {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

/// Engine modules log at `log_level`, dependencies stay at `warn`.
/// Without `enable_tracing` the watchers are capped at `info`.
fn filter_directives(config: &AppConfig) -> String {
    let mut directives = format!("warn,bridge_transfer={}", config.log_level);
    if !config.enable_tracing {
        directives.push_str(&format!(",{WATCH_TARGET}=info"));
    }
    directives
}
