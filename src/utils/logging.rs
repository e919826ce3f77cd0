use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub const TIMING_TARGET: &str = "bot.timing";

/// Keeps the non-blocking writers flushing until dropped at the end of `main`.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

fn general_filter(level: LevelFilter) -> Targets {
    Targets::new()
        .with_default(level)
        .with_target(TIMING_TARGET, LevelFilter::OFF)
        .with_target("hyper", LevelFilter::WARN)
        .with_target("hyper_util", LevelFilter::WARN)
        .with_target("reqwest", LevelFilter::WARN)
        .with_target("teloxide::dispatching", LevelFilter::WARN)
}

fn timing_filter() -> Targets {
    Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target(TIMING_TARGET, LevelFilter::INFO)
}

fn daily_writer(logs_dir: &Path, file_name: &str, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let appender = tracing_appender::rolling::daily(logs_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);
    writer
}

/// Console plus daily-rolling files under `logs_dir`; `bot.timing` events go only to the timing files.
pub fn init_logging(log_level: &str, logs_dir: &Path) -> LoggingGuards {
    if let Err(err) = fs::create_dir_all(logs_dir) {
        eprintln!("Failed to create logs directory: {err}");
    }

    let mut guards = Vec::with_capacity(4);
    let general = general_filter(parse_log_level(log_level));
    let timing = timing_filter();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(general.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(daily_writer(logs_dir, "bot.log", &mut guards))
        .with_ansi(false)
        .with_filter(general.clone());
    let json_file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(daily_writer(logs_dir, "bot.jsonl", &mut guards))
        .with_filter(general);
    let timing_layer = tracing_subscriber::fmt::layer()
        .with_writer(daily_writer(logs_dir, "timing.log", &mut guards))
        .with_ansi(false)
        .with_filter(timing.clone());
    let json_timing_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(daily_writer(logs_dir, "timing.jsonl", &mut guards))
        .with_filter(timing);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(json_file_layer)
        .with(timing_layer)
        .with(json_timing_layer)
        .init();

    LoggingGuards { _guards: guards }
}
