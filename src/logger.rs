//! Logging setup for the nlp-adapter binaries.
//!
//! Library code only emits `tracing` events; installing a subscriber is left to
//! executables. These helpers install a formatter that prints
//! `[LEVEL YYYY-MM-DD HH:MM:SS target] message`, with `file:line` in place of the target
//! for DEBUG and TRACE events.

use tracing::Level;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, format::Writer};
use tracing_subscriber::registry::LookupSpan;

/// Install the subscriber with INFO as the default level.
///
/// The level can be overridden through `RUST_LOG`:
/// ```bash
/// RUST_LOG=nlp_adapter=debug cargo run --bin solve_example
/// ```
///
/// # Example
/// ```no_run
/// nlp_adapter::init_logger();
/// tracing::info!("solver started");
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the subscriber with a custom default level (`RUST_LOG` still wins).
///
/// Calling it twice is harmless: the second subscriber is ignored.
pub fn init_logger_with_level(default_level: Level) {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    // Fails only when a global subscriber is already installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(BracketFormatter)
        .try_init();
}

fn level_label(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[31mERROR\x1b[0m",
        Level::WARN => "\x1b[33mWARN\x1b[0m",
        Level::INFO => "\x1b[32mINFO\x1b[0m",
        Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
        Level::TRACE => "\x1b[35mTRACE\x1b[0m",
    }
}

struct BracketFormatter;

impl<S, N> FormatEvent<S, N> for BracketFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let level = metadata.level();
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");

        write!(writer, "[{} {} ", level_label(level), timestamp)?;

        let verbose = *level >= Level::DEBUG;
        match (verbose, metadata.file(), metadata.line()) {
            (true, Some(file), Some(line)) => {
                let file = file.rsplit(['/', '\\']).next().unwrap_or(file);
                write!(writer, "{}:{}", file, line)?;
            }
            _ => write!(writer, "{}", metadata.target())?,
        }
        write!(writer, "] ")?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
