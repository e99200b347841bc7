//! Process-wide log installation for the `patchreg` binaries.
//!
//! Library code only emits through the `log` macros. A binary picks one
//! backend at startup: [`install_stderr_logger`] for plain `[elapsed LEVEL
//! target] message` lines, or [`init_tracing`] (feature `tracing`) for a
//! `tracing-subscriber` pipeline that also records span timings.

use std::fmt;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};
use thiserror::Error;

#[cfg(feature = "tracing")]
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Installing a log backend failed because another one already owns the
/// global slot.
#[derive(Debug, Error)]
#[error("cannot install {backend} logger: {reason}")]
pub struct LoggerInitError {
    backend: &'static str,
    reason: String,
}

/// `-v` count to level: none shows warnings, each `v` opens one more level.
pub fn level_from_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

struct LineLogger {
    level: LevelFilter,
    origin: Instant,
}

/// One log line, without the trailing newline. Module paths are cut to
/// their last segment (`patchreg_align::pyramid` prints as `pyramid`).
struct Line<'a> {
    secs: f64,
    level: log::Level,
    target: &'a str,
    args: &'a fmt::Arguments<'a>,
}

impl fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let module = self.target.rsplit("::").next().unwrap_or(self.target);
        write!(
            f,
            "[{:8.3}s {:>5} {}] {}",
            self.secs, self.level, module, self.args
        )
    }
}

impl Log for LineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Line {
            secs: self.origin.elapsed().as_secs_f64(),
            level: record.level(),
            target: record.target(),
            args: record.args(),
        };
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LINE_LOGGER: OnceLock<LineLogger> = OnceLock::new();

/// Install the stderr line logger at `level`. Repeated calls keep the first
/// installation and succeed.
pub fn install_stderr_logger(level: LevelFilter) -> Result<(), LoggerInitError> {
    if LINE_LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LINE_LOGGER.get_or_init(|| LineLogger {
        level,
        origin: Instant::now(),
    });
    log::set_logger(logger).map_err(|e| LoggerInitError {
        backend: "stderr",
        reason: e.to_string(),
    })?;
    log::set_max_level(level);
    Ok(())
}

/// Install a `tracing-subscriber` pipeline. `RUST_LOG` wins when set,
/// otherwise `default_level` applies. `log` records are bridged through
/// the subscriber's `tracing-log` integration.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, default_level: LevelFilter) -> Result<(), LoggerInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(default_level)));
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_span_events(FmtSpan::CLOSE)
    });
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_timer(tracing_subscriber::fmt::time::Uptime::default())
            .with_span_events(FmtSpan::CLOSE)
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| LoggerInitError {
            backend: "tracing",
            reason: e.to_string(),
        })
}
