//! Run log for shade.
//!
//! The CLI keeps stdout for plans and reports; dispatch decisions,
//! shadow-run verdicts, hydration applications, and provisioning retries
//! go to `~/.shade/shade.log`. Sessions are
//! appended with a marker line, so the log reads as a history of runs rather
//! than just the last one.
//!
//! Verbosity, most specific wins: `SHADE_LOG=<level>` picks an exact level;
//! otherwise `--debug` or `SHADE_DEBUG=1` selects `debug`, and the default
//! is `info`. At `info` a run logs roughly one line per task verdict and
//! hydration; `debug` adds per-dispatch and per-attempt detail; `trace` adds
//! workspace provisioning and teardown.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

static SINK: OnceLock<Mutex<File>> = OnceLock::new();
static LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Verbosity threshold for the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl Level {
    /// Fixed-width tag used in log lines.
    pub fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    /// Parse a level name as accepted by `SHADE_LOG`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "error" => Some(Level::Error),
            "warn" => Some(Level::Warn),
            "info" => Some(Level::Info),
            "debug" => Some(Level::Debug),
            "trace" => Some(Level::Trace),
            _ => None,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

/// Open the log sink and resolve the verbosity threshold.
///
/// `debug` is the CLI `--debug` flag; `SHADE_DEBUG=1` has the same effect
/// and `SHADE_LOG=<level>` overrides both. Failures to open the sink are
/// swallowed: a run must not die because its log file is unwritable.
pub fn init_with_debug(debug: bool) {
    let fallback = if debug || env_flag("SHADE_DEBUG") {
        Level::Debug
    } else {
        Level::Info
    };
    let level = std::env::var("SHADE_LOG")
        .ok()
        .and_then(|name| Level::from_name(&name))
        .unwrap_or(fallback);
    set_level(level);

    if let Some(shade_dir) = dirs::home_dir().map(|home| home.join(".shade")) {
        let _ = std::fs::create_dir_all(&shade_dir);
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(shade_dir.join("shade.log"))
        {
            let _ = writeln!(
                file,
                "==== shade session {} level={} ====",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                level.tag().trim_end()
            );
            let _ = SINK.set(Mutex::new(file));
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Set the verbosity threshold.
pub fn set_level(level: Level) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

/// The current verbosity threshold.
pub fn level() -> Level {
    Level::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Append one line to the run log if `at` clears the threshold.
pub fn write(at: Level, msg: &str) {
    if at > level() {
        return;
    }
    if let Some(sink) = SINK.get() {
        if let Ok(mut file) = sink.lock() {
            let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "{} {} {}", stamp, at.tag(), msg);
        }
    }
}

/// Log at INFO: one line per task verdict, hydration, or run milestone.
#[macro_export]
macro_rules! shlog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Info, &format!($($arg)*))
    };
}

/// Log at ERROR.
#[macro_export]
macro_rules! shlog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Error, &format!($($arg)*))
    };
}

/// Log at WARN.
#[macro_export]
macro_rules! shlog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Warn, &format!($($arg)*))
    };
}

/// Log at DEBUG: per-dispatch and per-attempt detail.
#[macro_export]
macro_rules! shlog_debug {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Debug, &format!($($arg)*))
    };
}

/// Log at TRACE: workspace provisioning and teardown.
#[macro_export]
macro_rules! shlog_trace {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Trace, &format!($($arg)*))
    };
}
