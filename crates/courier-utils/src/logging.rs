/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Courier Logging Module
//!
//! Process-wide logger behind the `log` facade, shared by the broker and the agent.
//!
//! ## Usage
//!
//! 1. Initialize the logger once at start-up:
//!    ```
//!    courier_utils::logging::init_with_format("info", "json").expect("logger");
//!    ```
//!
//! 2. Use the macros from the prelude:
//!    ```
//!    use courier_utils::logging::prelude::*;
//!    info!("task {} claimed", 42);
//!    ```
//!
//! 3. Adjust the level at runtime if needed:
//!    ```
//!    courier_utils::logging::update_log_level("debug").expect("level");
//!    ```
//!
//! ## Log Levels
//!
//! "off", "error", "warn", "info" (default, also used for unknown strings), "debug", "trace".

use log::{LevelFilter, Metadata, Record, SetLoggerError};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub use log::{debug, error, info, trace, warn};

static LOGGER: CourierLogger = CourierLogger;
static CURRENT_LEVEL: AtomicUsize = AtomicUsize::new(LevelFilter::Info as usize);
static JSON_FORMAT: AtomicBool = AtomicBool::new(false);
static INIT: OnceCell<()> = OnceCell::new();

/// Logger writing one line per record to stderr, as text or JSON.
pub struct CourierLogger;

impl log::Log for CourierLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= level_filter_from_usize(CURRENT_LEVEL.load(Ordering::Relaxed))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if JSON_FORMAT.load(Ordering::Relaxed) {
            eprintln!("{}", json_line(record));
        } else {
            eprintln!(
                "{} - {} {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

fn json_line(record: &Record) -> serde_json::Value {
    serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "level": record.level().to_string().to_lowercase(),
        "target": record.target(),
        "message": format!("{}", record.args()),
        "module": record.module_path(),
        "file": record.file(),
        "line": record.line()
    })
}

/// Initializes the logger with a text format.
///
/// Calling it again only changes the level; the logger is installed once per process.
pub fn init(level: &str) -> Result<(), SetLoggerError> {
    init_with_format(level, "text")
}

/// Initializes the logger with the given level and format ("text" or "json").
pub fn init_with_format(level: &str, format: &str) -> Result<(), SetLoggerError> {
    let level_filter = str_to_level_filter(level);

    INIT.get_or_try_init(|| log::set_logger(&LOGGER))?;

    JSON_FORMAT.store(format.eq_ignore_ascii_case("json"), Ordering::Relaxed);
    CURRENT_LEVEL.store(level_filter as usize, Ordering::Relaxed);
    log::set_max_level(level_filter);
    Ok(())
}

/// Updates the current log level. Unknown strings fall back to "info".
pub fn update_log_level(level: &str) -> Result<(), String> {
    let new_level = str_to_level_filter(level);
    CURRENT_LEVEL.store(new_level as usize, Ordering::Relaxed);
    log::set_max_level(new_level);
    Ok(())
}

fn str_to_level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn level_filter_from_usize(v: usize) -> LevelFilter {
    match v {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5 => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

pub mod prelude {
    pub use log::{debug, error, info, trace, warn};
}
