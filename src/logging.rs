//! Logging setup
//!
//! Levels follow the numeric codes callers pass in (0 = debug ... 4 = off).
//! `RUST_LOG` takes precedence when it is set.

use clap::ValueEnum;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Forces debug output when set to `YES`
pub const DEBUG_ENV: &str = "PODTUNNEL_DEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// Map a numeric level; anything above 3 turns logging off
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Off,
        }
    }

    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

fn debug_forced(value: Option<&str>) -> bool {
    value == Some("YES")
}

/// Effective level after the debug switch is applied
pub fn effective_level(level: LogLevel) -> LogLevel {
    let forced = std::env::var(DEBUG_ENV).ok();
    if debug_forced(forced.as_deref()) {
        LogLevel::Debug
    } else {
        level
    }
}

/// Install the global subscriber; later calls are ignored
pub fn init_logging(level: LogLevel) {
    let level = effective_level(level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.to_filter().into()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
