//! Log levels and level filters

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// All levels, least severe first
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "Trace",
            LogLevel::Info => "Info",
            LogLevel::Warn => "Warn",
            LogLevel::Error => "Error",
            LogLevel::Fatal => "Fatal",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            _ => Err(ParseError::InvalidLevel(s.to_string())),
        }
    }
}

/// Minimal level accepted by a filter.
///
/// `None` means "not defined here": it accepts everything and is replaced by
/// the fallback when filters are combined with [`crate::LogFilter::or`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum LevelFilter {
    #[default]
    None,
    Trace,
    Info,
    Warn,
    Error,
    Fatal,
    Off,
}

impl LevelFilter {
    /// Whether an entry of `level` passes this filter
    pub fn accepts(self, level: LogLevel) -> bool {
        match self {
            LevelFilter::None | LevelFilter::Trace => true,
            LevelFilter::Info => level >= LogLevel::Info,
            LevelFilter::Warn => level >= LogLevel::Warn,
            LevelFilter::Error => level >= LogLevel::Error,
            LevelFilter::Fatal => level >= LogLevel::Fatal,
            LevelFilter::Off => false,
        }
    }

    pub fn is_defined(self) -> bool {
        self != LevelFilter::None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LevelFilter::None => "None",
            LevelFilter::Trace => "Trace",
            LevelFilter::Info => "Info",
            LevelFilter::Warn => "Warn",
            LevelFilter::Error => "Error",
            LevelFilter::Fatal => "Fatal",
            LevelFilter::Off => "Off",
        }
    }
}

impl std::fmt::Display for LevelFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LevelFilter {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "undefined" => Ok(LevelFilter::None),
            "off" => Ok(LevelFilter::Off),
            other => other
                .parse::<LogLevel>()
                .map(LevelFilter::from)
                .map_err(|_| ParseError::InvalidLevel(s.to_string())),
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Fatal => LevelFilter::Fatal,
        }
    }
}
