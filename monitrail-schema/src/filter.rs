//! Group/line filters

use crate::{LevelFilter, LogLevel, ParseError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A pair of level filters: one for groups, one for lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LogFilter {
    pub group: LevelFilter,
    pub line: LevelFilter,
}

impl LogFilter {
    pub const UNDEFINED: LogFilter = LogFilter::new(LevelFilter::None, LevelFilter::None);
    pub const DEBUG: LogFilter = LogFilter::new(LevelFilter::Trace, LevelFilter::Trace);
    pub const VERBOSE: LogFilter = LogFilter::new(LevelFilter::Trace, LevelFilter::Info);
    pub const MONITOR: LogFilter = LogFilter::new(LevelFilter::Trace, LevelFilter::Warn);
    pub const TERSE: LogFilter = LogFilter::new(LevelFilter::Info, LevelFilter::Error);
    pub const RELEASE: LogFilter = LogFilter::new(LevelFilter::Error, LevelFilter::Error);
    pub const OFF: LogFilter = LogFilter::new(LevelFilter::Off, LevelFilter::Off);

    const PRESETS: [(&'static str, LogFilter); 7] = [
        ("Undefined", LogFilter::UNDEFINED),
        ("Debug", LogFilter::DEBUG),
        ("Verbose", LogFilter::VERBOSE),
        ("Monitor", LogFilter::MONITOR),
        ("Terse", LogFilter::TERSE),
        ("Release", LogFilter::RELEASE),
        ("Off", LogFilter::OFF),
    ];

    pub const fn new(group: LevelFilter, line: LevelFilter) -> Self {
        Self { group, line }
    }

    /// Replace undefined components with the ones of `fallback`
    pub fn or(self, fallback: LogFilter) -> LogFilter {
        LogFilter {
            group: if self.group.is_defined() { self.group } else { fallback.group },
            line: if self.line.is_defined() { self.line } else { fallback.line },
        }
    }

    pub fn is_undefined(&self) -> bool {
        *self == LogFilter::UNDEFINED
    }

    pub fn accepts_line(&self, level: LogLevel) -> bool {
        self.line.accepts(level)
    }

    pub fn accepts_group(&self, level: LogLevel) -> bool {
        self.group.accepts(level)
    }
}

impl std::fmt::Display for LogFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match LogFilter::PRESETS.iter().find(|(_, p)| p == self) {
            Some((name, _)) => f.write_str(name),
            None => write!(f, "{{{},{}}}", self.group, self.line),
        }
    }
}

impl FromStr for LogFilter {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if let Some(inner) = text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
            let mut parts = inner.split(',');
            let (Some(group), Some(line), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(ParseError::InvalidFilter(s.to_string()));
            };
            let invalid = |_| ParseError::InvalidFilter(s.to_string());
            return Ok(LogFilter::new(
                group.parse().map_err(invalid)?,
                line.parse().map_err(invalid)?,
            ));
        }
        LogFilter::PRESETS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(text))
            .map(|(_, filter)| *filter)
            .ok_or_else(|| ParseError::InvalidFilter(s.to_string()))
    }
}

/// How a configured source-file filter map is applied to the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourceFilterApplyMode {
    /// Leave the current source filters untouched
    #[default]
    None,
    /// Merge: set the configured entries (an undefined filter removes the file)
    Apply,
    /// Clear every current source filter, then apply
    ClearThenApply,
}

impl FromStr for SourceFilterApplyMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(SourceFilterApplyMode::None),
            "apply" => Ok(SourceFilterApplyMode::Apply),
            "clearthenapply" => Ok(SourceFilterApplyMode::ClearThenApply),
            _ => Err(ParseError::InvalidApplyMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_presets() {
        assert_eq!("debug".parse::<LogFilter>().unwrap(), LogFilter::DEBUG);
        assert_eq!("Release".parse::<LogFilter>().unwrap(), LogFilter::RELEASE);
        assert!("Loud".parse::<LogFilter>().is_err());
    }

    #[test]
    fn test_parse_pair() {
        let f: LogFilter = "{Info, Off}".parse().unwrap();
        assert_eq!(f, LogFilter::new(LevelFilter::Info, LevelFilter::Off));
        assert!("{Info}".parse::<LogFilter>().is_err());
        assert!("{Info,Warn,Error}".parse::<LogFilter>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for f in [LogFilter::TERSE, LogFilter::new(LevelFilter::Warn, LevelFilter::Trace)] {
            assert_eq!(f.to_string().parse::<LogFilter>().unwrap(), f);
        }
        assert_eq!(LogFilter::MONITOR.to_string(), "Monitor");
    }

    #[test]
    fn test_or_fills_undefined_components() {
        let partial = LogFilter::new(LevelFilter::None, LevelFilter::Error);
        let resolved = partial.or(LogFilter::VERBOSE);
        assert_eq!(resolved, LogFilter::new(LevelFilter::Trace, LevelFilter::Error));
        assert!(resolved.accepts_line(LogLevel::Fatal));
        assert!(!resolved.accepts_line(LogLevel::Warn));
    }

    #[test]
    fn test_apply_mode_parse() {
        assert_eq!(
            "ClearThenApply".parse::<SourceFilterApplyMode>().unwrap(),
            SourceFilterApplyMode::ClearThenApply
        );
        assert!("Merge".parse::<SourceFilterApplyMode>().is_err());
    }
}
