//! Monitrail Log Entries
//!
//! This module defines the immutable log entry emitted by monitors and carried
//! through the routing and dispatch pipeline.

use monitrail_schema::{LogLevel, Timestamp};
use serde::Serialize;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

pub use monitrail_schema;

/// What an entry represents in the group structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryKind {
    /// A simple line
    Line,
    /// Opens a group: following entries are nested until the matching close
    OpenGroup,
    /// Closes the innermost open group; the text is the conclusion
    CloseGroup,
}

/// Sorted, de-duplicated set of string labels
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Tags(SmallVec<[String; 4]>);

impl Tags {
    /// Build a tag set from any list of labels (empty labels are ignored)
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tags: SmallVec<[String; 4]> = labels
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        tags.sort();
        tags.dedup();
        Self(tags)
    }

    /// Parse the `a|b|c` form
    pub fn parse(text: &str) -> Self {
        Self::new(text.split('|'))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.binary_search_by(|t| t.as_str().cmp(label)).is_ok()
    }

    /// Union of both sets
    pub fn union(&self, other: &Tags) -> Tags {
        Tags::new(self.0.iter().chain(other.0.iter()).cloned())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("|"))
    }
}

/// Captured error data: type name, message and the chain of inner errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionData {
    pub type_name: String,
    pub message: String,
    pub inner: Option<Box<ExceptionData>>,
}

impl ExceptionData {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            inner: None,
        }
    }

    /// Capture an error and its `source()` chain
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        let mut sources = Vec::new();
        let mut current = error.source();
        while let Some(source) = current {
            sources.push(source.to_string());
            current = source.source();
        }
        let inner = sources.into_iter().rev().fold(None, |inner, message| {
            Some(Box::new(ExceptionData {
                type_name: "source".to_string(),
                message,
                inner,
            }))
        });
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            inner,
        }
    }

    pub fn with_inner(mut self, inner: ExceptionData) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Number of errors in the chain, this one included
    pub fn depth(&self) -> usize {
        1 + self.inner.as_ref().map_or(0, |i| i.depth())
    }
}

/// Call site that produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }
}

impl From<&'static std::panic::Location<'static>> for SourceLocation {
    fn from(location: &'static std::panic::Location<'static>) -> Self {
        Self::new(location.file(), location.line())
    }
}

/// Represents a single log entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Collision-resistant emission time (orders entries of one monitor)
    pub timestamp: Timestamp,

    pub level: LogLevel,

    pub kind: EntryKind,

    /// Line text, group title or group conclusion
    pub text: String,

    pub tags: Tags,

    pub exception: Option<ExceptionData>,

    pub source: Option<SourceLocation>,

    /// Number of groups enclosing this entry
    pub group_depth: usize,

    /// Timestamp of the enclosing group's opening entry, used as its identifier
    pub parent: Option<Timestamp>,
}

impl LogEntry {
    /// Create an entry builder
    pub fn builder() -> LogEntryBuilder {
        LogEntryBuilder::default()
    }

    pub fn is_group_opening(&self) -> bool {
        self.kind == EntryKind::OpenGroup
    }

    pub fn is_group_closing(&self) -> bool {
        self.kind == EntryKind::CloseGroup
    }
}

/// Entries are ordered by timestamp; two different entries sharing a
/// timestamp are not comparable
impl PartialOrd for LogEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.timestamp.cmp(&other.timestamp) {
            Ordering::Equal if self != other => None,
            ord => Some(ord),
        }
    }
}

/// Builder for [`LogEntry`]
#[derive(Debug, Default)]
pub struct LogEntryBuilder {
    timestamp: Option<Timestamp>,
    level: Option<LogLevel>,
    kind: Option<EntryKind>,
    text: String,
    tags: Tags,
    exception: Option<ExceptionData>,
    source: Option<SourceLocation>,
    group_depth: usize,
    parent: Option<Timestamp>,
}

impl LogEntryBuilder {
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Defaults to [`EntryKind::Line`]
    pub fn kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = self.tags.union(&tags);
        self
    }

    pub fn tag(self, label: &str) -> Self {
        self.tags(Tags::new([label]))
    }

    pub fn exception(mut self, exception: ExceptionData) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Capture `error` (and its source chain) as the entry's exception
    pub fn error<E: std::error::Error + ?Sized>(self, error: &E) -> Self {
        self.exception(ExceptionData::from_error(error))
    }

    pub fn source(mut self, source: SourceLocation) -> Self {
        self.source = Some(source);
        self
    }

    pub fn group_depth(mut self, depth: usize) -> Self {
        self.group_depth = depth;
        self
    }

    pub fn parent(mut self, parent: Option<Timestamp>) -> Self {
        self.parent = parent;
        self
    }

    /// Level set so far, if any
    pub fn current_level(&self) -> Option<LogLevel> {
        self.level
    }

    /// Kind set so far ([`EntryKind::Line`] when unset)
    pub fn current_kind(&self) -> EntryKind {
        self.kind.unwrap_or(EntryKind::Line)
    }

    /// Build the entry
    pub fn build(self) -> Result<LogEntry, BuildError> {
        Ok(LogEntry {
            timestamp: self.timestamp.ok_or(BuildError::MissingField("timestamp"))?,
            level: self.level.ok_or(BuildError::MissingField("level"))?,
            kind: self.kind.unwrap_or(EntryKind::Line),
            text: self.text,
            tags: self.tags,
            exception: self.exception,
            source: self.source,
            group_depth: self.group_depth,
            parent: self.parent,
        })
    }
}

/// Error building an entry
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn stamp(secs: i64) -> Timestamp {
        Timestamp::new(Utc.timestamp_opt(secs, 0).unwrap(), 0)
    }

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "outer failure")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_entries_ordered_by_timestamp() {
        let line = |secs: i64, text: &str| {
            LogEntry::builder()
                .timestamp(stamp(secs))
                .level(LogLevel::Info)
                .text(text)
                .build()
                .unwrap()
        };
        let early = line(10, "b");
        let late = line(20, "a");
        assert!(early < late);
        assert_eq!(early.partial_cmp(&early.clone()), Some(Ordering::Equal));
        assert_eq!(early.partial_cmp(&line(10, "other")), None);

        let mut entries = vec![late.clone(), early.clone()];
        entries.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        assert_eq!(entries, vec![early, late]);
    }

    #[test]
    fn test_entry_builder() {
        let entry = LogEntry::builder()
            .timestamp(stamp(10))
            .level(LogLevel::Warn)
            .text("disk almost full")
            .tag("Disk")
            .tag("Ops")
            .source(SourceLocation::new("src/disk.rs", 12))
            .build()
            .unwrap();

        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.kind, EntryKind::Line);
        assert_eq!(entry.tags.to_string(), "Disk|Ops");
        assert_eq!(entry.source.unwrap().line, 12);
        assert_eq!(entry.group_depth, 0);
        assert!(entry.parent.is_none());
    }

    #[test]
    fn test_builder_missing_fields() {
        let err = LogEntry::builder().level(LogLevel::Info).build().unwrap_err();
        assert!(matches!(err, BuildError::MissingField("timestamp")));

        let err = LogEntry::builder().timestamp(stamp(1)).build().unwrap_err();
        assert!(matches!(err, BuildError::MissingField("level")));
    }

    #[test]
    fn test_tags_are_sorted_and_unique() {
        let tags = Tags::parse("Sql| Web |Sql||Audit");
        assert_eq!(tags.len(), 3);
        assert_eq!(tags.to_string(), "Audit|Sql|Web");
        assert!(tags.contains("Web"));
        assert!(!tags.contains("web"));

        let merged = tags.union(&Tags::new(["Zeta", "Audit"]));
        assert_eq!(merged.to_string(), "Audit|Sql|Web|Zeta");
    }

    #[test]
    fn test_exception_captures_source_chain() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::NotFound, "config.xml missing"));
        let data = ExceptionData::from_error(&err);

        assert_eq!(data.message, "outer failure");
        assert!(data.type_name.ends_with("Outer"));
        assert_eq!(data.depth(), 2);
        assert_eq!(data.inner.as_ref().unwrap().message, "config.xml missing");
    }

    #[test]
    fn test_entry_serializes_to_json() {
        let entry = LogEntry::builder()
            .timestamp(stamp(0))
            .level(LogLevel::Info)
            .kind(EntryKind::OpenGroup)
            .text("Startup")
            .build()
            .unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "Info");
        assert_eq!(json["kind"], "OpenGroup");
        assert_eq!(json["timestamp"], "1970-01-01 00h00.00.0000000");
    }
}
