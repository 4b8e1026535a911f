//! Topic predicates
//!
//! A sub-route applies to an entry when its predicate matches the topic of the
//! monitor that emitted it. Predicates are either wildcard patterns (`*` and
//! `?`) anchored on the whole topic, or plain regular expressions.

use crate::error::RouteError;
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::str::FromStr;

/// Regular expression options of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchOptions {
    pub ignore_case: bool,
    /// Accepted for compatibility; matching is always culture invariant
    pub culture_invariant: bool,
    pub multiline: bool,
    /// Accepted for compatibility; captures are never used
    pub explicit_capture: bool,
    pub singleline: bool,
    pub ignore_pattern_whitespace: bool,
}

impl MatchOptions {
    pub const NONE: MatchOptions = MatchOptions {
        ignore_case: false,
        culture_invariant: false,
        multiline: false,
        explicit_capture: false,
        singleline: false,
        ignore_pattern_whitespace: false,
    };

    fn names(&self) -> Vec<&'static str> {
        let flags = [
            (self.ignore_case, "IgnoreCase"),
            (self.culture_invariant, "CultureInvariant"),
            (self.multiline, "Multiline"),
            (self.explicit_capture, "ExplicitCapture"),
            (self.singleline, "Singleline"),
            (self.ignore_pattern_whitespace, "IgnorePatternWhitespace"),
        ];
        flags.iter().filter(|(on, _)| *on).map(|(_, n)| *n).collect()
    }
}

/// IgnoreCase, CultureInvariant, Multiline, ExplicitCapture
impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            ignore_case: true,
            culture_invariant: true,
            multiline: true,
            explicit_capture: true,
            ..Self::NONE
        }
    }
}

impl FromStr for MatchOptions {
    type Err = RouteError;

    /// Comma separated option names, case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = MatchOptions::NONE;
        for name in s.split(',').map(str::trim) {
            match name.to_ascii_lowercase().as_str() {
                "none" => {}
                "ignorecase" => options.ignore_case = true,
                "cultureinvariant" => options.culture_invariant = true,
                "multiline" => options.multiline = true,
                "explicitcapture" => options.explicit_capture = true,
                "singleline" => options.singleline = true,
                "ignorepatternwhitespace" => options.ignore_pattern_whitespace = true,
                _ => return Err(RouteError::InvalidMatchOption(name.to_string())),
            }
        }
        Ok(options)
    }
}

impl fmt::Display for MatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            f.write_str("None")
        } else {
            f.write_str(&names.join(", "))
        }
    }
}

/// How the pattern of a predicate is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    Wildcard,
    Regex,
}

/// Compiled topic predicate
#[derive(Debug, Clone)]
pub struct TopicPredicate {
    kind: PatternKind,
    pattern: String,
    options: MatchOptions,
    regex: Regex,
}

impl TopicPredicate {
    /// `*` matches any sequence, `?` any single character, the whole topic must match
    pub fn wildcard(pattern: &str, options: MatchOptions) -> Result<Self, RouteError> {
        let translated = format!(
            "^{}$",
            regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".")
        );
        Self::compile(PatternKind::Wildcard, pattern, &translated, options)
    }

    /// Used as-is: unanchored unless the expression anchors itself
    pub fn regex(pattern: &str, options: MatchOptions) -> Result<Self, RouteError> {
        Self::compile(PatternKind::Regex, pattern, pattern, options)
    }

    fn compile(
        kind: PatternKind,
        pattern: &str,
        expression: &str,
        options: MatchOptions,
    ) -> Result<Self, RouteError> {
        let regex = RegexBuilder::new(expression)
            .case_insensitive(options.ignore_case)
            .multi_line(options.multiline)
            .dot_matches_new_line(options.singleline)
            .ignore_whitespace(options.ignore_pattern_whitespace)
            .build()
            .map_err(|e| RouteError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            kind,
            pattern: pattern.to_string(),
            options,
            regex,
        })
    }

    pub fn is_match(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn options(&self) -> MatchOptions {
        self.options
    }
}

impl PartialEq for TopicPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.pattern == other.pattern && self.options == other.options
    }
}

impl fmt::Display for TopicPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PatternKind::Wildcard => write!(f, "TopicFilter=\"{}\"", self.pattern),
            PatternKind::Regex => write!(f, "TopicRegex=\"{}\"", self.pattern),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_default_options() {
        let p = TopicPredicate::wildcard("Foo*", MatchOptions::default()).unwrap();
        assert!(p.is_match("FooBar"));
        assert!(p.is_match("foobar"));
        assert!(p.is_match("Foo"));
        assert!(!p.is_match("BarFoo"));
    }

    #[test]
    fn test_wildcard_question_mark_and_escaping() {
        let p = TopicPredicate::wildcard("Sql.Q?ery", MatchOptions::default()).unwrap();
        assert!(p.is_match("sql.query"));
        assert!(!p.is_match("sqlXquery"));
        assert!(!p.is_match("Sql.Queery"));
    }

    #[test]
    fn test_wildcard_case_sensitive() {
        let p = TopicPredicate::wildcard("Foo*", MatchOptions::NONE).unwrap();
        assert!(p.is_match("FooBar"));
        assert!(!p.is_match("foobar"));
    }

    #[test]
    fn test_regex_is_not_translated() {
        let p = TopicPredicate::regex("Foo*", MatchOptions::NONE).unwrap();
        // `o*` semantics, unanchored
        assert!(p.is_match("Fo"));
        assert!(p.is_match("BarFooo"));
        assert!(!p.is_match("Bar"));

        let anchored = TopicPredicate::regex("^(Web|Sql)$", MatchOptions::default()).unwrap();
        assert!(anchored.is_match("sql"));
        assert!(!anchored.is_match("SqlServer"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = TopicPredicate::regex("(unclosed", MatchOptions::default()).unwrap_err();
        assert!(matches!(err, RouteError::InvalidPattern { .. }));
    }

    #[test]
    fn test_parse_match_options() {
        let opts: MatchOptions = "IgnoreCase, singleline".parse().unwrap();
        assert!(opts.ignore_case && opts.singleline);
        assert!(!opts.multiline);
        assert_eq!(opts.to_string(), "IgnoreCase, Singleline");

        assert_eq!("None".parse::<MatchOptions>().unwrap(), MatchOptions::NONE);
        assert!(matches!(
            "IgnoreCase, Compiled".parse::<MatchOptions>(),
            Err(RouteError::InvalidMatchOption(name)) if name == "Compiled"
        ));
        assert_eq!(
            MatchOptions::default().to_string(),
            "IgnoreCase, CultureInvariant, Multiline, ExplicitCapture"
        );
    }
}
