//! Ignore rules read from `.blobpushignore`.
//!
//! One glob per line, `#` starts a comment (write `\#` for a literal hash), blank
//! lines are dropped. Patterns are matched case-sensitively against the full
//! path string of a candidate file, with `*` free to cross separators.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::OnceLock;

use glob::Pattern;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::UploadError;

/// Conventional ignore-file name, looked up in the working directory.
pub const IGNORE_FILE_NAME: &str = ".blobpushignore";

#[derive(Debug, Clone)]
struct IgnoreRule {
    raw: String,
    // `None` when the glob does not compile; such a rule never matches.
    pattern: Option<Pattern>,
}

impl IgnoreRule {
    fn new(raw: String) -> Self {
        let pattern = match Pattern::new(&raw) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(pattern = %raw, error = %e, "Ignore pattern is not a valid glob, it will never match");
                None
            }
        };
        Self { raw, pattern }
    }

    fn matches(&self, candidate: &str) -> bool {
        self.pattern
            .as_ref()
            .map(|p| p.matches(candidate))
            .unwrap_or(false)
    }
}

/// Compiled set of ignore globs. Immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRules {
    /// Loads `.blobpushignore` from `dir`. A missing file yields an empty rule set.
    pub fn load(dir: &Path) -> Result<Self, UploadError> {
        let path = dir.join(IGNORE_FILE_NAME);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No ignore file found");
                return Ok(Self::default());
            }
            Err(e) => return Err(UploadError::io(path, e)),
        };

        let rules = Self::parse(&content);
        debug!(path = %path.display(), rules = rules.len(), "Loaded ignore rules");
        Ok(rules)
    }

    /// Parses ignore-file content.
    pub fn parse(content: &str) -> Self {
        Self::from_patterns(content.lines().filter_map(strip_comment))
    }

    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rules: patterns
                .into_iter()
                .map(|p| IgnoreRule::new(p.into()))
                .collect(),
        }
    }

    /// Appends the rules of `other` after this set's rules.
    pub fn extend(&mut self, other: IgnoreRules) {
        self.rules.extend(other.rules);
    }

    /// Returns the first pattern matching `path`, if any.
    pub fn matching_pattern(&self, path: &Path) -> Option<&str> {
        let candidate = path.to_string_lossy();
        self.rules
            .iter()
            .find(|rule| rule.matches(&candidate))
            .map(|rule| rule.raw.as_str())
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.matching_pattern(path).is_some()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.raw.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn comment_regex() -> &'static Regex {
    static COMMENT: OnceLock<Regex> = OnceLock::new();
    // first `#` not preceded by a backslash, to end of line
    COMMENT.get_or_init(|| Regex::new(r"(^|[^\\])#.*$").expect("static regex"))
}

/// Strips the comment and surrounding whitespace; `None` for lines left empty.
fn strip_comment(line: &str) -> Option<String> {
    let without_comment = comment_regex().replace(line, "${1}");
    let pattern = without_comment.replace(r"\#", "#");
    let pattern = pattern.trim();
    if pattern.is_empty() {
        None
    } else {
        Some(pattern.to_string())
    }
}
