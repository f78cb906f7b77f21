//! Dotted path patterns and field masks.

use std::fmt;

/// One parsed segment of a path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Matched verbatim (quoted segments, or segments without `*`).
    Literal(String),
    /// Unquoted segment containing `*` wildcards.
    Glob(String),
}

impl Segment {
    fn matches(&self, key: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == key,
            Self::Glob(pattern) => glob_match(pattern, key),
        }
    }
}

/// A segment as written, before wildcard interpretation.
struct RawSegment {
    text: String,
    quoted: bool,
}

fn split_raw(path: &str) -> Vec<RawSegment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            },
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            },
            '.' if !in_quotes => {
                segments.push(RawSegment {
                    text: std::mem::take(&mut current),
                    quoted,
                });
                quoted = false;
            },
            _ => current.push(c),
        }
    }

    if !current.is_empty() || quoted || !segments.is_empty() {
        segments.push(RawSegment {
            text: current,
            quoted,
        });
    }

    segments
}

/// Split a dotted path into its keys, honoring quoted segments.
///
/// `metadata.annotations."a.b/c"` yields `["metadata", "annotations", "a.b/c"]`.
/// An unterminated quote runs to the end of the input.
#[must_use]
pub fn split_path(path: &str) -> Vec<String> {
    split_raw(path).into_iter().map(|s| s.text).collect()
}

/// Join keys into a dotted path.
///
/// Keys that would not split back to themselves (empty, or containing `.`,
/// `"`, `\` or `*`) are quoted, with `"` and `\` escaped by a backslash.
#[must_use]
pub fn join_path<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| {
            let s = s.as_ref();
            if s.is_empty() || s.contains(['.', '"', '\\', '*']) {
                format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                s.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Wildcard match where `*` matches any run of characters.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            pi += 1;
            mark = ti;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// A single dotted path pattern such as `spec.template.spec.containers.*.image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pattern: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a pattern. Parsing never fails; malformed quoting is read leniently.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        let segments = split_raw(pattern)
            .into_iter()
            .map(|raw| {
                if !raw.quoted && raw.text.contains('*') {
                    Segment::Glob(raw.text)
                } else {
                    Segment::Literal(raw.text)
                }
            })
            .collect();
        Self {
            pattern: pattern.to_string(),
            segments,
        }
    }

    /// The pattern as originally written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the pattern has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether the pattern matches `path` exactly (same depth).
    #[must_use]
    pub fn matches<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.segments.len() == path.len() && self.matches_prefix(path)
    }

    /// Whether the pattern matches `path` or one of its ancestors.
    #[must_use]
    pub fn covers<S: AsRef<str>>(&self, path: &[S]) -> bool {
        !self.segments.is_empty()
            && self.segments.len() <= path.len()
            && self.matches_prefix(path)
    }

    fn matches_prefix<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.segments
            .iter()
            .zip(path)
            .all(|(segment, key)| segment.matches(key.as_ref()))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// An ordered set of path patterns removed from trees before comparison.
///
/// Masks compose by concatenation: a path covered by any contributing
/// pattern is masked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMask {
    paths: Vec<FieldPath>,
}

impl FieldMask {
    /// Build a mask from patterns. Empty patterns are ignored, since they
    /// would otherwise cover every path.
    pub fn new<I>(patterns: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut mask = Self::default();
        mask.extend(patterns);
        mask
    }

    /// Append one pattern.
    pub fn push(&mut self, pattern: &str) {
        let path = FieldPath::parse(pattern);
        if !path.is_empty() {
            self.paths.push(path);
        }
    }

    /// Append patterns in order.
    pub fn extend<I>(&mut self, patterns: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for pattern in patterns {
            self.push(pattern.as_ref());
        }
    }

    /// Builder form of [`FieldMask::push`].
    #[must_use]
    pub fn with(mut self, pattern: &str) -> Self {
        self.push(pattern);
        self
    }

    /// A new mask holding this mask's patterns followed by `other`'s.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        let mut paths = self.paths.clone();
        paths.extend(other.paths.iter().cloned());
        Self { paths }
    }

    /// Number of patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the mask has no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Iterate over the patterns.
    pub fn iter(&self) -> impl Iterator<Item = &FieldPath> {
        self.paths.iter()
    }

    /// The patterns as written.
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        self.paths.iter().map(|p| p.as_str().to_string()).collect()
    }

    /// Whether any pattern matches `path` exactly.
    #[must_use]
    pub fn matches<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.paths.iter().any(|p| p.matches(path))
    }

    /// Whether any pattern matches `path` or one of its ancestors.
    #[must_use]
    pub fn covers<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.paths.iter().any(|p| p.covers(path))
    }
}

impl<S: AsRef<str>> FromIterator<S> for FieldMask {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}
