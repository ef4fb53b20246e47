//! Structural path queries over content.
//!
//! A path query walks a content tree by map keys and list positions and
//! applies a terminal predicate: existence, equality, or a regex match on
//! text. The textual form is a dot path with bracket steps, e.g.
//! `steps[*].name = "mix"` or `title ~= ^Re:`.

use std::fmt;

use regex::Regex;

use crate::content::Content;
use crate::error::ValidationError;

/// One navigation step in a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Descend into a map entry.
    Key(String),
    /// Descend into a list element by position.
    Index(usize),
    /// Try every element of a list; the query matches if any element does.
    AnyElement,
}

/// Terminal predicate applied at the end of the path.
#[derive(Debug, Clone)]
pub enum PathOp {
    /// The path merely has to resolve.
    Exists,
    /// The resolved node must equal this content.
    Equals(Content),
    /// The resolved node must be text matching this regex.
    Matches(Regex),
}

/// A parsed structural query.
#[derive(Debug, Clone)]
pub struct PathQuery {
    /// Navigation steps, applied in order.
    pub steps: Vec<PathStep>,
    /// Predicate at the resolved node.
    pub op: PathOp,
}

impl PathQuery {
    /// Parses the textual query form.
    ///
    /// Grammar: a dot-separated path where each segment is a map key
    /// optionally followed by bracket steps (`[3]` or `[*]`), then an
    /// optional predicate: `= value` (quotes optional) or `~= regex`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidPathQuery` for empty paths, bad
    /// bracket syntax, or an invalid regex.
    ///
    /// # Examples
    ///
    /// ```
    /// use noema::store::PathQuery;
    ///
    /// let q = PathQuery::parse(r#"steps[*].name = "mix""#).unwrap();
    /// assert_eq!(q.steps.len(), 3);
    /// ```
    pub fn parse(query: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidPathQuery {
            query: query.to_string(),
            reason: reason.to_string(),
        };

        let (path_part, op) = if let Some((path, rx)) = query.split_once("~=") {
            let regex = Regex::new(rx.trim())
                .map_err(|e| invalid(&format!("bad regex: {e}")))?;
            (path, PathOp::Matches(regex))
        } else if let Some((path, value)) = query.split_once('=') {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            (path, PathOp::Equals(Content::text(value)))
        } else {
            (query, PathOp::Exists)
        };

        let path_part = path_part.trim();
        if path_part.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut steps = Vec::new();
        for segment in path_part.split('.') {
            let segment = segment.trim();
            if segment.is_empty() {
                return Err(invalid("empty path segment"));
            }
            let (key, brackets) = match segment.find('[') {
                Some(pos) => (&segment[..pos], &segment[pos..]),
                None => (segment, ""),
            };
            if !key.is_empty() {
                steps.push(PathStep::Key(key.to_string()));
            }
            let mut rest = brackets;
            while !rest.is_empty() {
                let Some(end) = rest.find(']') else {
                    return Err(invalid("unterminated bracket"));
                };
                let inner = &rest[1..end];
                if inner == "*" {
                    steps.push(PathStep::AnyElement);
                } else {
                    let index: usize = inner
                        .parse()
                        .map_err(|_| invalid("bracket must hold an index or *"))?;
                    steps.push(PathStep::Index(index));
                }
                rest = &rest[end + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(invalid("unexpected text after bracket"));
                }
            }
        }
        if steps.is_empty() {
            return Err(invalid("empty path"));
        }

        Ok(Self { steps, op })
    }

    /// Returns true if the query matches the given content tree.
    #[must_use]
    pub fn matches(&self, content: &Content) -> bool {
        self.walk(content, 0)
    }

    fn walk(&self, node: &Content, depth: usize) -> bool {
        let Some(step) = self.steps.get(depth) else {
            return self.check(node);
        };
        match step {
            PathStep::Key(key) => node
                .get(key)
                .is_some_and(|child| self.walk(child, depth + 1)),
            PathStep::Index(index) => node
                .as_list()
                .and_then(|items| items.get(*index))
                .is_some_and(|child| self.walk(child, depth + 1)),
            PathStep::AnyElement => node
                .as_list()
                .is_some_and(|items| items.iter().any(|child| self.walk(child, depth + 1))),
        }
    }

    fn check(&self, node: &Content) -> bool {
        match &self.op {
            PathOp::Exists => true,
            PathOp::Equals(expected) => node == expected,
            PathOp::Matches(regex) => node.as_text().is_some_and(|s| regex.is_match(s)),
        }
    }
}

impl fmt::Display for PathQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for step in &self.steps {
            match step {
                PathStep::Key(key) => {
                    if !first {
                        write!(f, ".")?;
                    }
                    write!(f, "{key}")?;
                }
                PathStep::Index(index) => write!(f, "[{index}]")?,
                PathStep::AnyElement => write!(f, "[*]")?,
            }
            first = false;
        }
        match &self.op {
            PathOp::Exists => Ok(()),
            PathOp::Equals(value) => write!(f, " = {value}"),
            PathOp::Matches(regex) => write!(f, " ~= {}", regex.as_str()),
        }
    }
}
