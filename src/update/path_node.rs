//! Field selector tokenization.
//!
//! An update selector such as `grades.$[g].scores.$[]` is split at each
//! array-filter placeholder into a chain of [`PathNode`]s:
//!
//! ```text
//! PathNode { parent: "grades", child: Some("g"), next:
//!   PathNode { parent: "scores", child: Some("$"), next: None } }
//! ```

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::UpdateError;

/// Child marker for the unnamed all-elements placeholder `$[]`.
pub const ALL_ELEMENTS: &str = "$";

/// One link of a tokenized selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    /// Dotted path before the placeholder (may be empty for a placeholder
    /// that directly follows another one).
    pub parent: String,
    /// Placeholder identifier; [`ALL_ELEMENTS`] for `$[]`, `None` at the end
    /// of the chain.
    pub child: Option<String>,
    /// Continuation after the placeholder.
    pub next: Option<Box<PathNode>>,
}

impl PathNode {
    /// A node with no placeholder.
    #[must_use]
    pub fn leaf(parent: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: None,
            next: None,
        }
    }

    /// Segments of the `parent` path.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        if self.parent.is_empty() {
            Vec::new()
        } else {
            self.parent.split('.').collect()
        }
    }

    /// Returns true if this chain contains no placeholder.
    #[must_use]
    pub fn is_plain(&self) -> bool {
        self.child.is_none()
    }
}

impl fmt::Display for PathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.parent)?;
        if let Some(child) = &self.child {
            if !self.parent.is_empty() {
                f.write_str(".")?;
            }
            if child == ALL_ELEMENTS {
                f.write_str("$[]")?;
            } else {
                write!(f, "$[{child}]")?;
            }
        }
        if let Some(next) = &self.next {
            write!(f, ".{next}")?;
        }
        Ok(())
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-zA-Z0-9]*$").expect("identifier pattern is valid"))
}

/// Returns true if `identifier` is a valid array-filter identifier.
#[must_use]
pub fn is_valid_identifier(identifier: &str) -> bool {
    identifier_pattern().is_match(identifier)
}

/// Splits a selector into a placeholder chain plus the named identifiers it
/// uses, in order of appearance.
pub fn tokenize_path(path: &str) -> Result<(PathNode, Vec<String>), UpdateError> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut identifiers = Vec::new();
    let node = tokenize_segments(path, &segments, &mut identifiers)?;
    if node.parent.is_empty() {
        return Err(UpdateError::InvalidArrayFilter {
            reason: format!("selector '{path}' must name a field before its first placeholder"),
        });
    }
    Ok((node, identifiers))
}

fn tokenize_segments(
    path: &str,
    segments: &[&str],
    identifiers: &mut Vec<String>,
) -> Result<PathNode, UpdateError> {
    let Some(pos) = segments.iter().position(|s| s.starts_with("$[")) else {
        return Ok(PathNode::leaf(segments.join(".")));
    };
    let placeholder = segments[pos];
    let identifier = placeholder
        .strip_prefix("$[")
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| UpdateError::InvalidIdentifier {
            identifier: placeholder.to_string(),
            path: path.to_string(),
        })?;

    let child = if identifier.is_empty() {
        ALL_ELEMENTS.to_string()
    } else {
        if !is_valid_identifier(identifier) {
            return Err(UpdateError::InvalidIdentifier {
                identifier: identifier.to_string(),
                path: path.to_string(),
            });
        }
        if !identifiers.iter().any(|i| i == identifier) {
            identifiers.push(identifier.to_string());
        }
        identifier.to_string()
    };

    let rest = &segments[pos + 1..];
    let next = if rest.is_empty() {
        None
    } else {
        Some(Box::new(tokenize_segments(path, rest, identifiers)?))
    };

    Ok(PathNode {
        parent: segments[..pos].join("."),
        child: Some(child),
        next,
    })
}
