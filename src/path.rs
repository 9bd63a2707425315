//! Field path algebra.
//!
//! Field paths are dot-delimited addresses into the document (`a.b.0.c`).
//! Two paths are related when one equals the other or extends it by whole
//! segments; a shared string prefix without a `.` boundary is not a relation.

/// Exact path equality.
#[must_use]
pub fn same_path(p: &str, q: &str) -> bool {
    p == q
}

/// Returns true if `descendant` extends `ancestor` by at least one segment.
#[must_use]
pub fn is_descendant(ancestor: &str, descendant: &str) -> bool {
    descendant.len() > ancestor.len()
        && descendant.starts_with(ancestor)
        && descendant.as_bytes()[ancestor.len()] == b'.'
}

/// Returns true if `p` and `q` are equal or one is an ancestor of the other.
#[must_use]
pub fn related(p: &str, q: &str) -> bool {
    same_path(p, q) || is_descendant(p, q) || is_descendant(q, p)
}

/// Returns true if `path` equals, contains, or is contained by any of `paths`.
///
/// Symmetric in direction: `["a.b"]` relates to both `a` and `a.b.c`.
#[must_use]
pub fn same_ancestor<S: AsRef<str>>(paths: &[S], path: &str) -> bool {
    paths.iter().any(|p| related(p.as_ref(), path))
}

/// Joins an optional parent path with a child segment.
#[must_use]
pub fn join(parent: Option<&str>, child: &str) -> String {
    match parent {
        Some(p) if !p.is_empty() => format!("{p}.{child}"),
        _ => child.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_path() {
        assert!(same_path("a.b", "a.b"));
        assert!(!same_path("a.b", "a.bc"));
    }

    #[test]
    fn test_same_ancestor_reflexive() {
        for p in ["a", "a.b", "x.0.y"] {
            assert!(same_ancestor(&[p], p));
        }
    }

    #[test]
    fn test_same_ancestor_both_directions() {
        assert!(same_ancestor(&["a.b"], "a.b.c"));
        assert!(same_ancestor(&["a.b.c"], "a.b"));
        assert!(!same_ancestor(&["a.b"], "a.c"));
    }

    #[test]
    fn test_same_ancestor_requires_segment_boundary() {
        assert!(!same_ancestor(&["a"], "ab"));
        assert!(!same_ancestor(&["ab"], "a"));
        assert!(!same_ancestor(&["a.b"], "a.bc"));
    }

    #[test]
    fn test_same_ancestor_any_of_many() {
        let paths = vec!["x".to_string(), "y.z".to_string()];
        assert!(same_ancestor(&paths, "y"));
        assert!(!same_ancestor(&paths, "w"));
        assert!(!same_ancestor::<String>(&[], "w"));
    }

    #[test]
    fn test_join() {
        assert_eq!(join(None, "a"), "a");
        assert_eq!(join(Some("a"), "b"), "a.b");
        assert_eq!(join(Some(""), "b"), "b");
    }
}
