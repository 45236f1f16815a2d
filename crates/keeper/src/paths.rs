//! Path algebra for `/`-delimited node paths.
//!
//! Pure string functions, no store access.

use ensemble_common::constants::ROOT_PATH;
use ensemble_common::{CoordError, Result};

/// Returns the parent of an absolute path.
///
/// Any path with at most two segments (`/`, `/a`) has the root as parent.
/// Trailing empty segments are ignored, so `/a/b/` has parent `/a`.
pub fn parent(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(CoordError::InvalidArgument(format!(
            "Path is not valid: {path}"
        )));
    }

    let mut segments: Vec<&str> = path.split('/').collect();
    while segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }

    if segments.len() <= 2 {
        return Ok(ROOT_PATH.to_string());
    }

    let mut out = String::with_capacity(path.len());
    for segment in &segments[1..segments.len() - 1] {
        out.push('/');
        out.push_str(segment);
    }
    Ok(out)
}

/// Checks that a path is absolute, non-empty and has no empty segments.
pub fn validate(path: &str) -> Result<()> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(CoordError::InvalidArgument(format!(
            "Path must be absolute: {path:?}"
        )));
    }
    if path == ROOT_PATH {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(CoordError::InvalidArgument(format!(
            "Path must not end with '/': {path}"
        )));
    }
    if path[1..].split('/').any(str::is_empty) {
        return Err(CoordError::InvalidArgument(format!(
            "Path contains an empty segment: {path}"
        )));
    }
    Ok(())
}

/// Joins a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Last segment of a path, empty for the root.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

/// Strict ancestors of a path below the root, shallowest first.
///
/// `/a/b/c` yields `["/a", "/a/b"]`.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let trimmed = path.trim_start_matches('/');
    let mut segments = trimmed.split('/').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            break;
        }
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_of_shallow_paths_is_root() {
        assert_eq!(parent("/").unwrap(), "/");
        assert_eq!(parent("/a").unwrap(), "/");
        assert_eq!(parent("/fabric").unwrap(), "/");
        assert_eq!(parent("/a/").unwrap(), "/");
    }

    #[test]
    fn test_parent_strips_last_segment() {
        assert_eq!(parent("/a/b").unwrap(), "/a");
        assert_eq!(parent("/a/b/c").unwrap(), "/a/b");
        assert_eq!(parent("/a/b/c/").unwrap(), "/a/b");
    }

    #[test]
    fn test_parent_rejects_relative() {
        assert!(matches!(parent("a/b"), Err(CoordError::InvalidArgument(_))));
        assert!(matches!(parent(""), Err(CoordError::InvalidArgument(_))));
    }

    #[test]
    fn test_validate() {
        assert!(validate("/").is_ok());
        assert!(validate("/a/b").is_ok());
        assert!(validate("").is_err());
        assert!(validate("a").is_err());
        assert!(validate("/a/").is_err());
        assert!(validate("/a//b").is_err());
    }

    #[test]
    fn test_join_and_name() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(name("/a/b"), "b");
        assert_eq!(name("/"), "");
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("/a/b/c"), vec!["/a", "/a/b"]);
        assert!(ancestors("/a").is_empty());
        assert!(ancestors("/").is_empty());
    }
}
