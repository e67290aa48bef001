//! Node path helpers
//!
//! Paths are absolute, slash-separated and normalized before every lookup:
//! `"  ch1//traces/ "` and `"/ch1/traces"` name the same node.

/// Root group path
pub const ROOT: &str = "/";

/// Normalize a node path.
///
/// Trims whitespace, ensures a leading `/`, collapses repeated separators
/// and strips a trailing separator (except for the root). Empty or blank
/// input stays empty.
///
/// ```
/// use tracestore::path::normalize_path;
///
/// assert_eq!(normalize_path("//a//b/"), "/a/b");
/// assert_eq!(normalize_path("a/b"), "/a/b");
/// assert_eq!(normalize_path("///"), "/");
/// assert_eq!(normalize_path("   "), "");
/// ```
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(trimmed.len() + 1);
    for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }

    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Parent of a path. The root (and empty input) is its own parent.
///
/// ```
/// use tracestore::path::parent_path;
///
/// assert_eq!(parent_path("/ch1/traces"), "/ch1");
/// assert_eq!(parent_path("/ch1"), "/");
/// assert_eq!(parent_path("/"), "/");
/// ```
pub fn parent_path(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// Join a child name onto a base path and normalize the result.
pub fn join_path(base: &str, name: &str) -> String {
    normalize_path(&format!("{}/{}", base, name))
}

/// Non-empty segments of a path, root first.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Last segment of a normalized path (empty for the root).
pub fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

pub(crate) fn is_root(path: &str) -> bool {
    path == ROOT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize_path("//a//b/"), "/a/b");
        assert_eq!(normalize_path("/a/b"), "/a/b");
        assert_eq!(normalize_path("a"), "/a");
        assert_eq!(normalize_path("  /ch1/runs/  "), "/ch1/runs");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_normalize_idempotent() {
        let samples = ["", " ", "/", "//", "a", "a/", "/a//b///c/", " x/y ", "////q"];
        for p in samples {
            let once = normalize_path(p);
            assert_eq!(normalize_path(&once), once, "not idempotent for {:?}", p);
        }
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent_path("/a/b/c"), "/a/b");
        assert_eq!(parent_path("a"), "/");
        assert_eq!(parent_path(""), "/");
        assert_eq!(parent_path("//a//b//"), "/a");
    }

    #[test]
    fn test_join_and_split() {
        assert_eq!(join_path("/ch1", "runs"), "/ch1/runs");
        assert_eq!(join_path("/", "ch1"), "/ch1");
        assert_eq!(join_path("/ch1/", "/runs/"), "/ch1/runs");
        assert_eq!(split_path("/ch1/runs"), vec!["ch1", "runs"]);
        assert!(split_path("/").is_empty());
        assert_eq!(leaf_name("/ch1/runs"), "runs");
        assert_eq!(leaf_name("/"), "");
    }
}
