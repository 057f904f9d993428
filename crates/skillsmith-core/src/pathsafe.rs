//! Safe-Path Validator (C1): canonicalize and confine filesystem paths to
//! allowed roots before anything else touches the filesystem on their
//! behalf, as one standalone, order-sensitive contract rather than ad hoc
//! checks scattered across call sites.

use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_MAX_LENGTH: usize = 4096;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PathSafetyError {
    #[error("path is empty")]
    Empty,
    #[error("path exceeds maximum length")]
    TooLong,
    #[error("path contains a NUL or control character")]
    ControlCharacter,
    #[error("path segment is `..` or `...`")]
    TraversalSegment,
    #[error("resolved path still contains `..`")]
    UnresolvedTraversal,
    #[error("path escapes all allowed roots")]
    OutsideAllowedRoots,
    #[error("parent directory escapes all allowed roots")]
    ParentOutsideAllowedRoots,
}

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub allowed_roots: Vec<PathBuf>,
    pub temp_roots: Vec<PathBuf>,
    pub max_length: usize,
    /// Literal sentinel (e.g. `":memory:"`) accepted verbatim for in-memory
    /// stores, bypassing every filesystem-shaped rule below.
    pub in_memory_sentinel: Option<String>,
}

impl ValidateOptions {
    pub fn new(allowed_roots: Vec<PathBuf>) -> Self {
        Self {
            allowed_roots,
            temp_roots: Vec::new(),
            max_length: DEFAULT_MAX_LENGTH,
            in_memory_sentinel: None,
        }
    }

    pub fn with_temp_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.temp_roots = roots;
        self
    }

    pub fn with_in_memory_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.in_memory_sentinel = Some(sentinel.into());
        self
    }

    fn roots(&self) -> impl Iterator<Item = &PathBuf> {
        self.allowed_roots.iter().chain(self.temp_roots.iter())
    }
}

/// Non-throwing entry point: rules applied in the order spec.md §4.1 lists
/// them.
pub fn validate(input: &str, options: &ValidateOptions) -> Result<PathBuf, PathSafetyError> {
    if input.is_empty() {
        return Err(PathSafetyError::Empty);
    }
    if input.len() > options.max_length {
        return Err(PathSafetyError::TooLong);
    }
    if let Some(sentinel) = &options.in_memory_sentinel {
        if input == sentinel {
            return Ok(PathBuf::from(input));
        }
    }
    if input.chars().any(|c| (c as u32) <= 0x1F || c as u32 == 0x7F) {
        return Err(PathSafetyError::ControlCharacter);
    }
    if has_traversal_segment(input) {
        return Err(PathSafetyError::TraversalSegment);
    }

    let resolved = canonicalize(input, &options.allowed_roots)?;
    let resolved_str = resolved.to_string_lossy();
    if resolved_str.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(PathSafetyError::UnresolvedTraversal);
    }

    if !within_any_root(&resolved, options.roots()) {
        return Err(PathSafetyError::OutsideAllowedRoots);
    }
    let parent = resolved.parent().unwrap_or(&resolved);
    if !within_any_root(parent, options.roots()) {
        return Err(PathSafetyError::ParentOutsideAllowedRoots);
    }

    Ok(resolved)
}

/// Convenience wrapper that throws (returns `Err`) on failure, for call
/// sites that would otherwise immediately `?` the non-throwing result.
pub fn validate_or_throw(input: &str, options: &ValidateOptions) -> crate::errors::Result<PathBuf> {
    validate(input, options).map_err(crate::errors::CoreError::InvalidPath)
}

fn has_traversal_segment(input: &str) -> bool {
    input
        .split(['/', '\\'])
        .any(|seg| seg == ".." || seg == "...")
}

fn canonicalize(input: &str, allowed_roots: &[PathBuf]) -> Result<PathBuf, PathSafetyError> {
    let normalized = input.replace('\\', "/");
    let candidate = PathBuf::from(&normalized);
    let anchored = if candidate.is_absolute() {
        candidate
    } else {
        let root = allowed_roots
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("/"));
        root.join(candidate)
    };
    Ok(normalize_lexically(&anchored))
}

/// Lexical `.`/`..` resolution without touching the filesystem (no
/// `std::fs::canonicalize`, since the target need not exist yet).
fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn within_any_root<'a>(path: &Path, roots: impl Iterator<Item = &'a PathBuf>) -> bool {
    for root in roots {
        let root_str = root.to_string_lossy();
        let path_str = path.to_string_lossy();
        if path_str == root_str {
            return true;
        }
        let root_with_sep = if root_str.ends_with('/') {
            root_str.to_string()
        } else {
            format!("{root_str}/")
        };
        if path_str.starts_with(&root_with_sep) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ValidateOptions {
        ValidateOptions::new(vec![PathBuf::from("/data/skillsmith")])
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(validate("", &opts()), Err(PathSafetyError::Empty));
    }

    #[test]
    fn rejects_nul_byte() {
        let input = "skills/\0evil";
        assert_eq!(
            validate(input, &opts()),
            Err(PathSafetyError::ControlCharacter)
        );
    }

    #[test]
    fn rejects_traversal_segment_pre_normalization() {
        let input = "skills/../../etc/passwd";
        assert_eq!(
            validate(input, &opts()),
            Err(PathSafetyError::TraversalSegment)
        );
    }

    #[test]
    fn rejects_triple_dot_segment() {
        assert_eq!(
            validate("skills/.../secret", &opts()),
            Err(PathSafetyError::TraversalSegment)
        );
    }

    #[test]
    fn accepts_relative_path_under_root() {
        let resolved = validate("skills/react-testing", &opts()).unwrap();
        assert_eq!(resolved, PathBuf::from("/data/skillsmith/skills/react-testing"));
    }

    #[test]
    fn accepts_root_itself() {
        let resolved = validate("/data/skillsmith", &opts()).unwrap();
        assert_eq!(resolved, PathBuf::from("/data/skillsmith"));
    }

    #[test]
    fn rejects_absolute_path_outside_roots() {
        assert_eq!(
            validate("/etc/passwd", &opts()),
            Err(PathSafetyError::OutsideAllowedRoots)
        );
    }

    #[test]
    fn rejects_sibling_directory_sharing_a_prefix() {
        // "/data/skillsmith-evil" shares a string prefix with the root but is
        // not a separator-bounded descendant.
        assert_eq!(
            validate("/data/skillsmith-evil/x", &opts()),
            Err(PathSafetyError::OutsideAllowedRoots)
        );
    }

    #[test]
    fn in_memory_sentinel_bypasses_filesystem_rules() {
        let options = opts().with_in_memory_sentinel(":memory:");
        assert_eq!(
            validate(":memory:", &options).unwrap(),
            PathBuf::from(":memory:")
        );
    }

    #[test]
    fn temp_roots_are_accepted_alongside_allowed_roots() {
        let options = opts().with_temp_roots(vec![PathBuf::from("/tmp/skillsmith-test")]);
        let resolved = validate("/tmp/skillsmith-test/fixture.db", &options).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/skillsmith-test/fixture.db"));
    }

    proptest::proptest! {
        #[test]
        fn any_input_containing_dotdot_segment_is_rejected(
            prefix in "[a-z]{0,8}",
            suffix in "[a-z]{0,8}",
        ) {
            let input = format!("{prefix}/../{suffix}");
            proptest::prop_assert!(validate(&input, &opts()).is_err());
        }
    }
}
