//! Resource path handling
//!
//! Resource paths are opaque `/`-separated strings supplied by the caller.
//! The hierarchy is never materialized: a path's ancestors are found by
//! dropping trailing segments, and "under a prefix" is a segment-wise test.
//! No normalization (case, trailing slash, URL decoding) happens here.

use crate::error::{RbacError, Result};

/// The root of the resource hierarchy
pub const ROOT: &str = "/";

/// Maximum accepted path length for a stored ACE
pub const MAX_PATH_LEN: usize = 1024;

/// Validate a path before it is stored on an ACE.
///
/// # Examples
/// ```
/// use rbacd::rbac::path::validate_resource_path;
///
/// assert!(validate_resource_path("/").is_ok());
/// assert!(validate_resource_path("/projects/p1/nodes/n1").is_ok());
///
/// assert!(validate_resource_path("").is_err());
/// assert!(validate_resource_path("projects/p1").is_err());
/// ```
pub fn validate_resource_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(RbacError::invalid("path", "path cannot be empty"));
    }
    if !path.starts_with('/') {
        return Err(RbacError::invalid("path", "path must start with '/'"));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(RbacError::invalid(
            "path",
            format!("path must be {} characters or less", MAX_PATH_LEN),
        ));
    }
    if path.chars().any(char::is_control) {
        return Err(RbacError::invalid("path", "path contains control characters"));
    }
    Ok(())
}

/// Iterate a path's ancestor chain, most specific first, ending at `/`.
///
/// # Examples
/// ```
/// use rbacd::rbac::path::ancestors;
///
/// let chain: Vec<&str> = ancestors("/projects/p1/nodes").collect();
/// assert_eq!(chain, vec!["/projects/p1/nodes", "/projects/p1", "/projects", "/"]);
/// ```
pub fn ancestors(path: &str) -> Ancestors<'_> {
    Ancestors {
        next: Some(path),
        last: None,
    }
}

/// Iterator returned by [`ancestors`]
#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    next: Option<&'a str>,
    last: Option<&'a str>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            let current = self.next.take()?;
            self.next = current.rfind('/').map(|idx| &current[..idx]);

            let level = if current.is_empty() { ROOT } else { current };
            // "/" decomposes to itself twice
            if self.last == Some(level) {
                continue;
            }
            self.last = Some(level);
            return Some(level);
        }
    }
}

/// Whether `path` is `prefix` itself or lies below it segment-wise.
///
/// `/a/b` is under `/a`; `/ab` is not. A trailing `/` on the prefix is
/// ignored, and every rooted path is under `/`.
pub fn is_under(path: &str, prefix: &str) -> bool {
    let base = prefix.trim_end_matches('/');
    if base.is_empty() {
        return path.starts_with('/');
    }
    match path.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Split a purge prefix into the exact path and the `<prefix>/` string
/// that descendants start with.
pub(crate) fn subtree_bounds(prefix: &str) -> (String, String) {
    let base = prefix.trim_end_matches('/');
    if base.is_empty() {
        (ROOT.to_string(), ROOT.to_string())
    } else {
        (base.to_string(), format!("{}/", base))
    }
}
