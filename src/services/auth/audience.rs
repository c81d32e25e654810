use std::borrow::Cow;

use percent_encoding::percent_decode_str;

/// Resource identifier for a request path: the decoded path minus exactly one
/// leading `/`.
///
/// The whole remaining path is the identifier, so `/app-a/admin` maps to
/// `app-a/admin`, not `app-a`.
pub fn resource_id(path: &str) -> Cow<'_, str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    percent_decode_str(trimmed).decode_utf8_lossy()
}

/// Case-sensitive exact membership; no wildcard or prefix matching.
pub fn matches(audience: &[String], resource: &str) -> bool {
    audience.iter().any(|aud| aud == resource)
}
