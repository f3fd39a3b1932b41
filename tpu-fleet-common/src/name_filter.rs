//! Managed-instance name filtering.
//!
//! A cloud project usually holds nodes we do not own, so the reconciler only
//! looks at nodes whose name matches one of the configured prefix patterns.
//!
//! Pattern rules:
//! - A pattern is a prefix: `v3spot` matches `v3spot-1`
//! - `*` matches any substring (including empty)
//! - A pattern containing `/` is matched against the full resource path
//!   (`projects/<p>/locations/<z>/nodes/<n>`), otherwise against the short name
//! - Case-sensitive, as node names are

pub fn is_managed(name: &str, resource_name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return false;
        }
        let target = if pattern.contains('/') {
            resource_name
        } else {
            name
        };
        prefix_glob_matches(target, pattern)
    })
}

/// Return true if `target` starts with something matching `pattern`.
fn prefix_glob_matches(target: &str, pattern: &str) -> bool {
    let mut parts = pattern.split('*');

    // First part is anchored at the start.
    let first = parts.next().unwrap_or("");
    if !target.starts_with(first) {
        return false;
    }
    let mut idx = first.len();

    // Remaining parts must appear in order; the tail is open-ended.
    for part in parts {
        if part.is_empty() {
            continue;
        }
        match target[idx..].find(part) {
            Some(pos) => idx += pos + part.len(),
            None => return false,
        }
    }

    true
}
