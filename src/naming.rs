//! Deterministic names for derived targets.
//!
//! A target is named `pic-<namespace>-<source>-<fingerprint>` where the
//! fingerprint is the first 4 bytes of `SHA-256("<namespace>/<source>/<host>")`
//! in hex. The same triple always yields the same name, which is what lets
//! the reconciler find existing targets and orphans without extra state.

use sha2::{Digest, Sha256};

/// Prefix of every controller-managed object name.
pub const NAME_PREFIX: &str = "pic";

/// Maximum length of an object name.
pub const MAX_NAME_LENGTH: usize = 63;

/// Number of digest bytes kept in the fingerprint (8 hex characters).
const FINGERPRINT_BYTES: usize = 4;

/// Generates the name of the target for `host` in the given source route.
///
/// The result is lowercase alphanumerics and single hyphens, at most
/// [`MAX_NAME_LENGTH`] long. When too long, the source name segment is
/// shortened; the namespace and fingerprint are kept whole. If even the
/// namespace does not fit, the name collapses to `pic-<fingerprint>`.
pub fn generate_name(namespace: &str, source_name: &str, host: &str) -> String {
    let fingerprint = fingerprint(namespace, source_name, host);

    let name = sanitize_name(&format!(
        "{NAME_PREFIX}-{namespace}-{source_name}-{fingerprint}"
    ));
    if name.len() <= MAX_NAME_LENGTH {
        return name;
    }

    let scope = sanitize_name(namespace);
    let parent = sanitize_name(source_name);

    // "pic-<scope>-" and "-<fingerprint>"
    let prefix_len = NAME_PREFIX.len() + 1 + scope.len() + 1;
    let suffix_len = fingerprint.len() + 1;

    match MAX_NAME_LENGTH.checked_sub(prefix_len + suffix_len) {
        Some(available) if available > 0 => {
            let truncated = &parent[..available.min(parent.len())];
            sanitize_name(&format!(
                "{NAME_PREFIX}-{scope}-{truncated}-{fingerprint}"
            ))
        }
        _ => format!("{NAME_PREFIX}-{fingerprint}"),
    }
}

/// Hex fingerprint of the `(namespace, source, host)` triple.
pub fn fingerprint(namespace: &str, source_name: &str, host: &str) -> String {
    let digest = Sha256::digest(format!("{namespace}/{source_name}/{host}").as_bytes());
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

/// Maps `name` onto the object-name grammar.
///
/// Lowercases, replaces anything outside `[a-z0-9-]` with a hyphen,
/// collapses hyphen runs and strips leading/trailing hyphens.
pub fn sanitize_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && (result.is_empty() || result.ends_with('-')) {
            continue;
        }
        result.push(c);
    }
    while result.ends_with('-') {
        result.pop();
    }
    result
}
