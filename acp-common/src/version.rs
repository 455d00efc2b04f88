//! Semantic-version comparison for update detection.

use semver::Version;

/// Returns `true` iff `candidate` is strictly greater than `current` under
/// semantic-versioning precedence (major.minor.patch plus pre-release
/// rules).
///
/// Malformed input on either side is non-comparable and yields `false`, so
/// a broken catalog entry can never report a false update or crash a
/// refresh cycle.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (Version::parse(candidate.trim()), Version::parse(current.trim())) {
        (Ok(candidate), Ok(current)) => candidate > current,
        _ => false,
    }
}
