//! Semantic versions for image pipeline components.
//!
//! The pipeline only accepts `major.minor.patch` with numeric parts.

/// Parse `major.minor.patch`, reading the leading integer of each part.
///
/// Missing or non-numeric parts are 0.
pub fn parse_semantic_version(version: &str) -> (u64, u64, u64) {
    let mut parts = version.split('.').map(leading_int);
    (
        parts.next().flatten().unwrap_or(0),
        parts.next().flatten().unwrap_or(0),
        parts.next().flatten().unwrap_or(0),
    )
}

pub fn format_semantic_version(major: u64, minor: u64, patch: u64) -> String {
    format!("{}.{}.{}", major, minor, patch)
}

/// Coerce an arbitrary version string into `x.y.z`.
///
/// Empty strings, `latest` and strings with no usable numbers become `1.0.0`;
/// a literal `0.0.0` is kept.
pub fn normalize_semantic_version(version: &str) -> String {
    if version.is_empty() || version.eq_ignore_ascii_case("latest") {
        return "1.0.0".to_string();
    }

    let (major, minor, patch) = parse_semantic_version(version);
    if (major, minor, patch) == (0, 0, 0) {
        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() < 3 || parts[0] != "0" {
            return "1.0.0".to_string();
        }
    }

    format_semantic_version(major, minor, patch)
}

fn leading_int(part: &str) -> Option<u64> {
    let digits: String =
        part.trim_start_matches('+').chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}
