//! Version string validation and comparison.

use crate::error::TalupError;

/// Returns true when `version` is `X.Y.Z` with an optional leading `v`.
pub fn is_valid(version: &str) -> bool {
    parse(version).is_ok()
}

/// Strip a single leading `v`, if present.
pub fn clean(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Parse a semantic version into its numeric components.
pub fn parse(version: &str) -> Result<(u64, u64, u64), TalupError> {
    let mut parts = clean(version).split('.');
    let (major, minor, patch) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(major), Some(minor), Some(patch), None) => (major, minor, patch),
        _ => return Err(TalupError::InvalidVersion(version.to_string())),
    };

    Ok((
        component(major, version)?,
        component(minor, version)?,
        component(patch, version)?,
    ))
}

/// Numeric downgrade check: true when `target` is lower than `current`.
/// Component-wise comparison, so "1.9.0" orders below "1.10.0".
pub fn is_downgrade(current: &str, target: &str) -> Result<bool, TalupError> {
    Ok(parse(target)? < parse(current)?)
}

fn component(part: &str, version: &str) -> Result<u64, TalupError> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TalupError::InvalidVersion(version.to_string()));
    }
    part.parse()
        .map_err(|_| TalupError::InvalidVersion(version.to_string()))
}
