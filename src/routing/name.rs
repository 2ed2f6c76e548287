//! Metric identifiers for route targets.
//!
//! An identifier is `service.host.path.address`, each component sanitized.
//! It is the external metrics key, so its format must never drift.

/// Make a string safe for use as one dot-separated metric component.
///
/// The empty string becomes `_`; `.` and `:` become `_`; the result is
/// lower-cased.
pub fn sanitize(s: &str) -> String {
    if s.is_empty() {
        return "_".to_string();
    }
    s.replace(['.', ':'], "_").to_lowercase()
}

/// Identifier of a single route target.
pub fn target_name(service: &str, host: &str, path: &str, address: &str) -> String {
    [service, host, path, address]
        .iter()
        .map(|part| sanitize(part))
        .collect::<Vec<_>>()
        .join(".")
}

/// Identifier of the timer for an HTTP response status.
pub fn status_name(code: u16) -> String {
    format!("http.status.{code}")
}
