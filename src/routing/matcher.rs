//! Host and path matching.
//!
//! # Responsibilities
//! - Normalize host names from SNI, `Host` headers and configuration
//! - Match path prefixes
//!
//! # Design Decisions
//! - Host matching is case-insensitive, ignores a trailing dot and any port
//! - Path matching is case-sensitive
//! - Empty host = matches any host (fallback bucket)
//! - No regex, to keep matching O(n) in the number of routes

use axum::http::{header, Request};

/// Normalize a host for table keys and lookups.
///
/// Lower-cases, strips a `:port` suffix (keeping bracketed IPv6 literals
/// intact) and trims a trailing dot.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') && port.parse::<u16>().is_ok() => name,
            _ => host,
        }
    };
    without_port.trim_end_matches('.').to_lowercase()
}

/// The host a request is addressed to: the `Host` header, else the URI authority.
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(normalize_host)
        .or_else(|| req.uri().host().map(normalize_host))
}

/// True if `path` falls under the route prefix.
pub fn path_matches(prefix: &str, path: &str) -> bool {
    path.starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("EXAMPLE.COM"), "example.com");
        assert_eq!(normalize_host("example.com."), "example.com");
        assert_eq!(normalize_host("example.com:8080"), "example.com");
        assert_eq!(normalize_host("[::1]:443"), "[::1]");
        assert_eq!(normalize_host("::1"), "::1");
        assert_eq!(normalize_host(""), "");
    }

    #[test]
    fn test_request_host() {
        let req = Request::builder()
            .header("Host", "Example.com:80")
            .body(Body::default())
            .unwrap();
        assert_eq!(request_host(&req).as_deref(), Some("example.com"));

        let req = Request::builder()
            .uri("http://other.com/x")
            .body(Body::default())
            .unwrap();
        assert_eq!(request_host(&req).as_deref(), Some("other.com"));

        let req = Request::builder().uri("/x").body(Body::default()).unwrap();
        assert_eq!(request_host(&req), None);
    }

    #[test]
    fn test_path_matcher() {
        assert!(path_matches("/api", "/api/v1"));
        assert!(path_matches("/", "/images"));
        assert!(!path_matches("/api", "/images"));
        assert!(!path_matches("/API", "/api"));
    }
}
