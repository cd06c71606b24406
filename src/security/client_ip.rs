//! Client identification for per-caller limits.

use std::net::SocketAddr;

use axum::http::HeaderMap;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Key used when no address information is available at all.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derive a stable per-caller key.
///
/// Order: first entry of `X-Forwarded-For`, then `X-Real-IP`, then the
/// transport peer IP, then [`UNKNOWN_CLIENT`]. Never fails.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("10.0.0.9:51234".parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_first_address_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        headers.insert(X_REAL_IP, HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_key(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_then_peer_then_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_key(&headers, peer()), "198.51.100.2");

        let empty = HeaderMap::new();
        assert_eq!(client_key(&empty, peer()), "10.0.0.9");
        assert_eq!(client_key(&empty, None), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_blank_headers_fall_through() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(" ,1.2.3.4"));
        headers.insert(X_REAL_IP, HeaderValue::from_static("  "));
        assert_eq!(client_key(&headers, None), UNKNOWN_CLIENT);
    }
}
