//! Client IP extraction with proxy-header validation.
//!
//! The `x-forwarded-for` chain is only trusted up to the configured number of
//! proxies; a spoofable leading entry is never taken at face value.

use axum::http::HeaderMap;
use std::net::IpAddr;

/// Extract the client IP from prioritized proxy headers, falling back to the
/// transport-level peer address. Returns `"unknown"` when nothing validates.
pub fn extract_client_ip(
    headers: &HeaderMap,
    peer_addr: Option<&std::net::SocketAddr>,
    trusted_proxy_count: usize,
) -> String {
    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(header_value) = forwarded_for.to_str() {
            let ip = extract_from_forwarded_for(header_value, trusted_proxy_count);
            if ip != "unknown" {
                return ip;
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(header_value) = real_ip.to_str() {
            let trimmed = header_value.trim();
            if is_valid_ip(trimmed) {
                return trimmed.to_string();
            }
        }
    }

    if let Some(addr) = peer_addr {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

/// The chain reads `client, proxy1, proxy2, ...`. With N trusted proxies at
/// the end, the client sits at position `len - N - 1`. With zero trusted
/// proxies the whole header is spoofable; use the last entry (closest hop).
fn extract_from_forwarded_for(header_value: &str, trusted_proxy_count: usize) -> String {
    let ips: Vec<&str> = header_value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    if ips.is_empty() {
        return "unknown".to_string();
    }

    if trusted_proxy_count == 0 || ips.len() <= trusted_proxy_count {
        let last_ip = ips.last().unwrap_or(&"");
        if is_valid_ip(last_ip) {
            return last_ip.to_string();
        }
        return "unknown".to_string();
    }

    let client_ip_pos = ips.len().saturating_sub(trusted_proxy_count + 1);
    let client_ip = ips.get(client_ip_pos).unwrap_or(&"");

    if is_valid_ip(client_ip) {
        return client_ip.to_string();
    }

    "unknown".to_string()
}

fn is_valid_ip(ip_str: &str) -> bool {
    ip_str.parse::<IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_xff(xff_value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(xff_value).unwrap());
        headers
    }

    #[test]
    fn single_ip_chain() {
        assert_eq!(extract_from_forwarded_for("192.168.1.1", 0), "192.168.1.1");
        assert_eq!(extract_from_forwarded_for("192.168.1.1", 1), "192.168.1.1");
    }

    #[test]
    fn one_trusted_proxy_takes_the_entry_before_it() {
        assert_eq!(
            extract_from_forwarded_for("203.0.113.7, 10.0.0.1", 1),
            "203.0.113.7"
        );
    }

    #[test]
    fn two_trusted_proxies() {
        assert_eq!(
            extract_from_forwarded_for("203.0.113.7, 10.0.0.1, 10.0.0.2", 2),
            "203.0.113.7"
        );
    }

    #[test]
    fn zero_trusted_proxies_uses_closest_hop() {
        assert_eq!(
            extract_from_forwarded_for("203.0.113.7, 10.0.0.1", 0),
            "10.0.0.1"
        );
    }

    #[test]
    fn garbage_header_is_unknown() {
        assert_eq!(extract_from_forwarded_for("not.an.ip.address", 0), "unknown");
    }

    #[test]
    fn real_ip_header_wins_over_missing_xff() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(extract_client_ip(&headers, None, 0), "203.0.113.9");
    }

    #[test]
    fn falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let peer = std::net::SocketAddr::from(([127, 0, 0, 1], 8080));
        assert_eq!(extract_client_ip(&headers, Some(&peer), 0), "127.0.0.1");
    }

    #[test]
    fn unknown_when_nothing_available() {
        assert_eq!(extract_client_ip(&HeaderMap::new(), None, 0), "unknown");
    }

    #[test]
    fn xff_spoof_ignored_when_invalid_then_real_ip_used() {
        let mut headers = headers_with_xff("999.999.999.999");
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(extract_client_ip(&headers, None, 1), "198.51.100.4");
    }
}
