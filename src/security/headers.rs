//! Security headers for HTTP responses
//!
//! Every auth endpoint returns credentials or account data, so responses
//! are never cacheable and never framable.

use warp::http::HeaderValue;
use warp::reply::Response;

/// Strict Content Security Policy for API endpoints
const STRICT_CSP: &str = "default-src 'none'; frame-ancestors 'none';";

const PERMISSIONS_POLICY: &str = "geolocation=(), microphone=(), camera=(), payment=(), usb=(), magnetometer=(), gyroscope=(), accelerometer=()";

/// Add strict API security headers to a response
pub fn add_api_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();

    // Prevent clickjacking
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));

    // Prevent MIME type sniffing
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));

    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.insert("Content-Security-Policy", HeaderValue::from_static(STRICT_CSP));

    // Tokens must never be stored by intermediaries
    headers.insert(
        "Cache-Control",
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert("Pragma", HeaderValue::from_static("no-cache"));

    headers.insert("Permissions-Policy", HeaderValue::from_static(PERMISSIONS_POLICY));

    // Remove server information disclosure
    headers.remove("Server");

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::Reply;

    #[test]
    fn test_strict_csp_for_api() {
        assert!(STRICT_CSP.contains("default-src 'none'"));
        assert!(STRICT_CSP.contains("frame-ancestors 'none'"));
        assert!(!STRICT_CSP.contains("unsafe-inline"));
    }

    #[test]
    fn test_headers_applied() {
        let response = add_api_security_headers(warp::reply().into_response());
        let headers = response.headers();
        assert_eq!(headers.get("X-Frame-Options").unwrap(), "DENY");
        assert_eq!(
            headers.get("Cache-Control").unwrap(),
            "no-cache, no-store, must-revalidate"
        );
        assert!(headers.get("Server").is_none());
    }
}
