//! `Authorization` header parsing.

const SCHEME: &str = "Bearer ";

/// Extract the token from a `Bearer <token>` header value.
///
/// Any other shape, including a missing header, yields an empty string,
/// which token validation rejects as missing.
pub fn extract_bearer(header: Option<&str>) -> &str {
    let Some(rest) = header.and_then(|h| h.strip_prefix(SCHEME)) else {
        return "";
    };
    let token = rest.trim();
    if token.chars().any(char::is_whitespace) {
        return "";
    }
    token
}
