//! Constant-time bearer token matching for the WS/WSS upgrade gate (spec
//! §4.1: "upgrade is gated on `Authorization: Bearer <token>` matching
//! the tunnel's token (constant-time comparison)").

use subtle::ConstantTimeEq;

/// Parses `Authorization: Bearer <token>` out of a raw header value,
/// case-insensitive on the scheme, same as the teacher's bearer provider.
pub fn extract_bearer_token(header_value: &str) -> Option<&str> {
    let rest = header_value.get(..7).filter(|s| s.eq_ignore_ascii_case("bearer "))?;
    let _ = rest;
    let token = header_value[7..].trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Compares `provided` against `expected` in time independent of where
/// they first differ, so a timing side-channel can't be used to guess a
/// tunnel's token byte by byte.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
