//! Webhook authentication
//!
//! - GitHub: `X-Hub-Signature-256: sha256=<hex hmac-sha256(secret, body)>`
//! - Generic: shared secret carried verbatim in a configurable header
//!
//! Both comparisons are constant-time.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::constants::{DEFAULT_SECRET_HEADER, GITHUB_SIGNATURE_HEADER};

type HmacSha256 = Hmac<Sha256>;

/// `sha256=<hex>` signature GitHub would send for `body`
pub fn sign_github_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify `X-Hub-Signature-256` against the raw body
pub fn verify_github_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> bool {
    let Some(provided) = headers
        .get(GITHUB_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    if !provided.starts_with("sha256=") {
        return false;
    }
    let expected = sign_github_payload(secret, body);
    !expected.is_empty() && constant_time_eq(provided.as_bytes(), expected.as_bytes())
}

/// Verify a shared-secret header (default `X-Webhook-Token`)
pub fn verify_token(headers: &HeaderMap, header_name: Option<&str>, secret: &str) -> bool {
    let name = header_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_SECRET_HEADER);
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|provided| constant_time_eq(provided.as_bytes(), secret.as_bytes()))
        .unwrap_or(false)
}

/// Constant-time comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
