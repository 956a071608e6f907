use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex HMAC-SHA256 of `payload`.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    // HMAC takes keys of any length; the error branch is unreachable.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of two signatures.
pub fn signatures_match(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.trim().as_bytes();
    if expected.is_empty() || expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).unwrap_u8() == 1
}

/// `X-Razorpay-Signature`: hex HMAC of the raw body.
pub fn verify_razorpay(secret: &str, body: &[u8], signature: &str) -> bool {
    signatures_match(&hmac_sha256_hex(secret, body), signature)
}

pub fn razorpay_signature(secret: &str, body: &[u8]) -> String {
    hmac_sha256_hex(secret, body)
}

/// `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>]`, signed over `"<t>.<body>"`.
/// Any listed `v1` may match. Stale timestamps are rejected.
pub fn verify_stripe(secret: &str, body: &[u8], header: &str, tolerance_secs: i64, now: i64) -> bool {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if now.abs_diff(timestamp) > tolerance {
        return false;
    }

    let expected = hmac_sha256_hex(secret, &stripe_signed_payload(timestamp, body));
    candidates
        .into_iter()
        .fold(false, |found, candidate| signatures_match(&expected, candidate) | found)
}

pub fn stripe_signature(secret: &str, body: &[u8], timestamp: i64) -> String {
    let signature = hmac_sha256_hex(secret, &stripe_signed_payload(timestamp, body));
    format!("t={},v1={}", timestamp, signature)
}

fn stripe_signed_payload(timestamp: i64, body: &[u8]) -> Vec<u8> {
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(body);
    signed
}
