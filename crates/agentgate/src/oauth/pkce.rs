//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements S256 code challenge verification per RFC 7636. Only `S256` is
//! supported; the comparison is fixed-time to avoid timing side-channels.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Verify a PKCE S256 code challenge.
///
/// Computes `BASE64URL(SHA256(code_verifier))` and compares it to the stored
/// challenge in constant time. Malformed input is a mismatch, never an error.
#[must_use]
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    let hash = Sha256::digest(code_verifier.as_bytes());
    let computed = URL_SAFE_NO_PAD.encode(hash);
    bool::from(computed.as_bytes().ct_eq(code_challenge.as_bytes()))
}

/// Compute the S256 challenge for a verifier. Used by the delegated-login leg
/// and by tests driving the client side of the flow.
#[must_use]
pub fn code_challenge_s256(code_verifier: &str) -> String {
    let hash = Sha256::digest(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate a cryptographically random code verifier (43 chars, URL-safe).
#[must_use]
pub fn generate_code_verifier() -> String {
    random_urlsafe(32)
}

/// Generate a random `state` value for CSRF binding.
#[must_use]
pub fn generate_state() -> String {
    random_urlsafe(24)
}

fn random_urlsafe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
