//! PKCE Handler (RFC 7636, spec §4.6).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::Rng;
use relaymcp_core::{Error, Result};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// RFC 7636 unreserved alphabet for code verifiers.
const VERIFIER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;

/// PKCE challenge methods this server accepts in `validate_code_challenge`.
/// Only `S256` is *advertised* (spec §4.6); `plain` is accepted when present
/// but excluded from `supported_methods()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeMethod {
    S256,
    Plain,
}

impl ChallengeMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "S256" => Some(Self::S256),
            "plain" => Some(Self::Plain),
            _ => None,
        }
    }
}

/// Generate a code verifier: 64 characters from the RFC 7636 unreserved
/// alphabet, via a cryptographically secure RNG.
pub fn generate_code_verifier() -> String {
    let mut rng = rand::rng();
    (0..64)
        .map(|_| {
            let idx = rng.random_range(0..VERIFIER_ALPHABET.len());
            VERIFIER_ALPHABET[idx] as char
        })
        .collect()
}

/// Compute the expected code challenge for a verifier under `method`.
///
/// `method = "plain"` returns the verifier itself — accepted but MUST be
/// logged as insecure by callers; the metadata endpoint never advertises it.
pub fn generate_code_challenge(verifier: &str, method: ChallengeMethod) -> String {
    match method {
        ChallengeMethod::Plain => {
            tracing::warn!("PKCE 'plain' method used — this is insecure and should not be relied on in production");
            verifier.to_string()
        }
        ChallengeMethod::S256 => {
            let digest = Sha256::digest(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(digest)
        }
    }
}

/// Validate a code verifier's length and alphabet per RFC 7636 §4.1.
pub fn validate_code_verifier(verifier: &str) -> Result<()> {
    let len = verifier.len();
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
        return Err(Error::validation(format!(
            "code_verifier must be {MIN_VERIFIER_LEN}-{MAX_VERIFIER_LEN} characters, got {len}"
        )));
    }
    if !verifier.bytes().all(|b| VERIFIER_ALPHABET.contains(&b)) {
        return Err(Error::validation(
            "code_verifier contains characters outside the RFC 7636 unreserved alphabet",
        ));
    }
    Ok(())
}

/// Recompute the expected challenge from `verifier` and compare against
/// `challenge` in constant time. Must not short-circuit on length mismatch
/// in a timing-observable way: both branches run the full comparison.
pub fn validate_code_challenge(challenge: &str, verifier: &str, method: ChallengeMethod) -> Result<()> {
    validate_code_verifier(verifier)?;
    let expected = generate_code_challenge(verifier, method);

    // Compare fixed-size digests when possible; pad/hash otherwise so the
    // comparison itself never branches on length.
    let ok = constant_time_str_eq(&expected, challenge);
    if ok {
        Ok(())
    } else {
        Err(Error::validation("PKCE code_challenge verification failed"))
    }
}

fn constant_time_str_eq(a: &str, b: &str) -> bool {
    // Hash both sides to a fixed-width digest first so the subsequent
    // constant-time comparison never reveals length via branching, then
    // additionally compare lengths using a constant-time path: hashing
    // unequal-length strings still produces unequal digests with
    // overwhelming probability, which is what we actually rely on —
    // comparing the digests, never comparing `a`/`b` directly.
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    da.ct_eq(&db).into()
}

/// The only PKCE method this server advertises (spec §4.6).
pub fn supported_methods() -> &'static [&'static str] {
    &["S256"]
}

/// Whether PKCE is mandatory for the given client. The server is PKCE-only:
/// this always returns `true` (spec §4.6) — the parameter exists so a future
/// per-client override has a seam to attach to without an API break.
pub fn is_required_for(_client_id: &str) -> bool {
    true
}
