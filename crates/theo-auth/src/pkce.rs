//! PKCE (RFC 7636) code verifier / challenge generation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

const VERIFIER_LENGTH: usize = 128;
const UNRESERVED_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// A PKCE code verifier / challenge pair, plus the opaque `state` value used
/// to correlate the authorization response with this flow.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

/// Generates a 128-character code verifier drawn from the RFC 7636
/// unreserved character set.
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    (0..VERIFIER_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..UNRESERVED_CHARS.len());
            UNRESERVED_CHARS[idx] as char
        })
        .collect()
}

/// Derives the S256 code challenge for a given verifier:
/// `base64url_no_padding(SHA-256(verifier))`.
pub fn generate_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Validates that `verifier` derives `expected_challenge` under S256,
/// comparing in constant time so a mismatched verifier cannot be
/// distinguished by timing from a matching one.
pub fn validate_code_verifier(verifier: &str, expected_challenge: &str) -> bool {
    let computed = generate_code_challenge(verifier);
    constant_time_eq(computed.as_bytes(), expected_challenge.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Generates a random opaque state token for CSRF protection across the
/// authorization round trip.
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| {
            let idx = rng.gen_range(0..UNRESERVED_CHARS.len());
            UNRESERVED_CHARS[idx] as char
        })
        .collect()
}

pub fn generate_pair() -> PkcePair {
    let verifier = generate_code_verifier();
    let challenge = generate_code_challenge(&verifier);
    let state = generate_state();
    PkcePair {
        verifier,
        challenge,
        state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_matches_rfc7636_appendix_b_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = generate_code_challenge(verifier);
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn generated_verifier_has_expected_length_and_charset() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), VERIFIER_LENGTH);
        assert!(verifier.bytes().all(|b| UNRESERVED_CHARS.contains(&b)));
    }

    #[test]
    fn successive_verifiers_are_not_equal() {
        assert_ne!(generate_code_verifier(), generate_code_verifier());
    }

    #[test]
    fn generate_pair_produces_consistent_challenge() {
        let pair = generate_pair();
        assert_eq!(generate_code_challenge(&pair.verifier), pair.challenge);
    }

    #[test]
    fn validate_accepts_the_matching_verifier() {
        let pair = generate_pair();
        assert!(validate_code_verifier(&pair.verifier, &pair.challenge));
    }

    #[test]
    fn validate_rejects_a_different_verifier() {
        let pair = generate_pair();
        let other = generate_code_verifier();
        assert_ne!(other, pair.verifier);
        assert!(!validate_code_verifier(&other, &pair.challenge));
    }

    #[test]
    fn validate_rejects_a_challenge_of_different_length() {
        assert!(!validate_code_verifier("A".repeat(128).as_str(), "too-short"));
    }
}
