//! PKCE (RFC 7636), `state` and `nonce` generation

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Code challenge method sent with the authorization request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    /// No PKCE
    #[default]
    #[serde(rename = "none")]
    None,
    /// Challenge equals the verifier
    #[serde(rename = "plain")]
    Plain,
    /// Challenge is base64url(SHA-256(verifier))
    S256,
}

impl CodeChallengeMethod {
    /// Wire name, `None` when PKCE is off
    #[must_use]
    pub fn as_param(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Plain => Some("plain"),
            Self::S256 => Some("S256"),
        }
    }

    /// Derive the challenge for `verifier`
    #[must_use]
    pub fn challenge(self, verifier: &str) -> Option<String> {
        match self {
            Self::None => None,
            Self::Plain => Some(verifier.to_string()),
            Self::S256 => {
                let mut hasher = Sha256::new();
                hasher.update(verifier.as_bytes());
                let challenge_bytes = hasher.finalize();
                Some(URL_SAFE_NO_PAD.encode(challenge_bytes))
            }
        }
    }
}

/// Generate a PKCE code verifier (43 base64url chars)
#[must_use]
pub fn generate_code_verifier() -> String {
    let verifier_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(verifier_bytes)
}

/// Generate a random `state` or `nonce` value
#[must_use]
pub fn generate_random_string() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}
