//! Single-use invite tokens.
//!
//! The raw token only ever leaves the process inside the accept link. The
//! store keeps its SHA-256 digest.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Random bytes per token.
pub const TOKEN_BYTES: usize = 32;

/// A freshly minted token and its digest.
#[derive(Clone)]
pub struct IssuedToken {
    pub raw: String,
    pub hash: String,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("raw", &"[REDACTED]")
            .field("hash", &self.hash)
            .finish()
    }
}

/// Generate a token: 32 bytes from `OsRng`, URL-safe base64 without padding.
#[must_use]
pub fn generate_token() -> IssuedToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let raw = URL_SAFE_NO_PAD.encode(bytes);
    let hash = hash_token(&raw);
    IssuedToken { raw, hash }
}

/// SHA-256 of the token, hex-encoded.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
