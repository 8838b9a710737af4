//! Bearer-token hashing. Tokens are stored only as salted SHA-256 digests.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Visible prefix on every issued token, used to spot leaked tokens in logs.
pub const TOKEN_BRAND: &str = "tb_";

/// Hash a secret for storage/lookup.
pub fn hash_secret(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"talebill-v1:");
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new plaintext API token. Shown once, never stored.
pub fn generate_token() -> String {
    format!(
        "{}{}{}",
        TOKEN_BRAND,
        Uuid::new_v4().as_simple(),
        Uuid::new_v4().as_simple()
    )
}
