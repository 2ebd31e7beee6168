/// Single-use secret tokens (email verification, password reset)
///
/// The plaintext token is handed to the user exactly once; only its SHA-256
/// hex digest is stored. Lookups hash the presented token and compare
/// digests in SQL.
///
/// # Example
///
/// ```
/// use iahome_shared::auth::secret_token::{generate_secret_token, hash_secret_token};
///
/// let (token, hash) = generate_secret_token();
/// assert_eq!(token.len(), 48);
/// assert_eq!(hash, hash_secret_token(&token));
/// ```

use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of generated tokens (base62 characters)
pub const SECRET_TOKEN_LENGTH: usize = 48;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generates a token and its digest: `(plaintext, sha256_hex)`
pub fn generate_secret_token() -> (String, String) {
    let mut rng = rand::thread_rng();

    let token: String = (0..SECRET_TOKEN_LENGTH)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    let hash = hash_secret_token(&token);

    (token, hash)
}

/// SHA-256 hex digest of a token (64 characters)
pub fn hash_secret_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Cheap shape check before touching the database
pub fn is_well_formed(token: &str) -> bool {
    token.len() == SECRET_TOKEN_LENGTH && token.bytes().all(|b| b.is_ascii_alphanumeric())
}
