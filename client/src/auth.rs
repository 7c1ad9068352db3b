use sha2::{Digest, Sha256};

const DOMAIN: &[u8] = b"parlor-password-v1:";

/// Digest sent in REGISTER/LOGIN in place of the password. The directory stores it as-is.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
