#[cfg(feature = "client")]
use sha2::{Digest, Sha256};

/// PBKDF2-HMAC-SHA256 rounds for conversation keys.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// App-wide seed used when a session has no login material of its own
/// (e.g. a session resumed from a stored token).
pub const FALLBACK_SEED: &str = "stayfit-shared-conversation-seed-v1";

/// Canonical id of the unordered pair `{a, b}`: `conv_<min>_<max>`.
pub fn conversation_id(a: i64, b: i64) -> String {
    format!("conv_{}_{}", a.min(b), a.max(b))
}

/// Derive the 256-bit key for the conversation between `a` and `b`.
/// Order of `a` and `b` does not matter.
#[cfg(feature = "client")]
pub fn derive_conversation_key(seed: &str, a: i64, b: i64) -> [u8; 32] {
    let salt = conversation_id(a, b);
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(seed.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut key);
    key
}

/// Seed material from a password login. Never leaves the device.
#[cfg(feature = "client")]
pub fn seed_from_password(user_id: i64, password: &str) -> String {
    hex::encode(Sha256::digest(format!("{}:{}", user_id, password).as_bytes()))
}

/// Seed material from a social login token.
#[cfg(feature = "client")]
pub fn seed_from_oauth(user_id: i64, token: &str) -> String {
    hex::encode(Sha256::digest(format!("oauth:{}:{}", user_id, token).as_bytes()))
}
