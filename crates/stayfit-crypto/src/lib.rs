//! Client-side message encryption.
//!
//! Each conversation has a symmetric AES-256-GCM key derived locally from the
//! session seed and the two participant ids. The server never sees keys or
//! plaintext: it stores the ciphertext, IV and [`stayfit_types::models::ENCRYPTED_PLACEHOLDER`].
//!
//! The `server` feature builds only the id helpers and constants.

#[cfg(feature = "client")]
pub mod encrypt;
#[cfg(feature = "client")]
pub mod session;

pub mod keys;

/// Shown in place of a message body that cannot be decrypted.
pub const DECRYPTION_FAILED: &str = "[Unable to decrypt message]";

pub use keys::conversation_id;
