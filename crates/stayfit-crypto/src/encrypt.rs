use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::DECRYPTION_FAILED;

const IV_LEN: usize = 12;

/// Base64 ciphertext and IV of one encrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: String,
    pub iv: String,
}

/// Encrypt with AES-256-GCM under a fresh random 96-bit IV.
pub fn encrypt_message(key: &[u8; 32], plaintext: &str) -> Result<Sealed> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok(Sealed {
        ciphertext: BASE64.encode(ciphertext),
        iv: BASE64.encode(nonce),
    })
}

/// Decrypt a base64 ciphertext/IV pair. Any failure yields [`DECRYPTION_FAILED`].
pub fn decrypt_message(key: &[u8; 32], ciphertext: &str, iv: &str) -> String {
    try_decrypt(key, ciphertext, iv).unwrap_or_else(|_| DECRYPTION_FAILED.to_string())
}

fn try_decrypt(key: &[u8; 32], ciphertext: &str, iv: &str) -> Result<String> {
    let ciphertext = BASE64.decode(ciphertext)?;
    let iv = BASE64.decode(iv)?;
    if iv.len() != IV_LEN {
        return Err(anyhow!("IV must be {} bytes, got {}", IV_LEN, iv.len()));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    Ok(String::from_utf8(plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let sealed = encrypt_message(&KEY, "Hello from StayFit!").unwrap();
        assert_ne!(sealed.ciphertext, "Hello from StayFit!");
        assert_eq!(decrypt_message(&KEY, &sealed.ciphertext, &sealed.iv), "Hello from StayFit!");
    }

    #[test]
    fn fresh_iv_per_message() {
        let a = encrypt_message(&KEY, "same").unwrap();
        let b = encrypt_message(&KEY, "same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_eq!(BASE64.decode(&a.iv).unwrap().len(), IV_LEN);
    }

    #[test]
    fn wrong_key_yields_sentinel() {
        let sealed = encrypt_message(&KEY, "Secret message").unwrap();
        assert_eq!(decrypt_message(&[8u8; 32], &sealed.ciphertext, &sealed.iv), DECRYPTION_FAILED);
    }

    #[test]
    fn tampered_ciphertext_yields_sentinel() {
        let sealed = encrypt_message(&KEY, "Secret message").unwrap();
        let mut bytes = BASE64.decode(&sealed.ciphertext).unwrap();
        bytes[0] ^= 0x01;
        let tampered = BASE64.encode(bytes);
        assert_eq!(decrypt_message(&KEY, &tampered, &sealed.iv), DECRYPTION_FAILED);
    }

    #[test]
    fn malformed_iv_yields_sentinel() {
        let sealed = encrypt_message(&KEY, "Secret message").unwrap();
        let other = encrypt_message(&KEY, "Secret message").unwrap();
        assert_eq!(decrypt_message(&KEY, &sealed.ciphertext, &other.iv), DECRYPTION_FAILED);
        assert_eq!(decrypt_message(&KEY, &sealed.ciphertext, "AAAA"), DECRYPTION_FAILED);
        assert_eq!(decrypt_message(&KEY, "not base64!", &sealed.iv), DECRYPTION_FAILED);
    }
}
