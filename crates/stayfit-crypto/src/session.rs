use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use stayfit_types::events::SendMessagePayload;
use stayfit_types::models::{ChatMessage, ENCRYPTED_PLACEHOLDER};

use crate::DECRYPTION_FAILED;
use crate::encrypt::{decrypt_message, encrypt_message};
use crate::keys::{
    FALLBACK_SEED, conversation_id, derive_conversation_key, seed_from_oauth, seed_from_password,
};

/// Body fields of an outgoing `send_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingContent {
    pub content: String,
    pub encrypted: Option<String>,
    pub iv: Option<String>,
    pub is_encrypted: bool,
}

impl OutgoingContent {
    pub fn into_payload(self, receiver_id: i64) -> SendMessagePayload {
        SendMessagePayload {
            receiver_id,
            content: self.content,
            encrypted: self.encrypted,
            iv: self.iv,
            is_encrypted: self.is_encrypted,
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct SessionInner {
    seed: Option<String>,
    keys: HashMap<String, [u8; 32]>,
}

/// Seed material for the logged-in user plus a cache of derived
/// conversation keys. Set at login, cleared at logout.
#[derive(Default)]
pub struct EncryptionSession {
    inner: Mutex<SessionInner>,
}

impl EncryptionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_with_password(&self, user_id: i64, password: &str) {
        self.set_seed(seed_from_password(user_id, password));
    }

    pub fn init_with_oauth(&self, user_id: i64, token: &str) {
        self.set_seed(seed_from_oauth(user_id, token));
    }

    /// Use the app-wide seed when no login material is available.
    pub fn init_with_fallback(&self) {
        self.set_seed(FALLBACK_SEED.to_string());
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.seed = None;
        inner.keys.clear();
    }

    pub fn is_encryption_ready(&self) -> bool {
        self.lock().seed.is_some()
    }

    /// Encrypt `plaintext` for the `sender`/`receiver` conversation. Without a
    /// seed, or if encryption fails, the message goes out flagged as plaintext.
    pub fn prepare_outgoing(&self, sender_id: i64, receiver_id: i64, plaintext: &str) -> OutgoingContent {
        let plain = || OutgoingContent {
            content: plaintext.to_string(),
            encrypted: None,
            iv: None,
            is_encrypted: false,
        };

        let Some(key) = self.key_for(sender_id, receiver_id) else {
            return plain();
        };
        match encrypt_message(&key, plaintext) {
            Ok(sealed) => OutgoingContent {
                content: ENCRYPTED_PLACEHOLDER.to_string(),
                encrypted: Some(sealed.ciphertext),
                iv: Some(sealed.iv),
                is_encrypted: true,
            },
            Err(_) => plain(),
        }
    }

    /// Display text of a received or sent message from `me`'s point of view.
    pub fn read_incoming(&self, me: i64, message: &ChatMessage) -> String {
        if !message.is_encrypted {
            return message.content.clone();
        }
        let (Some(ciphertext), Some(iv)) = (&message.encrypted_content, &message.iv) else {
            return DECRYPTION_FAILED.to_string();
        };
        let other = if message.sender_id == me { message.receiver_id } else { message.sender_id };
        match self.key_for(me, other) {
            Some(key) => decrypt_message(&key, ciphertext, iv),
            None => DECRYPTION_FAILED.to_string(),
        }
    }

    fn key_for(&self, a: i64, b: i64) -> Option<[u8; 32]> {
        let mut inner = self.lock();
        let seed = inner.seed.clone()?;
        let key = *inner
            .keys
            .entry(conversation_id(a, b))
            .or_insert_with(|| derive_conversation_key(&seed, a, b));
        Some(key)
    }

    fn set_seed(&self, seed: String) {
        let mut inner = self.lock();
        inner.seed = Some(seed);
        inner.keys.clear();
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
