//! Encryption at rest for provider credentials.
//!
//! Credentials are serialized to JSON and sealed with AES-256-GCM. The stored blob is `nonce || ciphertext`, where
//! the ciphertext carries the GCM tag. A fresh random nonce is used for every write.
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
    Key,
    Nonce,
};
use bank_providers::Credential;
use rand::RngCore;
use thiserror::Error;

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

#[derive(Debug, Clone, Error)]
pub enum CipherError {
    #[error("Invalid credential key. {0}")]
    InvalidKey(String),
    #[error("Could not encrypt credential")]
    EncryptionFailed,
    #[error("Could not decrypt credential. The key may have changed, or the data is corrupt")]
    DecryptionFailed,
    #[error("Credential could not be (de)serialized. {0}")]
    Serialization(String),
}

#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialCipher(****)")
    }
}

impl CredentialCipher {
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self { cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)) }
    }

    /// Accepts the key as 64 hex characters or as standard base64.
    pub fn from_encoded_key(encoded: &str) -> Result<Self, CipherError> {
        let encoded = encoded.trim();
        let bytes = if encoded.len() == 2 * KEY_LENGTH && encoded.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(encoded).map_err(|e| CipherError::InvalidKey(e.to_string()))?
        } else {
            base64::decode(encoded).map_err(|e| CipherError::InvalidKey(e.to_string()))?
        };
        let key: [u8; KEY_LENGTH] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| CipherError::InvalidKey(format!("key must be {KEY_LENGTH} bytes, got {}", b.len())))?;
        Ok(Self::new(key))
    }

    /// A cipher with a throwaway key. Anything it encrypts is unreadable once it is dropped.
    pub fn random() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(key)
    }

    pub fn encrypt(&self, credential: &Credential) -> Result<Vec<u8>, CipherError> {
        let plaintext = serde_json::to_vec(credential).map_err(|e| CipherError::Serialization(e.to_string()))?;
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| CipherError::EncryptionFailed)?;
        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<Credential, CipherError> {
        if sealed.len() <= NONCE_LENGTH {
            return Err(CipherError::DecryptionFailed);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
        let plaintext =
            self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| CipherError::DecryptionFailed)?;
        serde_json::from_slice(&plaintext).map_err(|e| CipherError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use bank_providers::ProviderKind;
    use bank_sync_common::Secret;
    use chrono::{TimeZone, Utc};

    use super::*;

    fn credential() -> Credential {
        let expiry = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        let mut c = Credential::new(ProviderKind::GoCardless, "req-1".into(), expiry);
        c.access_token = Some(Secret::new("access-token-value".into()));
        c.refresh_token = Some(Secret::new("refresh-token-value".into()));
        c
    }

    #[test]
    fn sealed_credentials_do_not_leak_tokens() {
        let cipher = CredentialCipher::random();
        let sealed = cipher.encrypt(&credential()).unwrap();
        let haystack = String::from_utf8_lossy(&sealed);
        assert!(!haystack.contains("access-token-value"));
        assert_eq!(cipher.decrypt(&sealed).unwrap(), credential());
    }

    #[test]
    fn nonces_are_not_reused() {
        let cipher = CredentialCipher::random();
        let a = cipher.encrypt(&credential()).unwrap();
        let b = cipher.encrypt(&credential()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_or_tampering_fails() {
        let sealed = CredentialCipher::random().encrypt(&credential()).unwrap();
        let other = CredentialCipher::random();
        assert!(matches!(other.decrypt(&sealed), Err(CipherError::DecryptionFailed)));
        assert!(matches!(other.decrypt(&sealed[..8]), Err(CipherError::DecryptionFailed)));
    }

    #[test]
    fn keys_from_hex_and_base64() {
        let hex_key = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
        let cipher = CredentialCipher::from_encoded_key(hex_key).unwrap();
        let bytes = hex::decode(hex_key).unwrap();
        let b64 = CredentialCipher::from_encoded_key(&base64::encode(&bytes)).unwrap();
        let sealed = cipher.encrypt(&credential()).unwrap();
        assert_eq!(b64.decrypt(&sealed).unwrap(), credential());
        assert!(matches!(CredentialCipher::from_encoded_key("c2hvcnQ="), Err(CipherError::InvalidKey(_))));
    }
}
