//! AES-256-GCM encryption for tokens and secrets at rest.
//!
//! Every call to [`Cipher::encrypt`] derives a fresh key from the shared
//! secret and a random salt (PBKDF2-HMAC-SHA256), then seals the plaintext
//! under a random nonce. The stored form is:
//!
//! ```text
//! base64( salt (16 bytes) || nonce (12 bytes) || ciphertext + tag )
//! ```
//!
//! Salt and nonce sizes are fixed; changing either breaks every stored value.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

/// Size of the per-call random salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of the nonce in bytes (96 bits, standard for GCM)
pub const NONCE_SIZE: usize = 12;

/// Size of the derived encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// PBKDF2 rounds used to stretch the shared secret
const PBKDF2_ITERATIONS: u32 = 4096;

/// Errors produced by a [`Cipher`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("cipher input is empty")]
    EmptyInput,

    #[error("cipher secret is empty")]
    EmptySecret,

    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("ciphertext is not valid base64: {0}")]
    Encoding(String),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed (wrong key or corrupted data)")]
    AuthenticationFailed,

    #[error("decrypted data is not valid UTF-8")]
    InvalidUtf8,
}

/// Symmetric encryption of opaque strings.
///
/// Implementations are CPU-bound and shared across request tasks.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError>;
}

/// AES-256-GCM cipher keyed by a passphrase.
///
/// The passphrase is never used as a key directly; see the module docs.
pub struct AesCipher {
    secret: Vec<u8>,
}

impl AesCipher {
    /// Creates a cipher from the process-wide secret.
    ///
    /// # Returns
    /// * `Err(CipherError::EmptySecret)` - If the secret is empty
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, CipherError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(CipherError::EmptySecret);
        }

        Ok(Self { secret })
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha256>(&self.secret, salt, PBKDF2_ITERATIONS, &mut key);
        key
    }
}

impl std::fmt::Debug for AesCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCipher").finish_non_exhaustive()
    }
}

impl Cipher for AesCipher {
    /// Encrypts plaintext with a freshly derived key and random nonce.
    ///
    /// Encrypting the same plaintext twice yields different ciphertexts.
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Err(CipherError::EmptyInput);
        }

        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let key = self.derive_key(&salt);
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| CipherError::EncryptionFailed)?;

        // Generate random nonce (never reuse!)
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut payload = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + sealed.len());
        payload.extend_from_slice(&salt);
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&sealed);

        Ok(BASE64.encode(payload))
    }

    /// Decrypts a value produced by [`AesCipher::encrypt`].
    ///
    /// Never returns partially decrypted data: tampering, a wrong secret or a
    /// plaintext input all fail.
    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        if ciphertext.is_empty() {
            return Err(CipherError::EmptyInput);
        }

        let payload = BASE64
            .decode(ciphertext)
            .map_err(|e| CipherError::Encoding(e.to_string()))?;

        if payload.len() < SALT_SIZE + NONCE_SIZE {
            return Err(CipherError::TooShort {
                expected: SALT_SIZE + NONCE_SIZE,
                actual: payload.len(),
            });
        }

        let (salt, rest) = payload.split_at(SALT_SIZE);
        let (nonce, sealed) = rest.split_at(NONCE_SIZE);

        let key = self.derive_key(salt);
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| CipherError::AuthenticationFailed)?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::AuthenticationFailed)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> AesCipher {
        AesCipher::new("test-secret").unwrap()
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert_eq!(AesCipher::new("").unwrap_err(), CipherError::EmptySecret);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let long = "x".repeat(4096);

        for plaintext in ["a", "my-secret-access-token-12345", "ünïcødé 🔑", long.as_str()] {
            let ciphertext = cipher.encrypt(plaintext).expect("Encryption failed");
            assert_ne!(ciphertext, plaintext);
            assert_eq!(cipher.decrypt(&ciphertext).expect("Decryption failed"), plaintext);
        }
    }

    #[test]
    fn test_layout() {
        let cipher = test_cipher();
        let ciphertext = cipher.encrypt("abc").unwrap();
        let payload = BASE64.decode(ciphertext).unwrap();

        // salt + nonce + 3 bytes of ciphertext + 16 byte tag
        assert_eq!(payload.len(), SALT_SIZE + NONCE_SIZE + 3 + 16);
    }

    #[test]
    fn test_nondeterministic() {
        let cipher = test_cipher();

        let first = cipher.encrypt("same-plaintext").unwrap();
        let second = cipher.encrypt("same-plaintext").unwrap();
        assert_ne!(first, second);

        let first_payload = BASE64.decode(&first).unwrap();
        let second_payload = BASE64.decode(&second).unwrap();
        assert_ne!(first_payload[..SALT_SIZE], second_payload[..SALT_SIZE]);

        assert_eq!(cipher.decrypt(&first).unwrap(), "same-plaintext");
        assert_eq!(cipher.decrypt(&second).unwrap(), "same-plaintext");
    }

    #[test]
    fn test_empty_input() {
        let cipher = test_cipher();
        assert_eq!(cipher.encrypt("").unwrap_err(), CipherError::EmptyInput);
        assert_eq!(cipher.decrypt("").unwrap_err(), CipherError::EmptyInput);
    }

    #[test]
    fn test_too_short() {
        let cipher = test_cipher();
        let short = BASE64.encode([0u8; SALT_SIZE + NONCE_SIZE - 1]);

        assert!(matches!(
            cipher.decrypt(&short),
            Err(CipherError::TooShort { actual, .. }) if actual == SALT_SIZE + NONCE_SIZE - 1
        ));
    }

    #[test]
    fn test_every_flipped_byte_fails() {
        let cipher = test_cipher();
        let ciphertext = cipher.encrypt("secret-token").unwrap();
        let payload = BASE64.decode(ciphertext).unwrap();

        for i in 0..payload.len() {
            let mut tampered = payload.clone();
            tampered[i] ^= 0x01;
            let result = cipher.decrypt(&BASE64.encode(&tampered));
            assert_eq!(result, Err(CipherError::AuthenticationFailed), "byte {}", i);
        }
    }

    #[test]
    fn test_wrong_secret_fails() {
        let ciphertext = test_cipher().encrypt("secret").unwrap();
        let other = AesCipher::new("other-secret").unwrap();

        assert_eq!(other.decrypt(&ciphertext), Err(CipherError::AuthenticationFailed));
    }

    #[test]
    fn test_decrypting_plaintext_fails() {
        let cipher = test_cipher();

        // Not base64 at all
        assert!(matches!(cipher.decrypt("access-token!"), Err(CipherError::Encoding(_))));

        // Valid base64 but not produced by the cipher
        let bogus = BASE64.encode("plain-refresh-token-that-is-long-enough-to-parse");
        assert_eq!(cipher.decrypt(&bogus), Err(CipherError::AuthenticationFailed));
    }
}
