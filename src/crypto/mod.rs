//! Symmetric encryption for registry fields.
//!
//! A 256-bit AES-GCM key is derived from a password and salt with
//! PBKDF2-HMAC-SHA256. Tokens are URL-safe base64 of `nonce || ciphertext`,
//! so they embed cleanly in the TOML registry document.

use std::fmt;

use aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};

/// PBKDF2 iteration count (OWASP recommendation for HMAC-SHA256).
pub const DEFAULT_ITERATIONS: u32 = 480_000;

const PASSWORD_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Everything needed to reconstruct an equivalent [`CryptoEngine`].
///
/// Persisted beside the registry as `encryption.key`. Losing this file makes
/// every encrypted record permanently unreadable; there is no recovery path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub password: String,
    pub salt: String,
    pub iterations: u32,
}

pub struct CryptoEngine {
    cipher: Aes256Gcm,
    password: String,
    salt: Vec<u8>,
    iterations: u32,
}

impl CryptoEngine {
    /// Creates an engine with a freshly generated random password and salt.
    pub fn new() -> Self {
        let mut password_bytes = [0u8; PASSWORD_LEN];
        rand::rng().fill(&mut password_bytes);
        let password = URL_SAFE_NO_PAD.encode(password_bytes);

        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill(&mut salt);

        Self::derive(password, salt.to_vec(), DEFAULT_ITERATIONS)
    }

    /// Reconstructs an engine from a previously exported password and
    /// base64-encoded salt, with byte-identical decrypt behavior.
    pub fn restore(password: &str, salt: &str) -> Result<Self> {
        Self::restore_with_iterations(password, salt, DEFAULT_ITERATIONS)
    }

    /// Reconstructs an engine from persisted [`KeyMaterial`].
    pub fn from_material(material: &KeyMaterial) -> Result<Self> {
        Self::restore_with_iterations(&material.password, &material.salt, material.iterations)
    }

    fn restore_with_iterations(password: &str, salt: &str, iterations: u32) -> Result<Self> {
        if password.is_empty() || salt.is_empty() {
            return Err(Error::Crypto(
                "key material password and salt must not be empty".to_string(),
            ));
        }
        let salt_bytes = URL_SAFE_NO_PAD
            .decode(salt)
            .map_err(|e| Error::Crypto(format!("invalid salt encoding: {e}")))?;
        Ok(Self::derive(password.to_string(), salt_bytes, iterations))
    }

    fn derive(password: String, salt: Vec<u8>, iterations: u32) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut key);
        let cipher = Aes256Gcm::new(&key.into());
        Self {
            cipher,
            password,
            salt,
            iterations,
        }
    }

    /// Encrypts a plaintext string into a URL-safe base64 token.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Err(Error::Crypto("cannot encrypt an empty value".to_string()));
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::Crypto("encryption failed".to_string()))?;

        let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Decrypts a token produced by [`encrypt`](Self::encrypt).
    ///
    /// A malformed token, tampered data and a mismatched key all produce the
    /// same error; callers cannot tell which occurred.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Err(Error::Crypto("cannot decrypt an empty value".to_string()));
        }

        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| Self::tamper_error())?;
        if raw.len() <= NONCE_LEN {
            return Err(Self::tamper_error());
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| Self::tamper_error())?;
        String::from_utf8(plaintext).map_err(|_| Self::tamper_error())
    }

    fn tamper_error() -> Error {
        Error::Crypto(
            "decryption failed: data may have been tampered with or the key does not match"
                .to_string(),
        )
    }

    /// Exports the key material for persistence. The caller owns safe storage.
    pub fn key_material(&self) -> KeyMaterial {
        KeyMaterial {
            password: self.password.clone(),
            salt: URL_SAFE_NO_PAD.encode(&self.salt),
            iterations: self.iterations,
        }
    }

    /// Self-check: encrypts and decrypts a probe value.
    pub fn verify(&self) -> bool {
        match self.encrypt("probe") {
            Ok(token) => matches!(self.decrypt(&token).as_deref(), Ok("probe")),
            Err(_) => false,
        }
    }
}

impl Default for CryptoEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("password", &"***")
            .field("salt_len", &self.salt.len())
            .field("iterations", &self.iterations)
            .finish()
    }
}
