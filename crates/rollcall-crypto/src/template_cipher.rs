//! At-rest sealing for biometric templates.
//!
//! The sealing key never exists outside the enrolled device: it is derived
//! from the device secret with HKDF-SHA256 under a dedicated info string, so
//! a template sealed on one device cannot be opened on another.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::device_key::DeviceKeyPair;
use crate::error::CryptoError;

const HKDF_INFO: &[u8] = b"rollcall-template-seal-v1";
const HKDF_SALT: &[u8] = b"rollcall-template-hkdf-salt-v1";

/// Nonce size for ChaCha20-Poly1305.
pub const AEAD_NONCE_SIZE: usize = 12;

/// Ciphertext plus the nonce needed to open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlob {
    /// Ciphertext including the 16-byte Poly1305 tag.
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; AEAD_NONCE_SIZE],
}

/// AEAD cipher bound to one device key.
pub struct TemplateCipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for TemplateCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TemplateCipher([REDACTED])")
    }
}

impl TemplateCipher {
    /// Derive the sealing key from the device secret.
    pub fn for_device(device: &DeviceKeyPair) -> Result<Self, CryptoError> {
        let mut secret = device.secret_bytes();
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &secret);
        secret.zeroize();

        let mut key_bytes = [0u8; 32];
        hk.expand(HKDF_INFO, &mut key_bytes)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
        key_bytes.zeroize();

        Ok(Self { cipher })
    }

    /// Encrypt `plaintext`, authenticating `associated_data` alongside it.
    pub fn seal(&self, plaintext: &[u8], associated_data: &[u8]) -> Result<SealedBlob, CryptoError> {
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|e| CryptoError::SealFailed(e.to_string()))?;

        Ok(SealedBlob { ciphertext, nonce })
    }

    /// Decrypt a blob sealed with the same device key and associated data.
    pub fn open(&self, blob: &SealedBlob, associated_data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(
                Nonce::from_slice(&blob.nonce),
                Payload {
                    msg: &blob.ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|e| CryptoError::OpenFailed(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_on_same_device() {
        let device = DeviceKeyPair::generate();
        let cipher = TemplateCipher::for_device(&device).unwrap();

        let blob = cipher.seal(b"embedding", b"acct-1").unwrap();
        assert_ne!(blob.ciphertext, b"embedding");
        assert_eq!(cipher.open(&blob, b"acct-1").unwrap(), b"embedding");
    }

    #[test]
    fn other_device_cannot_open() {
        let blob = TemplateCipher::for_device(&DeviceKeyPair::generate())
            .unwrap()
            .seal(b"embedding", b"acct-1")
            .unwrap();
        let other = TemplateCipher::for_device(&DeviceKeyPair::generate()).unwrap();
        assert!(matches!(
            other.open(&blob, b"acct-1"),
            Err(CryptoError::OpenFailed(_))
        ));
    }

    #[test]
    fn associated_data_is_authenticated() {
        let cipher = TemplateCipher::for_device(&DeviceKeyPair::generate()).unwrap();
        let blob = cipher.seal(b"embedding", b"acct-1").unwrap();
        assert!(cipher.open(&blob, b"acct-2").is_err());
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let cipher = TemplateCipher::for_device(&DeviceKeyPair::generate()).unwrap();
        let mut blob = cipher.seal(b"embedding", b"acct-1").unwrap();
        blob.ciphertext[0] ^= 0x01;
        assert!(cipher.open(&blob, b"acct-1").is_err());
    }

    #[test]
    fn nonces_differ_between_seals() {
        let cipher = TemplateCipher::for_device(&DeviceKeyPair::generate()).unwrap();
        let a = cipher.seal(b"x", b"").unwrap();
        let b = cipher.seal(b"x", b"").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }
}
