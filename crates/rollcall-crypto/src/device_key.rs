//! Device signing keypair.
//!
//! Every enrolled device holds one Ed25519 keypair. The secret half stays on
//! the device (optionally persisted with owner-only permissions); the public
//! half is bound to the account by the [`DeviceBindingAuthority`].
//!
//! [`DeviceBindingAuthority`]: crate::binding::DeviceBindingAuthority

use std::path::Path;

use ed25519_dalek::{SECRET_KEY_LENGTH, Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// An Ed25519 keypair owned by one physical device.
pub struct DeviceKeyPair {
    signing: SigningKey,
}

impl std::fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyPair")
            .field("public", &hex::encode(self.public_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl DeviceKeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct from raw 32-byte secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_LENGTH,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SECRET_KEY_LENGTH];
        arr.copy_from_slice(bytes);
        let signing = SigningKey::from_bytes(&arr);
        arr.zeroize();
        Ok(Self { signing })
    }

    /// The verifying (public) key.
    pub fn public_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// Raw secret bytes. Only the template cipher and key persistence use this.
    pub(crate) fn secret_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.signing.to_bytes()
    }

    /// Sign an exact byte sequence.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    /// Colon-separated SHA-256 fingerprint of the public key.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.public_bytes())
    }

    /// Persist the secret half, owner-only on Unix.
    pub fn save_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut secret = self.secret_bytes();
        let written = std::fs::write(path, secret);
        secret.zeroize();
        written?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Load a key written by [`Self::save_to_file`]. A key file others can
    /// read is refused rather than trusted.
    pub fn load_from_file(path: &Path) -> Result<Self, CryptoError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path)?.permissions().mode() & 0o777;
            if mode != 0o600 {
                return Err(CryptoError::InsecureKeyFile {
                    path: path.display().to_string(),
                    mode,
                });
            }
        }
        let mut secret = std::fs::read(path)?;
        let keypair = Self::from_secret_bytes(&secret);
        secret.zeroize();
        keypair
    }

    /// The device's key at `path`, created on first use.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            return Self::load_from_file(path);
        }
        let keypair = Self::generate();
        keypair.save_to_file(path)?;
        Ok(keypair)
    }
}

/// Compute a colon-separated hex fingerprint from raw public key bytes.
pub fn fingerprint_of(pubkey_bytes: &[u8; 32]) -> String {
    use sha2::{Digest, Sha256};
    Sha256::digest(pubkey_bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    #[test]
    fn signature_verifies_only_for_signed_bytes() {
        let kp = DeviceKeyPair::generate();
        let sig = kp.sign(b"present");
        assert!(kp.public_key().verify(b"present", &sig).is_ok());
        assert!(kp.public_key().verify(b"absent", &sig).is_err());
    }

    #[test]
    fn secret_roundtrip_preserves_public_key() {
        let kp = DeviceKeyPair::generate();
        let restored = DeviceKeyPair::from_secret_bytes(&kp.secret_bytes()).unwrap();
        assert_eq!(restored.public_bytes(), kp.public_bytes());
    }

    #[test]
    fn from_secret_bytes_rejects_wrong_length() {
        match DeviceKeyPair::from_secret_bytes(&[0u8; 16]) {
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16,
            }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn fingerprint_is_sha256_colon_hex() {
        let fp = DeviceKeyPair::generate().fingerprint();
        assert_eq!(fp.len(), 95);
        assert!(fp.split(':').all(|s| s.len() == 2));
    }

    #[test]
    fn load_or_generate_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("device.key");

        let first = DeviceKeyPair::load_or_generate(&path).unwrap();
        let second = DeviceKeyPair::load_or_generate(&path).unwrap();
        assert_eq!(first.public_bytes(), second.public_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn load_rejects_world_readable_key() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.key");
        DeviceKeyPair::generate().save_to_file(&path).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        assert!(matches!(
            DeviceKeyPair::load_from_file(&path),
            Err(CryptoError::InsecureKeyFile { mode: 0o644, .. })
        ));
    }

    #[test]
    fn truncated_key_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.key");
        std::fs::write(&path, [0u8; 20]).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }
        assert!(DeviceKeyPair::load_from_file(&path).is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let kp = DeviceKeyPair::generate();
        let out = format!("{kp:?}");
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains(&hex::encode(kp.secret_bytes())));
    }
}
