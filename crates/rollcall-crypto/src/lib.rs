//! Rollcall device identity and sealing library.
//!
//! ## Crypto primitives
//!
//! - **Device key**: Ed25519 keypair generated on the device; only the public
//!   half is ever handed to the binding authority
//! - **Binding**: one active device per account, revocable, single
//!   verification choke point
//! - **Template sealing**: HKDF-SHA256 from the device secret →
//!   ChaCha20-Poly1305 AEAD with the account id as associated data

pub mod binding;
pub mod device_key;
pub mod error;
pub mod template_cipher;

pub use binding::{
    BackendError, BindMode, BindingError, DeviceBindingAuthority, DeviceIdentity,
    IdentityBackend, PendingRegistration,
};
pub use device_key::{DeviceKeyPair, fingerprint_of};
pub use error::CryptoError;
pub use template_cipher::{SealedBlob, TemplateCipher, AEAD_NONCE_SIZE};

pub use ed25519_dalek::{Signature, VerifyingKey};
