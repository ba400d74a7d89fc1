//! Biometric templates and their sealed form.
//!
//! A template is created once per enrollment and replaced wholesale on
//! re-enrollment; there is no API that mutates an existing one. At rest it
//! only exists sealed under the device key.

use serde::{Deserialize, Serialize};

use rollcall_core::db::unix_timestamp_millis;
use rollcall_crypto::{SealedBlob, TemplateCipher};

use crate::error::BiometricError;

/// Reference embedding for one account on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricTemplate {
    account_id: String,
    embedding: Vec<f32>,
    version: u32,
    encrypted_at: Option<i64>,
}

impl BiometricTemplate {
    pub(crate) const fn new(account_id: String, embedding: Vec<f32>, version: u32) -> Self {
        Self {
            account_id,
            embedding,
            version,
            encrypted_at: None,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Unit-length centroid embedding.
    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    pub const fn version(&self) -> u32 {
        self.version
    }

    /// When the template was last sealed, in Unix milliseconds.
    pub const fn encrypted_at(&self) -> Option<i64> {
        self.encrypted_at
    }

    /// Seal under the device cipher. The account id is bound as associated data.
    pub fn seal(&self, cipher: &TemplateCipher) -> Result<SealedTemplate, BiometricError> {
        let encrypted_at = unix_timestamp_millis();
        let mut stamped = self.clone();
        stamped.encrypted_at = Some(encrypted_at);
        let plaintext = serde_json::to_vec(&stamped)?;
        let blob = cipher.seal(&plaintext, self.account_id.as_bytes())?;
        Ok(SealedTemplate {
            account_id: self.account_id.clone(),
            version: self.version,
            encrypted_at,
            blob,
        })
    }
}

/// A template encrypted at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedTemplate {
    pub account_id: String,
    pub version: u32,
    pub encrypted_at: i64,
    pub blob: SealedBlob,
}

impl SealedTemplate {
    /// Decrypt. Fails if the blob was sealed by another device, for another
    /// account, or has been altered.
    pub fn open(&self, cipher: &TemplateCipher) -> Result<BiometricTemplate, BiometricError> {
        let plaintext = cipher.open(&self.blob, self.account_id.as_bytes())?;
        let template: BiometricTemplate = serde_json::from_slice(&plaintext)?;
        if template.account_id != self.account_id {
            return Err(BiometricError::AccountMismatch {
                expected: self.account_id.clone(),
                actual: template.account_id,
            });
        }
        Ok(template)
    }
}
