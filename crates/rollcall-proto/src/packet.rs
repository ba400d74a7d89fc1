//! Canonical signing bytes.
//!
//! Every signed message is signed over a domain separator followed by the
//! protobuf encoding of its unsigned fields. Both sides rebuild the bytes from
//! the decoded fields, so any change to any field (or to the field order)
//! changes the bytes and the signature no longer verifies.

use ed25519_dalek::{Signature, VerifyingKey};
use prost::Message;
use uuid::Uuid;

use rollcall_core::Score;
use rollcall_crypto::DeviceKeyPair;

use crate::messages::{AttendancePacket, NonceResponse, PacketClaim, SubmissionResult, WireStatus};

pub const CLAIM_DOMAIN: &[u8] = b"rollcall-attendance-v1";
const NONCE_DOMAIN: &[u8] = b"rollcall-nonce-v1";
const RESULT_DOMAIN: &[u8] = b"rollcall-result-v1";

fn domain_bytes(domain: &[u8], message: &impl Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(domain.len() + message.encoded_len());
    out.extend_from_slice(domain);
    out.extend_from_slice(&message.encode_to_vec());
    out
}

fn verify_with(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify_strict(message, &signature).is_ok()
}

impl PacketClaim {
    /// The exact bytes the device signs.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        domain_bytes(CLAIM_DOMAIN, self)
    }
}

impl AttendancePacket {
    /// Sign a claim with the device key.
    pub fn sign(claim: PacketClaim, device: &DeviceKeyPair) -> Self {
        let signature = device.sign(&claim.canonical_bytes()).to_bytes().to_vec();
        let PacketClaim {
            session_id,
            account_id,
            device_id,
            nonce,
            liveness_score,
            rssi_at_capture,
            client_timestamp_ms,
        } = claim;
        Self {
            session_id,
            account_id,
            device_id,
            nonce,
            liveness_score,
            rssi_at_capture,
            client_timestamp_ms,
            signature,
        }
    }

    /// Rebuild the signed claim from the received fields.
    pub fn claim(&self) -> PacketClaim {
        PacketClaim {
            session_id: self.session_id.clone(),
            account_id: self.account_id.clone(),
            device_id: self.device_id.clone(),
            nonce: self.nonce.clone(),
            liveness_score: self.liveness_score,
            rssi_at_capture: self.rssi_at_capture,
            client_timestamp_ms: self.client_timestamp_ms,
        }
    }

    pub fn device_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.device_id).ok()
    }

    /// `None` when the claimed score is above 1.0.
    pub fn score(&self) -> Option<Score> {
        (self.liveness_score <= u32::from(Score::SCALE))
            .then(|| Score::from_basis_points(self.liveness_score))
    }

    /// Check the signature against a known public key, bypassing the binding
    /// authority.
    pub fn verify_with_key(&self, public_key: &[u8]) -> bool {
        verify_with(public_key, &self.claim().canonical_bytes(), &self.signature)
    }
}

impl NonceResponse {
    /// Build and sign a nonce response with the session key.
    pub fn signed(
        nonce: Vec<u8>,
        session_id: String,
        expires_at_ms: i64,
        session_key: &DeviceKeyPair,
    ) -> Self {
        let mut response = Self {
            nonce,
            session_id,
            expires_at_ms,
            session_public_key: session_key.public_bytes().to_vec(),
            signature: Vec::new(),
        };
        response.signature = session_key
            .sign(&response.signing_bytes())
            .to_bytes()
            .to_vec();
        response
    }

    fn signing_bytes(&self) -> Vec<u8> {
        let unsigned = Self {
            signature: Vec::new(),
            ..self.clone()
        };
        domain_bytes(NONCE_DOMAIN, &unsigned)
    }

    /// Verify against the session key carried in the response itself.
    pub fn verify(&self) -> bool {
        verify_with(&self.session_public_key, &self.signing_bytes(), &self.signature)
    }
}

impl SubmissionResult {
    pub fn signed(
        session_id: String,
        nonce: Vec<u8>,
        verdict: Result<(), &str>,
        recorded_at_ms: i64,
        session_key: &DeviceKeyPair,
    ) -> Self {
        let (status, reason) = match verdict {
            Ok(()) => (WireStatus::Verified, String::new()),
            Err(code) => (WireStatus::Rejected, code.to_string()),
        };
        let mut result = Self {
            session_id,
            nonce,
            status: status.into(),
            reason,
            recorded_at_ms,
            signature: Vec::new(),
        };
        result.signature = session_key
            .sign(&result.signing_bytes())
            .to_bytes()
            .to_vec();
        result
    }

    fn signing_bytes(&self) -> Vec<u8> {
        let unsigned = Self {
            signature: Vec::new(),
            ..self.clone()
        };
        domain_bytes(RESULT_DOMAIN, &unsigned)
    }

    /// Verify against the session key learned from the nonce response.
    pub fn verify(&self, session_public_key: &[u8]) -> bool {
        verify_with(session_public_key, &self.signing_bytes(), &self.signature)
    }
}
