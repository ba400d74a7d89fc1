//! Any single-bit change to a signed packet must make it fail validation at
//! the nonce or signature step.

#![allow(clippy::unwrap_used)]

use rollcall_core::Score;
use rollcall_crypto::{BindMode, DeviceBindingAuthority, DeviceKeyPair};
use rollcall_proto::{
    AttendancePacket, NonceState, NonceView, PacketClaim, ValidationContext, ValidationStep,
    validate,
};

struct Setup {
    authority: DeviceBindingAuthority,
    public_key: [u8; 32],
    nonce: NonceView,
    packet: AttendancePacket,
}

fn setup() -> Setup {
    let authority = DeviceBindingAuthority::new();
    let device = DeviceKeyPair::generate();
    let identity = authority
        .bind("student-42", device.public_key(), BindMode::Fresh)
        .unwrap();
    let nonce = NonceView {
        value: (0u8..16).collect(),
        session_id: "session-7".into(),
        issued_at_ms: 0,
        expires_at_ms: i64::MAX,
        state: NonceState::Open,
    };
    let packet = AttendancePacket::sign(
        PacketClaim {
            session_id: "session-7".into(),
            account_id: "student-42".into(),
            device_id: identity.device_id.to_string(),
            nonce: nonce.value.clone(),
            liveness_score: 9300,
            rssi_at_capture: -45,
            client_timestamp_ms: 1_700_000_000_123,
        },
        &device,
    );
    Setup {
        authority,
        public_key: device.public_bytes(),
        nonce,
        packet,
    }
}

fn mutations(packet: &AttendancePacket) -> Vec<AttendancePacket> {
    let mut out = Vec::new();
    let flip_string = |s: &String, i: usize, bit: u32| {
        let mut bytes = s.clone().into_bytes();
        bytes[i] ^= 1 << bit;
        String::from_utf8(bytes).unwrap()
    };

    for bit in 0..7 {
        for i in 0..packet.session_id.len() {
            let mut p = packet.clone();
            p.session_id = flip_string(&p.session_id, i, bit);
            out.push(p);
        }
        for i in 0..packet.account_id.len() {
            let mut p = packet.clone();
            p.account_id = flip_string(&p.account_id, i, bit);
            out.push(p);
        }
        for i in 0..packet.device_id.len() {
            let mut p = packet.clone();
            p.device_id = flip_string(&p.device_id, i, bit);
            out.push(p);
        }
    }
    for bit in 0..8 {
        for i in 0..packet.nonce.len() {
            let mut p = packet.clone();
            p.nonce[i] ^= 1 << bit;
            out.push(p);
        }
        for i in 0..packet.signature.len() {
            let mut p = packet.clone();
            p.signature[i] ^= 1 << bit;
            out.push(p);
        }
    }
    for bit in 0..32 {
        let mut p = packet.clone();
        p.liveness_score ^= 1 << bit;
        out.push(p);
        let mut p = packet.clone();
        p.rssi_at_capture ^= 1 << bit;
        out.push(p);
    }
    for bit in 0..64 {
        let mut p = packet.clone();
        p.client_timestamp_ms ^= 1 << bit;
        out.push(p);
    }
    out
}

#[test]
fn untouched_packet_is_valid() {
    let s = setup();
    let ctx = context(&s);
    assert_eq!(validate(&s.packet, &ctx), Ok(()));
}

#[test]
fn every_single_bit_flip_is_rejected() {
    let s = setup();
    let ctx = context(&s);
    let mutated = mutations(&s.packet);
    assert!(mutated.len() > 1000);

    for p in &mutated {
        assert!(!p.verify_with_key(&s.public_key), "mutation verified: {p:?}");
        let err = validate(p, &ctx).unwrap_err();
        assert!(
            err.step() <= ValidationStep::Signature,
            "mutation failed late at {:?}: {p:?}",
            err.step()
        );
    }
}

fn context(s: &Setup) -> ValidationContext<'_> {
    ValidationContext {
        session_id: "session-7",
        now_ms: 1_700_000_000_000,
        nonce: Some(&s.nonce),
        authority: &s.authority,
        liveness_threshold: Score::from_basis_points(8500),
        rssi_floor_dbm: -70,
        already_verified: false,
    }
}
