//! Shared fixtures for host integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::Score;
use rollcall_core::config::HostConfig;
use rollcall_crypto::{BindMode, DeviceBindingAuthority, DeviceIdentity, DeviceKeyPair};
use rollcall_host::{
    ConnectionInfo, LedgerDatabase, SessionHost, SessionMetadata, SessionPolicy, SessionRegistry,
};
use rollcall_proto::sim::Air;
use rollcall_proto::{
    AttendancePacket, ConnectRequest, Connector, Frame, Link, NonceResponse, PacketClaim,
    recv_frame, send_frame,
};
use uuid::Uuid;

pub const HOST: &str = "lectern";

pub fn fast_config() -> HostConfig {
    HostConfig {
        advertisement_interval_ms: 20,
        nonce_ttl_ms: 300,
        ..HostConfig::default()
    }
}

pub fn policy() -> SessionPolicy {
    SessionPolicy {
        liveness_threshold: Score::from_f64(0.85),
        rssi_floor_dbm: -70,
        capacity: None,
    }
}

pub fn metadata() -> SessionMetadata {
    SessionMetadata {
        course_id: "CS-101".into(),
        room: Some("B-12".into()),
    }
}

pub fn conn() -> ConnectionInfo {
    ConnectionInfo {
        peer: "phone".into(),
        rssi_dbm: -45,
    }
}

pub struct Student {
    pub account_id: String,
    pub key: DeviceKeyPair,
    pub identity: DeviceIdentity,
}

impl Student {
    pub fn bind(authority: &DeviceBindingAuthority, account_id: &str) -> Self {
        let key = DeviceKeyPair::generate();
        let identity = authority
            .bind(account_id, key.public_key(), BindMode::Fresh)
            .unwrap();
        Self {
            account_id: account_id.into(),
            key,
            identity,
        }
    }

    pub fn packet(&self, nonce: &NonceResponse, score_bp: u32, rssi: i32) -> AttendancePacket {
        AttendancePacket::sign(
            PacketClaim {
                session_id: nonce.session_id.clone(),
                account_id: self.account_id.clone(),
                device_id: self.identity.device_id.to_string(),
                nonce: nonce.nonce.clone(),
                liveness_score: score_bp,
                rssi_at_capture: rssi,
                client_timestamp_ms: 1_700_000_000_000,
            },
            &self.key,
        )
    }
}

pub struct Fixture {
    pub air: Air,
    pub authority: DeviceBindingAuthority,
    pub host: SessionHost,
}

pub fn host_on(
    air: &Air,
    address: &str,
    authority: &DeviceBindingAuthority,
    registry: SessionRegistry,
    store: Option<LedgerDatabase>,
) -> SessionHost {
    let mut builder = SessionHost::builder(
        Uuid::new_v4(),
        authority.clone(),
        Arc::new(air.advertiser(address)),
    )
    .config(fast_config())
    .registry(registry);
    if let Some(db) = store {
        builder = builder.store(db);
    }
    let host = builder.build();
    host.serve(air.acceptor(address));
    host
}

pub fn fixture() -> Fixture {
    let air = Air::new();
    let authority = DeviceBindingAuthority::new();
    let host = host_on(&air, HOST, &authority, SessionRegistry::new(), None);
    Fixture {
        air,
        authority,
        host,
    }
}

/// Wait for `cond` to hold, polling every few milliseconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

/// Connect `device` to the lectern and ask for `code`.
pub async fn request(air: &Air, device: &str, code: &str) -> (Box<dyn Link>, Frame) {
    eventually(|| air.is_advertising(HOST)).await;
    let mut link = air.device(device).connect(HOST).await.unwrap();
    send_frame(
        &*link,
        ConnectRequest {
            session_code: code.into(),
        },
    )
    .await
    .unwrap();
    let frame = recv_frame(&mut *link).await.unwrap();
    (link, frame)
}
