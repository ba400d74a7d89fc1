//! Shared fixtures for client integration tests: a real session host on the
//! in-memory radio and enrolled students with synthetic faces.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use rollcall_biometric::{Face, Motion, SyntheticCamera, TemplateEngine};
use rollcall_client::{ClientIdentity, DiscoveryClient};
use rollcall_core::Score;
use rollcall_core::config::{ClientConfig, HostConfig};
use rollcall_crypto::{BindMode, DeviceBindingAuthority, DeviceKeyPair};
use rollcall_host::{SessionHost, SessionInfo, SessionMetadata, SessionPolicy, SessionRegistry};
use rollcall_proto::SessionCode;
use rollcall_proto::sim::Air;
use uuid::Uuid;

pub const HOST: &str = "lectern";
pub const CODE: &str = "AB12CD";
pub const EMBEDDING_DIM: usize = 128;

pub fn client_config() -> ClientConfig {
    ClientConfig {
        scan_window_ms: 100,
        connect_timeout_ms: 1_000,
        submission_timeout_ms: 1_000,
        ..ClientConfig::default()
    }
}

pub fn policy(capacity: Option<usize>) -> SessionPolicy {
    SessionPolicy {
        liveness_threshold: Score::from_f64(0.85),
        rssi_floor_dbm: -70,
        capacity,
    }
}

pub struct Classroom {
    pub air: Air,
    pub authority: DeviceBindingAuthority,
    pub host: SessionHost,
    pub session: SessionInfo,
}

impl Classroom {
    /// A host advertising `AB12CD` for CS-101.
    pub async fn open(capacity: Option<usize>) -> Self {
        let air = Air::new();
        let authority = DeviceBindingAuthority::new();
        let host = SessionHost::builder(
            Uuid::new_v4(),
            authority.clone(),
            Arc::new(air.advertiser(HOST)),
        )
        .config(HostConfig {
            advertisement_interval_ms: 20,
            nonce_ttl_ms: 2_000,
            ..HostConfig::default()
        })
        .registry(SessionRegistry::new())
        .build();
        host.serve(air.acceptor(HOST));

        let session = host
            .start_with_code(
                SessionMetadata {
                    course_id: "CS-101".into(),
                    room: Some("B-12".into()),
                },
                policy(capacity),
                code(),
            )
            .await
            .unwrap();
        eventually(|| air.is_advertising(HOST)).await;
        Self {
            air,
            authority,
            host,
            session,
        }
    }

    /// Bind `account_id` to a fresh device, enroll `face` and point the
    /// camera at `shown` behaving as `motion`.
    pub fn student(
        &self,
        account_id: &str,
        face: &Face,
        shown: Face,
        motion: Motion,
        config: ClientConfig,
    ) -> DiscoveryClient {
        let device = format!("{account_id}-phone");
        self.air.set_rssi(&device, HOST, -45);

        let key = DeviceKeyPair::generate();
        let bound = self
            .authority
            .bind(account_id, key.public_key(), BindMode::Fresh)
            .unwrap();

        let engine = TemplateEngine::default();
        let samples: Vec<_> = (0..5).map(|i| face.capture(i, Motion::Live)).collect();
        let template = engine.enroll(account_id, &samples).unwrap();

        DiscoveryClient::new(
            config,
            ClientIdentity {
                account_id: account_id.into(),
                device_id: bound.device_id,
                device_key: key,
            },
            Arc::new(self.air.device(&device)),
            Arc::new(SyntheticCamera::new(shown, motion)),
            engine,
            template,
        )
    }

    /// A student whose camera sees their own, live face.
    pub fn genuine(&self, account_id: &str, seed: u64) -> DiscoveryClient {
        let face = Face::new(seed, EMBEDDING_DIM);
        self.student(account_id, &face, face.clone(), Motion::Live, client_config())
    }
}

pub fn code() -> SessionCode {
    SessionCode::parse(CODE).unwrap()
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
