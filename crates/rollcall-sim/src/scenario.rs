//! One simulated lecture: a host at the lectern and a room of students.
//!
//! Present students sit close with a live face. Far students are genuine but
//! out in the corridor, below the RSSI floor. Spoofers hold a photo of
//! their own face up to the camera and never get past liveness.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use rollcall_biometric::{Face, Motion, SyntheticCamera, TemplateEngine};
use rollcall_client::{ClientIdentity, DiscoveryClient};
use rollcall_core::Config;
use rollcall_crypto::{BindMode, DeviceBindingAuthority, DeviceKeyPair};
use rollcall_host::{
    LedgerDatabase, SessionHost, SessionInfo, SessionMetadata, SessionPolicy, SessionSummary,
};
use rollcall_proto::sim::Air;
use rollcall_proto::{AttendanceRecord, AttendanceStatus, SessionCode};

const HOST: &str = "lectern";
const FAR_RSSI_DBM: i32 = -85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roster {
    pub students: usize,
    pub far_students: usize,
    pub spoofers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Present,
    Far,
    Spoofer,
}

/// What one student's device saw.
#[derive(Debug, Clone, Serialize)]
pub struct StudentOutcome {
    pub account_id: String,
    pub role: Role,
    pub client_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub session: SessionInfo,
    pub summary: SessionSummary,
    /// The host's exported ledger.
    pub records: Vec<AttendanceRecord>,
    pub students: Vec<StudentOutcome>,
}

fn role_of(index: usize, roster: &Roster) -> Role {
    if index < roster.students {
        Role::Present
    } else if index < roster.students + roster.far_students {
        Role::Far
    } else {
        Role::Spoofer
    }
}

fn rssi_for(index: usize, role: Role) -> i32 {
    match role {
        Role::Far => FAR_RSSI_DBM,
        Role::Present | Role::Spoofer => -40 - i32::try_from(index % 20).unwrap_or(0),
    }
}

/// Start a session, let every student join concurrently, stop the session
/// and export the ledger.
pub async fn run(
    config: &Config,
    roster: &Roster,
    code: Option<SessionCode>,
    store: Option<LedgerDatabase>,
) -> anyhow::Result<Report> {
    let air = Air::new();
    let authority = DeviceBindingAuthority::new();

    let mut builder = SessionHost::builder(
        Uuid::new_v4(),
        authority.clone(),
        Arc::new(air.advertiser(HOST)),
    )
    .config(config.host.clone());
    if let Some(db) = store {
        builder = builder.store(db);
    }
    let host = builder.build();
    let acceptor = host.serve(air.acceptor(HOST));

    let metadata = SessionMetadata {
        course_id: "CS-101".into(),
        room: Some("B-12".into()),
    };
    let policy = SessionPolicy::from(&config.policy);
    let session = match code {
        Some(code) => host.start_with_code(metadata, policy, code).await?,
        None => host.start(metadata, policy).await?,
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while !air.is_advertising(HOST) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("host never started advertising")?;

    let total = roster.students + roster.far_students + roster.spoofers;
    let mut joins = JoinSet::new();
    for index in 0..total {
        let role = role_of(index, roster);
        let account_id = format!("student-{index:03}");
        let mut client = enroll_student(config, &air, &authority, &account_id, index, role)?;
        let code = session.code.clone();
        joins.spawn(async move {
            let result = client.attend(&code).await;
            (account_id, role, client.state().to_string(), result)
        });
    }

    let mut students = Vec::with_capacity(total);
    while let Some(joined) = joins.join_next().await {
        let (account_id, role, client_state, result) = joined?;
        let outcome = match result {
            Ok(record) => {
                info!(
                    account_id = %account_id,
                    role = ?role,
                    status = record.status.as_str(),
                    reason = record.reason.as_deref().unwrap_or(""),
                    "Student finished"
                );
                StudentOutcome {
                    account_id,
                    role,
                    client_state,
                    status: Some(record.status),
                    reason: record.reason,
                    error: None,
                }
            }
            Err(e) => {
                warn!(account_id = %account_id, role = ?role, error = %e, "Student could not join");
                StudentOutcome {
                    account_id,
                    role,
                    client_state,
                    status: None,
                    reason: None,
                    error: Some(e.to_string()),
                }
            }
        };
        students.push(outcome);
    }
    students.sort_by(|a, b| a.account_id.cmp(&b.account_id));

    let summary = host.stop().await?;
    let records = host.export_session(&session.session_id).await?;
    acceptor.abort();
    info!(
        session_id = %session.session_id,
        verified = summary.verified,
        rejected = summary.rejected,
        "Simulation complete"
    );

    Ok(Report {
        session,
        summary,
        records,
        students,
    })
}

fn enroll_student(
    config: &Config,
    air: &Air,
    authority: &DeviceBindingAuthority,
    account_id: &str,
    index: usize,
    role: Role,
) -> anyhow::Result<DiscoveryClient> {
    let device = format!("{account_id}-phone");
    air.set_rssi(&device, HOST, rssi_for(index, role));

    let key = DeviceKeyPair::generate();
    let bound = authority.bind(account_id, key.public_key(), BindMode::Fresh)?;

    let engine = TemplateEngine::new(config.enrollment.clone());
    let face = Face::new(index as u64 + 1, config.enrollment.embedding_dim);
    let samples: Vec<_> = (0..config.enrollment.min_samples as u64)
        .map(|n| face.capture(n, Motion::Live))
        .collect();
    let template = engine.enroll(account_id, &samples)?;

    let motion = match role {
        Role::Spoofer => Motion::Static,
        Role::Present | Role::Far => Motion::Live,
    };
    Ok(DiscoveryClient::new(
        config.client.clone(),
        ClientIdentity {
            account_id: account_id.to_string(),
            device_id: bound.device_id,
            device_key: key,
        },
        Arc::new(air.device(&device)),
        Arc::new(SyntheticCamera::new(face, motion)),
        engine,
        template,
    ))
}
