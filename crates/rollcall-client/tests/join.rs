//! End-to-end joins against a real session host over the in-memory radio.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use std::time::Duration;

use rollcall_biometric::{Face, Motion};
use rollcall_client::{ClientError, ClientState, FailureCause};
use rollcall_core::Score;
use rollcall_core::config::ClientConfig;
use rollcall_host::{ConnectionInfo, HostError};
use rollcall_proto::sim::LinkFault;
use rollcall_proto::{AttendanceStatus, FailureClass, SessionCode};

use common::{CODE, Classroom, EMBEDDING_DIM, client_config, code};

#[tokio::test]
async fn student_joins_by_scanning_and_duplicate_is_rejected() {
    let room = Classroom::open(None).await;
    let mut alice = room.genuine("alice", 1);

    let found = alice.scan().await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].code.as_str(), CODE);
    assert_eq!(found[0].course_id, "CS-101");
    assert_eq!(found[0].rssi_dbm, -45);
    alice.select(found[0].clone()).unwrap();
    assert_eq!(alice.state(), ClientState::Found);

    let nonce = alice.connect().await.unwrap();
    assert_eq!(nonce.session_id, room.session.session_id);
    assert_eq!(alice.state(), ClientState::LivenessCheck);

    let score = alice.run_liveness().await.unwrap();
    assert!(score.meets(Score::from_f64(0.85)));
    assert_eq!(alice.state(), ClientState::Submitting);

    let record = alice.submit().await.unwrap();
    assert_eq!(record.status, AttendanceStatus::Verified);
    assert_eq!(alice.state(), ClientState::Completed);
    assert_eq!(
        alice.history().get(&room.session.session_id).unwrap().status,
        AttendanceStatus::Verified
    );

    // Same account, new nonce: rejected, and the local verdict stands.
    let again = alice.attend(&code()).await.unwrap();
    assert_eq!(again.status, AttendanceStatus::Rejected);
    assert_eq!(again.reason.as_deref(), Some("duplicate"));
    assert_eq!(
        alice.history().get(&room.session.session_id).unwrap().status,
        AttendanceStatus::Verified
    );

    let exported = room.host.export_session(&room.session.session_id).await.unwrap();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].account_id, "alice");
    assert_eq!(exported[0].status, AttendanceStatus::Verified);
}

#[tokio::test]
async fn typed_code_is_case_insensitive() {
    let room = Classroom::open(None).await;
    let mut bob = room.genuine("bob", 2);

    let record = bob
        .attend(&SessionCode::parse("ab12cd").unwrap())
        .await
        .unwrap();
    assert_eq!(record.status, AttendanceStatus::Verified);
}

#[tokio::test]
async fn lost_packet_is_retried_with_a_fresh_nonce() {
    let room = Classroom::open(None).await;
    let face = Face::new(3, EMBEDDING_DIM);
    let mut carol = room.student(
        "carol",
        &face,
        face.clone(),
        Motion::Live,
        ClientConfig {
            submission_timeout_ms: 150,
            ..client_config()
        },
    );
    // Frame 0 is the connect request, frame 1 the packet.
    room.air
        .inject_link_fault("carol-phone", LinkFault::LoseOutbound(1));

    carol.attend(&code()).await.unwrap();
    assert_eq!(carol.state(), ClientState::Completed);
    assert_eq!(
        carol.history().get(&room.session.session_id).unwrap().status,
        AttendanceStatus::Verified
    );
}

#[tokio::test]
async fn lost_result_is_confirmed_by_the_duplicate_on_retry() {
    let room = Classroom::open(None).await;
    let face = Face::new(9, EMBEDDING_DIM);
    let mut gina = room.student(
        "gina",
        &face,
        face.clone(),
        Motion::Live,
        ClientConfig {
            submission_timeout_ms: 150,
            ..client_config()
        },
    );
    // Inbound frame 0 is the nonce, frame 1 the submission result.
    room.air
        .inject_link_fault("gina-phone", LinkFault::LoseInbound(1));

    let record = gina.attend(&code()).await.unwrap();
    assert_eq!(record.status, AttendanceStatus::Verified);
    assert_eq!(record.reason, None);
    assert_eq!(gina.state(), ClientState::Completed);
    assert_eq!(
        gina.history().get(&room.session.session_id).unwrap().status,
        AttendanceStatus::Verified
    );

    let ledger = room
        .host
        .export_session(&room.session.session_id)
        .await
        .unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].account_id, "gina");
    assert_eq!(ledger[0].status, AttendanceStatus::Verified);
}

#[tokio::test]
async fn dropped_link_fails_with_connection_lost() {
    let room = Classroom::open(None).await;
    let mut dave = room.genuine("dave", 4);
    room.air
        .inject_link_fault("dave-phone", LinkFault::DropOnConnect);

    dave.join_by_code(&code()).await.unwrap();
    let err = dave.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionLost));
    assert_eq!(err.class(), FailureClass::Transport);
    assert_eq!(
        dave.state(),
        ClientState::Failed(FailureCause::ConnectionLost)
    );
}

#[tokio::test]
async fn disabled_radio_is_reported() {
    let room = Classroom::open(None).await;
    let mut erin = room.genuine("erin", 5);
    room.air.set_radio_enabled("erin-phone", false);

    let err = erin.attend(&code()).await.unwrap_err();
    assert!(matches!(err, ClientError::RadioUnavailable));
    assert_eq!(
        erin.state(),
        ClientState::Failed(FailureCause::RadioUnavailable)
    );
}

#[tokio::test]
async fn unknown_code_is_not_found() {
    let room = Classroom::open(None).await;
    let mut frank = room.genuine("frank", 6);

    let err = frank
        .attend(&SessionCode::parse("ZZ99ZZ").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::SessionNotFound(_)));
    assert_eq!(err.class(), FailureClass::Policy);
}

#[tokio::test]
async fn photo_spoof_fails_liveness_and_releases_nonce() {
    let room = Classroom::open(Some(1)).await;
    let face = Face::new(7, EMBEDDING_DIM);
    let mut mallory = room.student("mallory", &face, face.clone(), Motion::Static, client_config());

    let err = mallory.attend(&code()).await.unwrap_err();
    assert!(matches!(err, ClientError::LivenessFailed { attempts: 3 }));
    assert_eq!(err.class(), FailureClass::Biometric);
    assert_eq!(
        mallory.state(),
        ClientState::Failed(FailureCause::LivenessFailed)
    );
    assert!(mallory.history().is_empty());

    // The only seat frees up once the host processes the cancel.
    wait_for_free_seat(&room).await;
    let summary = room.host.summary().await.unwrap();
    assert_eq!(summary.record_count, 0);
}

#[tokio::test]
async fn impostor_is_below_threshold() {
    let room = Classroom::open(None).await;
    let enrolled = Face::new(8, EMBEDDING_DIM);
    let someone_else = Face::new(80, EMBEDDING_DIM);
    let mut trudy = room.student("trudy", &enrolled, someone_else, Motion::Live, client_config());

    let err = trudy.attend(&code()).await.unwrap_err();
    let ClientError::MatchBelowThreshold { score, threshold } = &err else {
        panic!("expected a low match, got {err}");
    };
    assert!(score < threshold);
    assert_eq!(
        trudy.state(),
        ClientState::Failed(FailureCause::MatchBelowThreshold)
    );
}

#[tokio::test]
async fn cancel_releases_the_nonce() {
    let room = Classroom::open(Some(1)).await;
    let mut grace = room.genuine("grace", 9);

    grace.join_by_code(&code()).await.unwrap();
    grace.connect().await.unwrap();
    // Grace holds the only seat.
    assert!(matches!(
        room.host.issue_nonce(bystander()).await,
        Err(HostError::SessionFull { capacity: 1 })
    ));

    grace.cancel().await.unwrap();
    assert_eq!(grace.state(), ClientState::Failed(FailureCause::Cancelled));
    assert!(grace.cancel().await.is_err());
    wait_for_free_seat(&room).await;
}

#[tokio::test]
async fn steps_out_of_order_do_not_change_state() {
    let room = Classroom::open(None).await;
    let mut heidi = room.genuine("heidi", 10);

    let err = heidi.submit().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::InvalidState {
            state: ClientState::Idle,
            ..
        }
    ));
    assert!(heidi.connect().await.is_err());
    assert!(heidi.reset().is_err());
    assert_eq!(heidi.state(), ClientState::Idle);
}

#[tokio::test]
async fn failed_join_can_be_retried_after_reset() {
    let room = Classroom::open(None).await;
    let mut ivan = room.genuine("ivan", 11);
    room.air.set_radio_enabled("ivan-phone", false);
    assert!(ivan.attend(&code()).await.is_err());

    room.air.set_radio_enabled("ivan-phone", true);
    ivan.reset().unwrap();
    assert_eq!(ivan.state(), ClientState::Idle);
    let record = ivan.attend(&code()).await.unwrap();
    assert_eq!(record.status, AttendanceStatus::Verified);
}

fn bystander() -> ConnectionInfo {
    ConnectionInfo {
        peer: "bystander".into(),
        rssi_dbm: -45,
    }
}

async fn wait_for_free_seat(room: &Classroom) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if room.host.issue_nonce(bystander()).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
