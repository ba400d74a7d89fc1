//! Ledger persistence across host restarts.

#![allow(clippy::unwrap_used)]

mod common;

use rollcall_crypto::DeviceBindingAuthority;
use rollcall_host::{HostError, LedgerDatabase, SessionRegistry, verify_entries};
use rollcall_proto::sim::Air;
use rollcall_proto::{AttendanceStatus, RejectReason};

use common::{Student, conn, host_on, metadata, policy};

#[tokio::test]
async fn stopped_session_exports_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let air = Air::new();
    let authority = DeviceBindingAuthority::new();
    let alice = Student::bind(&authority, "alice");
    let bob = Student::bind(&authority, "bob");

    let session_id = {
        let db = LedgerDatabase::open(&path).await.unwrap();
        let host = host_on(&air, "lectern", &authority, SessionRegistry::new(), Some(db));
        let info = host.start(metadata(), policy()).await.unwrap();

        let n = host.issue_nonce(conn()).await.unwrap();
        host.submit(alice.packet(&n, 9300, -45)).await.unwrap();
        let n = host.issue_nonce(conn()).await.unwrap();
        let far = host.submit(bob.packet(&n, 9300, -90)).await.unwrap();
        assert!(matches!(far.verdict, Err(RejectReason::OutOfRange { .. })));
        let n = host.issue_nonce(conn()).await.unwrap();
        host.submit(bob.packet(&n, 9300, -50)).await.unwrap();

        let summary = host.stop().await.unwrap();
        assert_eq!(summary.verified, 2);
        assert_eq!(summary.entry_count, 3);
        info.session_id
    };

    // A fresh host with an empty arena falls back to the store.
    let db = LedgerDatabase::open(&path).await.unwrap();
    let restarted = host_on(&air, "lectern-2", &authority, SessionRegistry::new(), Some(db.clone()));

    let records = restarted.export_session(&session_id).await.unwrap();
    let accounts: Vec<_> = records.iter().map(|r| r.account_id.as_str()).collect();
    assert_eq!(accounts, ["alice", "bob"]);
    assert!(records.iter().all(|r| r.status == AttendanceStatus::Verified));

    let entries = restarted.entries(&session_id).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1].reason.as_deref(), Some("out_of_range"));
    assert!(verify_entries(&entries).is_ok());

    let row = db.get_session(&session_id).await.unwrap();
    assert!(row.stopped_at.is_some());
    assert_eq!(row.stop_reason.as_deref(), Some("stopped by host"));
}

#[tokio::test]
async fn unknown_session_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let db = LedgerDatabase::open(&dir.path().join("ledger.db")).await.unwrap();
    let authority = DeviceBindingAuthority::new();
    let host = host_on(&Air::new(), "lectern", &authority, SessionRegistry::new(), Some(db));

    assert!(matches!(
        host.export_session("missing").await,
        Err(HostError::UnknownSession(_))
    ));
}
