//! Session actor.
//!
//! Each session runs as one tokio task that exclusively owns its nonce
//! table and ledger. Every other component talks to it through a
//! [`SessionHandle`], sending commands over `mpsc` and awaiting `oneshot`
//! replies. Because the actor processes one command at a time, two packets
//! for the same account can never both be recorded verified, and a stop
//! either happens before or after an in-flight submission, never during it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rollcall_crypto::{DeviceBindingAuthority, DeviceKeyPair};
use rollcall_proto::{
    AttendancePacket, AttendanceRecord, AttendanceStatus, NonceResponse, RejectReason,
    SubmissionResult, ValidationContext, validate,
};

use crate::error::{HostError, Result};
use crate::ledger::{Ledger, LedgerEntry};
use crate::nonce::NonceTable;
use crate::registry::SessionRegistry;
use crate::session::{SessionInfo, SessionSummary, StopReason};
use crate::storage::{PersistOp, PersistSender};

/// The radio peer behind a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub peer: String,
    pub rssi_dbm: i32,
}

/// What happened to a submitted packet.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub verdict: std::result::Result<(), RejectReason>,
    /// The account's record after this submission.
    pub record: AttendanceRecord,
    pub entry: LedgerEntry,
    /// Signed result to send back to the client.
    pub result: SubmissionResult,
}

enum Command {
    IssueNonce {
        connection: ConnectionInfo,
        reply: oneshot::Sender<Result<NonceResponse>>,
    },
    Submit {
        packet: Box<AttendancePacket>,
        issued: Option<Vec<u8>>,
        reply: oneshot::Sender<Result<SubmissionOutcome>>,
    },
    Cancel {
        nonce: Vec<u8>,
        reply: oneshot::Sender<bool>,
    },
    Stop {
        reason: StopReason,
        reply: oneshot::Sender<SessionSummary>,
    },
    Summary {
        reply: oneshot::Sender<SessionSummary>,
    },
    Export {
        reply: oneshot::Sender<Vec<AttendanceRecord>>,
    },
    Entries {
        reply: oneshot::Sender<Vec<LedgerEntry>>,
    },
}

/// Address of a running session actor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    info: Arc<SessionInfo>,
    tx: mpsc::Sender<Command>,
    active: watch::Receiver<bool>,
}

impl SessionHandle {
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn session_id(&self) -> &str {
        &self.info.session_id
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Wait until the session has stopped.
    pub async fn stopped(&self) {
        let mut active = self.active.clone();
        let _ = active.wait_for(|a| !*a).await;
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| HostError::ActorGone)?;
        rx.await.map_err(|_| HostError::ActorGone)
    }

    pub async fn issue_nonce(&self, connection: ConnectionInfo) -> Result<NonceResponse> {
        self.request(|reply| Command::IssueNonce { connection, reply })
            .await?
    }

    pub async fn submit(&self, packet: AttendancePacket) -> Result<SubmissionOutcome> {
        self.request(|reply| Command::Submit {
            packet: Box::new(packet),
            issued: None,
            reply,
        })
        .await?
    }

    /// Submit a packet received on the connection that was issued `issued`.
    /// A packet quoting any other nonce is rejected as unknown and leaves
    /// that nonce untouched; `issued` is consumed either way.
    pub(crate) async fn submit_on_connection(
        &self,
        issued: Vec<u8>,
        packet: AttendancePacket,
    ) -> Result<SubmissionOutcome> {
        self.request(|reply| Command::Submit {
            packet: Box::new(packet),
            issued: Some(issued),
            reply,
        })
        .await?
    }

    /// Cancel an open nonce. Returns whether it was open.
    pub async fn cancel(&self, nonce: Vec<u8>) -> Result<bool> {
        self.request(|reply| Command::Cancel { nonce, reply }).await
    }

    /// Stop the session. Later calls return the first call's summary.
    pub async fn stop(&self, reason: StopReason) -> Result<SessionSummary> {
        self.request(|reply| Command::Stop { reason, reply }).await
    }

    pub async fn summary(&self) -> Result<SessionSummary> {
        self.request(|reply| Command::Summary { reply }).await
    }

    pub async fn export(&self) -> Result<Vec<AttendanceRecord>> {
        self.request(|reply| Command::Export { reply }).await
    }

    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        self.request(|reply| Command::Entries { reply }).await
    }
}

/// Wall-clock milliseconds that follow tokio's clock, so timeouts and nonce
/// expiry agree (and advance together in tests with a paused clock).
#[derive(Debug, Clone, Copy)]
struct SessionClock {
    wall_origin_ms: i64,
    origin: Instant,
}

impl SessionClock {
    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.wall_origin_ms.saturating_add(elapsed)
    }
}

pub(crate) struct ActorParams {
    pub info: SessionInfo,
    pub session_key: DeviceKeyPair,
    pub authority: DeviceBindingAuthority,
    pub registry: SessionRegistry,
    pub persist: Option<PersistSender>,
    pub broadcast_cancel: CancellationToken,
    pub nonce_ttl: Duration,
    pub queue_depth: usize,
}

struct SessionActor {
    info: Arc<SessionInfo>,
    session_key: DeviceKeyPair,
    authority: DeviceBindingAuthority,
    registry: SessionRegistry,
    persist: Option<PersistSender>,
    broadcast_cancel: CancellationToken,
    clock: SessionClock,
    nonces: NonceTable,
    ledger: Ledger,
    active: watch::Sender<bool>,
    stopped: Option<SessionSummary>,
}

/// Start the actor task for a new session.
pub(crate) fn spawn(params: ActorParams) -> SessionHandle {
    let (tx, rx) = mpsc::channel(params.queue_depth.max(1));
    let (active_tx, active_rx) = watch::channel(true);
    let info = Arc::new(params.info);
    let ttl_ms = i64::try_from(params.nonce_ttl.as_millis()).unwrap_or(i64::MAX);

    let actor = SessionActor {
        info: Arc::clone(&info),
        session_key: params.session_key,
        authority: params.authority,
        registry: params.registry,
        persist: params.persist,
        broadcast_cancel: params.broadcast_cancel,
        clock: SessionClock {
            wall_origin_ms: info.started_at_ms,
            origin: Instant::now(),
        },
        nonces: NonceTable::new(&info.session_id, ttl_ms),
        ledger: Ledger::new(&info.session_id),
        active: active_tx,
        stopped: None,
    };
    let sweep_every = (params.nonce_ttl / 2).max(Duration::from_millis(100));
    tokio::spawn(actor.run(rx, sweep_every));

    SessionHandle {
        info,
        tx,
        active: active_rx,
    }
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, sweep_every: Duration) {
        let mut sweep = tokio::time::interval(sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                _ = sweep.tick() => {
                    if self.stopped.is_none() {
                        self.nonces.sweep(self.clock.now_ms());
                    }
                }
            }
        }
        debug!(session_id = %self.info.session_id, "Session actor exited");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::IssueNonce { connection, reply } => {
                let _ = reply.send(self.issue_nonce(&connection));
            }
            Command::Submit {
                packet,
                issued,
                reply,
            } => {
                let _ = reply.send(self.submit(&packet, issued.as_deref()));
            }
            Command::Cancel { nonce, reply } => {
                let cancelled = self.stopped.is_none() && self.nonces.cancel(&nonce);
                if cancelled {
                    debug!(session_id = %self.info.session_id, nonce = %hex::encode(&nonce), "Nonce cancelled");
                }
                let _ = reply.send(cancelled);
            }
            Command::Stop { reason, reply } => {
                let summary = self.stop(reason).await;
                let _ = reply.send(summary);
            }
            Command::Summary { reply } => {
                let _ = reply.send(self.summary());
            }
            Command::Export { reply } => {
                let _ = reply.send(self.ledger.export());
            }
            Command::Entries { reply } => {
                let _ = reply.send(self.ledger.entries().to_vec());
            }
        }
    }

    fn issue_nonce(&mut self, connection: &ConnectionInfo) -> Result<NonceResponse> {
        if self.stopped.is_some() {
            return Err(HostError::SessionEnded);
        }
        let now = self.clock.now_ms();
        self.nonces.sweep(now);

        if let Some(capacity) = self.info.policy.capacity {
            let committed =
                self.ledger.count(AttendanceStatus::Verified) + self.nonces.open_count();
            if committed >= capacity {
                warn!(session_id = %self.info.session_id, peer = %connection.peer, capacity, "Session full; refusing connection");
                return Err(HostError::SessionFull { capacity });
            }
        }

        let view = self.nonces.issue(now);
        debug!(
            session_id = %self.info.session_id,
            peer = %connection.peer,
            rssi_dbm = connection.rssi_dbm,
            nonce = %hex::encode(&view.value),
            "Nonce issued"
        );
        Ok(NonceResponse::signed(
            view.value,
            self.info.session_id.clone(),
            view.expires_at_ms,
            &self.session_key,
        ))
    }

    fn submit(
        &mut self,
        packet: &AttendancePacket,
        issued: Option<&[u8]>,
    ) -> Result<SubmissionOutcome> {
        if self.stopped.is_some() {
            return Err(HostError::SessionEnded);
        }
        let now = self.clock.now_ms();
        let foreign = issued.is_some_and(|n| n != packet.nonce.as_slice());
        let nonce_view = if foreign {
            None
        } else {
            self.nonces.lookup(&packet.nonce).cloned()
        };
        let ctx = ValidationContext {
            session_id: &self.info.session_id,
            now_ms: now,
            nonce: nonce_view.as_ref(),
            authority: &self.authority,
            liveness_threshold: self.info.policy.liveness_threshold,
            rssi_floor_dbm: self.info.policy.rssi_floor_dbm,
            already_verified: self.ledger.is_verified(&packet.account_id),
        };
        let verdict = validate(packet, &ctx);

        // Used once, whatever the verdict.
        self.nonces.consume(issued.unwrap_or(&packet.nonce));

        let (entry, record) = self.ledger.append(packet, &verdict, now)?;
        if let Some(persist) = &self.persist {
            let _ = persist.send(PersistOp::Entry(Box::new(entry.clone())));
        }

        match &verdict {
            Ok(()) => info!(
                session_id = %self.info.session_id,
                account_id = %packet.account_id,
                device_id = %packet.device_id,
                "Attendance verified"
            ),
            Err(reason) => warn!(
                session_id = %self.info.session_id,
                account_id = %packet.account_id,
                device_id = %packet.device_id,
                reason = reason.code(),
                step = ?reason.step(),
                class = %reason.class(),
                "Attendance rejected"
            ),
        }

        let wire_verdict = verdict.as_ref().map(|&()| ()).map_err(RejectReason::code);
        let result = SubmissionResult::signed(
            self.info.session_id.clone(),
            packet.nonce.clone(),
            wire_verdict,
            entry.recorded_at_ms,
            &self.session_key,
        );
        Ok(SubmissionOutcome {
            verdict,
            record,
            entry,
            result,
        })
    }

    async fn stop(&mut self, reason: StopReason) -> SessionSummary {
        if let Some(summary) = &self.stopped {
            debug!(session_id = %self.info.session_id, "Stop on stopped session; returning cached summary");
            return summary.clone();
        }

        let invalidated = self.nonces.invalidate_all();
        self.broadcast_cancel.cancel();
        let _ = self.active.send(false);
        self.registry
            .release_code(&self.info.code, &self.info.session_id)
            .await;

        let stopped_at_ms = self.clock.now_ms();
        let mut summary = self.summary();
        summary.reason = Some(reason.clone());
        summary.stopped_at_ms = Some(stopped_at_ms);
        self.stopped = Some(summary.clone());

        if let Some(persist) = &self.persist {
            let _ = persist.send(PersistOp::SessionStopped {
                session_id: self.info.session_id.clone(),
                stopped_at_ms,
                reason: reason.clone(),
            });
            let (done, flushed) = oneshot::channel();
            if persist.send(PersistOp::Flush(done)).is_ok() {
                let _ = flushed.await;
            }
        }

        info!(
            session_id = %self.info.session_id,
            code = %self.info.code,
            reason = %reason,
            records = summary.record_count,
            verified = summary.verified,
            rejected = summary.rejected,
            invalidated_nonces = invalidated,
            "Session stopped"
        );
        summary
    }

    fn summary(&self) -> SessionSummary {
        if let Some(summary) = &self.stopped {
            return summary.clone();
        }
        SessionSummary {
            session_id: self.info.session_id.clone(),
            code: self.info.code.clone(),
            record_count: self.ledger.record_count(),
            verified: self.ledger.count(AttendanceStatus::Verified),
            rejected: self.ledger.count(AttendanceStatus::Rejected),
            entry_count: self.ledger.entries().len(),
            reason: None,
            stopped_at_ms: None,
        }
    }
}
