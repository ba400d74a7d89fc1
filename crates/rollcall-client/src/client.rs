//! The discovery client: one device joining one session at a time.
//!
//! Every operation checks the current [`ClientState`], does its I/O, then
//! feeds the completion event to [`transition`]. Any error that ends the
//! attempt moves the machine to `Failed` and releases the held nonce with a
//! `Cancel` frame so the host never waits on it.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use rollcall_biometric::{BiometricTemplate, CaptureError, CaptureSource, TemplateEngine};
use rollcall_core::Score;
use rollcall_core::config::ClientConfig;
use rollcall_core::db::unix_timestamp_millis;
use rollcall_crypto::DeviceKeyPair;
use rollcall_proto::{
    AttendancePacket, AttendanceRecord, AttendanceStatus, Cancel, ConnectRequest, Connector,
    FailureClass, Link, NONCE_LEN, NonceResponse, PacketClaim, RadioError, RejectReason, Scanner,
    SessionCode, frame, recv_frame, send_frame,
};

use crate::discovery::{Discovery, SessionAdvertisement};
use crate::error::{ClientError, Result};
use crate::history::AttendanceHistory;
use crate::state::{ClientEvent, ClientState, transition};

/// Who this device is: the account and its bound device key.
pub struct ClientIdentity {
    pub account_id: String,
    pub device_id: Uuid,
    pub device_key: DeviceKeyPair,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("account_id", &self.account_id)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// An open link with the nonce the host issued on it.
struct Attempt {
    link: Box<dyn Link>,
    nonce: NonceResponse,
}

pub struct DiscoveryClient {
    config: ClientConfig,
    identity: ClientIdentity,
    discovery: Discovery,
    connector: Arc<dyn Connector>,
    camera: Arc<dyn CaptureSource>,
    engine: TemplateEngine,
    template: BiometricTemplate,
    state: ClientState,
    history: AttendanceHistory,
    target: Option<SessionAdvertisement>,
    attempt: Option<Attempt>,
    score: Option<Score>,
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl DiscoveryClient {
    pub fn new<R>(
        config: ClientConfig,
        identity: ClientIdentity,
        radio: Arc<R>,
        camera: Arc<dyn CaptureSource>,
        engine: TemplateEngine,
        template: BiometricTemplate,
    ) -> Self
    where
        R: Scanner + Connector + 'static,
    {
        let scanner: Arc<dyn Scanner> = radio.clone();
        Self {
            discovery: Discovery::new(scanner, config.scan_window()),
            connector: radio,
            config,
            identity,
            camera,
            engine,
            template,
            state: ClientState::Idle,
            history: AttendanceHistory::default(),
            target: None,
            attempt: None,
            score: None,
        }
    }

    /// Start from a previously saved history.
    #[must_use]
    pub fn with_history(mut self, history: AttendanceHistory) -> Self {
        self.history = history;
        self
    }

    pub const fn state(&self) -> ClientState {
        self.state
    }

    pub const fn history(&self) -> &AttendanceHistory {
        &self.history
    }

    pub const fn target(&self) -> Option<&SessionAdvertisement> {
        self.target.as_ref()
    }

    pub fn account_id(&self) -> &str {
        &self.identity.account_id
    }

    pub const fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    fn advance(&mut self, event: ClientEvent, operation: &'static str) -> Result<()> {
        let next = transition(self.state, event).map_err(|e| ClientError::InvalidState {
            operation,
            state: e.from,
        })?;
        debug!(
            account_id = %self.identity.account_id,
            from = %self.state,
            to = %next,
            "Client state transition"
        );
        self.state = next;
        Ok(())
    }

    fn ensure_state(&self, expected: ClientState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ClientError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// End the attempt: release the nonce and move to `Failed`.
    async fn fail(&mut self, error: ClientError) -> ClientError {
        self.release_nonce().await;
        if let Ok(next) = transition(self.state, ClientEvent::Fail(error.cause())) {
            self.state = next;
        }
        warn!(
            account_id = %self.identity.account_id,
            error = %error,
            class = %error.class(),
            "Join attempt failed"
        );
        error
    }

    async fn release_nonce(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            let cancel = Cancel {
                nonce: attempt.nonce.nonce.clone(),
            };
            if send_frame(&*attempt.link, cancel).await.is_ok() {
                debug!(session_id = %attempt.nonce.session_id, "Released nonce");
            }
        }
    }

    /// Scan and return every session in range, strongest first.
    pub async fn scan(&mut self) -> Result<Vec<SessionAdvertisement>> {
        if self.state != ClientState::Scanning {
            self.advance(ClientEvent::ScanStarted, "scan")?;
        }
        match self.discovery.scan_all().await {
            Ok(found) => Ok(found),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Pick one of the scanned sessions.
    pub fn select(&mut self, advertisement: SessionAdvertisement) -> Result<()> {
        self.advance(ClientEvent::SessionSelected, "select a session")?;
        info!(
            account_id = %self.identity.account_id,
            code = %advertisement.code,
            rssi_dbm = advertisement.rssi_dbm,
            "Session selected"
        );
        self.target = Some(advertisement);
        Ok(())
    }

    /// Scan for the session with a code typed in by the user and select it.
    pub async fn join_by_code(&mut self, code: &SessionCode) -> Result<SessionAdvertisement> {
        if self.state != ClientState::Scanning {
            self.advance(ClientEvent::ScanStarted, "join by code")?;
        }
        match self.discovery.find(code).await {
            Ok(ad) => {
                self.select(ad.clone())?;
                Ok(ad)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Connect to the selected session and obtain a nonce.
    pub async fn connect(&mut self) -> Result<NonceResponse> {
        self.advance(ClientEvent::ConnectStarted, "connect")?;
        match self.open_attempt().await {
            Ok(nonce) => {
                self.advance(ClientEvent::NonceReceived, "connect")?;
                Ok(nonce)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn open_attempt(&mut self) -> Result<NonceResponse> {
        let target = self.target.clone().ok_or(ClientError::InvalidState {
            operation: "connect",
            state: self.state,
        })?;
        let timeout = self.config.connect_timeout();

        let mut link = tokio::time::timeout(timeout, self.connector.connect(&target.address))
            .await
            .map_err(|_| ClientError::Radio(RadioError::Timeout(timeout)))??;
        send_frame(
            &*link,
            ConnectRequest {
                session_code: target.code.to_string(),
            },
        )
        .await?;
        let reply = tokio::time::timeout(timeout, recv_frame(&mut *link))
            .await
            .map_err(|_| ClientError::Radio(RadioError::Timeout(timeout)))??;

        let nonce = match reply.kind {
            Some(frame::Kind::NonceResponse(nonce)) => nonce,
            Some(frame::Kind::Refusal(refusal)) => {
                return Err(ClientError::Refused {
                    reason: refusal.reason(),
                    detail: refusal.detail,
                });
            }
            _ => return Err(ClientError::InvalidResponse("nonce response")),
        };
        if nonce.nonce.len() != NONCE_LEN || !nonce.verify() {
            return Err(ClientError::InvalidResponse("nonce response"));
        }
        // A refreshed nonce must come from the same session key.
        if let Some(previous) = &self.attempt
            && previous.nonce.session_public_key != nonce.session_public_key
        {
            return Err(ClientError::InvalidResponse("session key"));
        }

        info!(
            account_id = %self.identity.account_id,
            session_id = %nonce.session_id,
            code = %target.code,
            "Nonce received"
        );
        self.attempt = Some(Attempt {
            link,
            nonce: nonce.clone(),
        });
        Ok(nonce)
    }

    /// Check liveness, then match against the template, with a bounded
    /// number of fresh capture cycles. The capture never leaves the device.
    pub async fn run_liveness(&mut self) -> Result<Score> {
        self.ensure_state(ClientState::LivenessCheck, "run liveness")?;
        let threshold = Score::from_f64(self.config.match_threshold);
        let attempts = self.config.max_biometric_attempts.max(1);

        let mut last = None;
        for attempt in 1..=attempts {
            match self.capture_and_match(threshold).await {
                Ok(score) => {
                    info!(
                        account_id = %self.identity.account_id,
                        score = %score,
                        attempt,
                        "Liveness and match passed"
                    );
                    self.score = Some(score);
                    self.advance(ClientEvent::LivenessPassed, "run liveness")?;
                    return Ok(score);
                }
                Err(e) if e.class() == FailureClass::Biometric => {
                    warn!(
                        account_id = %self.identity.account_id,
                        attempt,
                        error = %e,
                        "Biometric attempt failed"
                    );
                    last = Some(e);
                }
                Err(e) => return Err(self.fail(e).await),
            }
        }

        let error = match last {
            Some(e @ ClientError::MatchBelowThreshold { .. }) => e,
            _ => ClientError::LivenessFailed { attempts },
        };
        Err(self.fail(error).await)
    }

    async fn capture_and_match(&self, threshold: Score) -> Result<Score> {
        let capture = match self.camera.capture().await {
            Ok(capture) => capture,
            Err(CaptureError::NoFace) => return Err(ClientError::LivenessFailed { attempts: 1 }),
            Err(e) => return Err(e.into()),
        };
        if !self.engine.check_liveness(&capture.frames) {
            return Err(ClientError::LivenessFailed { attempts: 1 });
        }
        let score = self.engine.match_live(&self.template, &capture)?;
        if !score.meets(threshold) {
            return Err(ClientError::MatchBelowThreshold { score, threshold });
        }
        Ok(score)
    }

    /// Sign and send the attendance packet and wait for the host's verdict.
    ///
    /// A transport failure is retried once, always with a freshly issued
    /// nonce. A nonce that has already expired locally is replaced before
    /// it is used. When the retry is refused as a duplicate, the first
    /// packet reached the host and was verified, so the record is reported
    /// as verified.
    pub async fn submit(&mut self) -> Result<AttendanceRecord> {
        self.ensure_state(ClientState::Submitting, "submit")?;
        let score = self.score.ok_or(ClientError::InvalidState {
            operation: "submit",
            state: self.state,
        })?;

        for attempt in 0..2 {
            if attempt > 0 || self.nonce_expired() {
                debug!(account_id = %self.identity.account_id, attempt, "Refreshing nonce");
                if let Err(e) = self.refresh_nonce().await {
                    let error = if e.class() == FailureClass::Transport {
                        ClientError::SubmissionFailed(e.to_string())
                    } else {
                        e
                    };
                    return Err(self.fail(error).await);
                }
            }

            match self.send_packet(score).await {
                Ok(record) => {
                    let record = if attempt > 0 {
                        confirm_earlier_send(record)
                    } else {
                        record
                    };
                    self.history.resolve(record.clone());
                    self.advance(ClientEvent::ResultReceived, "submit")?;
                    info!(
                        account_id = %self.identity.account_id,
                        session_id = %record.session_id,
                        status = record.status.as_str(),
                        reason = record.reason.as_deref().unwrap_or(""),
                        "Attendance result received"
                    );
                    return Ok(record);
                }
                Err(e) if e.class() == FailureClass::Transport && attempt == 0 => {
                    warn!(
                        account_id = %self.identity.account_id,
                        error = %e,
                        "Submission failed; retrying once with a fresh nonce"
                    );
                }
                Err(e) if e.class() == FailureClass::Transport => {
                    return Err(self.fail(ClientError::SubmissionFailed(e.to_string())).await);
                }
                Err(e) => return Err(self.fail(e).await),
            }
        }
        Err(self
            .fail(ClientError::SubmissionFailed("retry exhausted".into()))
            .await)
    }

    fn nonce_expired(&self) -> bool {
        self.attempt
            .as_ref()
            .is_none_or(|a| unix_timestamp_millis() >= a.nonce.expires_at_ms)
    }

    async fn refresh_nonce(&mut self) -> Result<()> {
        if let Some(stale) = &self.attempt {
            let cancel = Cancel {
                nonce: stale.nonce.nonce.clone(),
            };
            let _ = send_frame(&*stale.link, cancel).await;
        }
        // The stale attempt stays in place so the new nonce can be checked
        // against its session key.
        match self.open_attempt().await {
            Ok(_) => self.advance(ClientEvent::NonceRefreshed, "refresh nonce"),
            Err(e) => {
                self.attempt = None;
                Err(e)
            }
        }
    }

    async fn send_packet(&mut self, score: Score) -> Result<AttendanceRecord> {
        let attempt = self.attempt.as_mut().ok_or(ClientError::ConnectionLost)?;
        let claim = PacketClaim {
            session_id: attempt.nonce.session_id.clone(),
            account_id: self.identity.account_id.clone(),
            device_id: self.identity.device_id.to_string(),
            nonce: attempt.nonce.nonce.clone(),
            liveness_score: score.basis_points(),
            rssi_at_capture: attempt.link.rssi_dbm(),
            client_timestamp_ms: unix_timestamp_millis(),
        };
        let packet = AttendancePacket::sign(claim, &self.identity.device_key);
        self.history.mark_pending(
            &packet.session_id,
            &packet.account_id,
            packet.client_timestamp_ms,
        );

        send_frame(&*attempt.link, packet).await?;
        let timeout = self.config.submission_timeout();
        let reply = tokio::time::timeout(timeout, recv_frame(&mut *attempt.link))
            .await
            .map_err(|_| ClientError::Radio(RadioError::Timeout(timeout)))??;

        let result = match reply.kind {
            Some(frame::Kind::SubmissionResult(result)) => result,
            Some(frame::Kind::Refusal(refusal)) => {
                return Err(ClientError::Refused {
                    reason: refusal.reason(),
                    detail: refusal.detail,
                });
            }
            _ => return Err(ClientError::InvalidResponse("submission result")),
        };
        if result.nonce != attempt.nonce.nonce
            || result.session_id != attempt.nonce.session_id
            || !result.verify(&attempt.nonce.session_public_key)
        {
            return Err(ClientError::InvalidResponse("submission result"));
        }

        let record = AttendanceRecord::from_result(&self.identity.account_id, &result);
        self.attempt = None;
        Ok(record)
    }

    /// Abort the current attempt. The host treats the released nonce as
    /// expired.
    pub async fn cancel(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(ClientError::InvalidState {
                operation: "cancel",
                state: self.state,
            });
        }
        self.release_nonce().await;
        self.advance(ClientEvent::Cancel, "cancel")?;
        info!(account_id = %self.identity.account_id, "Join cancelled");
        Ok(())
    }

    /// Return to `Idle` after a completed or failed attempt.
    pub fn reset(&mut self) -> Result<()> {
        self.advance(ClientEvent::Reset, "reset")?;
        self.target = None;
        self.attempt = None;
        self.score = None;
        Ok(())
    }

    /// The whole join: find `code`, connect, verify the user, submit.
    pub async fn attend(&mut self, code: &SessionCode) -> Result<AttendanceRecord> {
        if self.state.is_terminal() {
            self.reset()?;
        }
        self.join_by_code(code).await?;
        self.connect().await?;
        self.run_liveness().await?;
        self.submit().await
    }
}

/// A `duplicate` verdict on a retry means the host already holds a verified
/// record for this account, written from the packet whose result was lost.
fn confirm_earlier_send(record: AttendanceRecord) -> AttendanceRecord {
    if record.status == AttendanceStatus::Rejected
        && record.reason.as_deref() == Some(RejectReason::Duplicate.code())
    {
        info!(
            account_id = %record.account_id,
            session_id = %record.session_id,
            "Retry refused as duplicate; earlier submission was verified"
        );
        AttendanceRecord {
            status: AttendanceStatus::Verified,
            reason: None,
            ..record
        }
    } else {
        record
    }
}
