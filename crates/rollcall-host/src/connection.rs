//! Per-connection handshake responder.
//!
//! One task per inbound link: `ConnectRequest` → `NonceResponse` → exactly
//! one `AttendancePacket` within the nonce lifetime → `SubmissionResult`.
//! A `Cancel` frame or a dropped link cancels the nonce; a silent peer lets
//! it expire.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use rollcall_proto::{
    Acceptor, CodecError, Link, RadioError, Refusal, RefusalReason, frame, recv_frame, send_frame,
};

use crate::actor::{ConnectionInfo, SessionHandle};
use crate::error::{HostError, Result};
use crate::host::SessionHost;

/// Accept links until the acceptor closes, handling each on its own task.
pub(crate) async fn accept_loop<A: Acceptor>(mut acceptor: A, host: SessionHost) {
    loop {
        match acceptor.accept().await {
            Ok(link) => {
                let handler = ConnectionHandler {
                    link,
                    host: host.clone(),
                    ttl: host.config().nonce_ttl(),
                };
                tokio::spawn(handler.run());
            }
            Err(e) => {
                warn!(error = %e, "Acceptor closed; no longer accepting connections");
                break;
            }
        }
    }
}

struct ConnectionHandler {
    link: Box<dyn Link>,
    host: SessionHost,
    ttl: Duration,
}

impl ConnectionHandler {
    async fn run(mut self) {
        let peer = self.link.peer().to_string();
        match self.handle().await {
            Ok(()) => debug!(peer, "Connection finished"),
            Err(e) => debug!(peer, error = %e, class = %e.class(), "Connection ended with error"),
        }
    }

    async fn handle(&mut self) -> Result<()> {
        let first = timeout(self.ttl, recv_frame(&mut *self.link))
            .await
            .map_err(|_| RadioError::Timeout(self.ttl))??;
        let Some(frame::Kind::ConnectRequest(request)) = first.kind else {
            return self
                .refuse(RefusalReason::Malformed, "expected connect request")
                .await;
        };

        let Some(session) = self.host.session_for_code(&request.session_code).await else {
            return self
                .refuse(RefusalReason::UnknownSession, &request.session_code)
                .await;
        };

        let connection = ConnectionInfo {
            peer: self.link.peer().to_string(),
            rssi_dbm: self.link.rssi_dbm(),
        };
        let response = match session.issue_nonce(connection).await {
            Ok(response) => response,
            Err(HostError::SessionEnded) => {
                return self.refuse(RefusalReason::SessionEnded, "").await;
            }
            Err(HostError::SessionFull { capacity }) => {
                return self
                    .refuse(RefusalReason::SessionFull, &capacity.to_string())
                    .await;
            }
            Err(e) => return Err(e),
        };
        let nonce = response.nonce.clone();
        if let Err(e) = send_frame(&*self.link, response).await {
            let _ = session.cancel(nonce).await;
            return Err(e.into());
        }

        self.await_packet(&session, nonce).await
    }

    async fn await_packet(&mut self, session: &SessionHandle, nonce: Vec<u8>) -> Result<()> {
        let received = match timeout(self.ttl, recv_frame(&mut *self.link)).await {
            Ok(received) => received,
            Err(_) => {
                info!(
                    session_id = %session.session_id(),
                    peer = %self.link.peer(),
                    "No packet before nonce expiry; dropping connection"
                );
                return Ok(());
            }
        };

        let frame = match received {
            Ok(frame) => frame,
            Err(CodecError::Radio(e)) => {
                let _ = session.cancel(nonce).await;
                return Err(e.into());
            }
            Err(e) => {
                let _ = session.cancel(nonce).await;
                let _ = self.refuse(RefusalReason::Malformed, &e.to_string()).await;
                return Err(e.into());
            }
        };

        let kind_name = frame.kind_name();
        match frame.kind {
            Some(frame::Kind::AttendancePacket(packet)) => {
                match session.submit_on_connection(nonce, packet).await {
                    Ok(outcome) => send_frame(&*self.link, outcome.result)
                        .await
                        .map_err(Into::into),
                    Err(HostError::SessionEnded) => {
                        self.refuse(RefusalReason::SessionEnded, "").await
                    }
                    Err(e) => Err(e),
                }
            }
            Some(frame::Kind::Cancel(cancel)) => {
                // Only the nonce issued on this link can be cancelled from it.
                let matches = cancel.nonce.is_empty() || cancel.nonce == nonce;
                let cancelled = session.cancel(nonce).await?;
                debug!(peer = %self.link.peer(), cancelled, matches, "Client cancelled");
                Ok(())
            }
            _ => {
                let _ = session.cancel(nonce).await;
                self.refuse(RefusalReason::Malformed, kind_name).await
            }
        }
    }

    async fn refuse(&self, reason: RefusalReason, detail: &str) -> Result<()> {
        debug!(peer = %self.link.peer(), ?reason, detail, "Refusing connection");
        send_frame(
            &*self.link,
            Refusal {
                reason: reason.into(),
                detail: detail.to_string(),
            },
        )
        .await
        .map_err(Into::into)
    }
}
