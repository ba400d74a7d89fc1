//! Session host.
//!
//! One [`SessionHost`] per host device. It owns at most one active session
//! at a time (`Idle → Active → Stopped`), starts the advertisement loop for
//! it and serves inbound radio links. Sessions live in a [`SessionRegistry`]
//! that several hosts may share, which is what keeps session codes unique
//! across every active session.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use rollcall_core::config::HostConfig;
use rollcall_core::db::unix_timestamp_millis;
use rollcall_crypto::{DeviceBindingAuthority, DeviceKeyPair};
use rollcall_proto::{
    Acceptor, Advertisement, Advertiser, AttendancePacket, AttendanceRecord, BROADCAST_VERSION,
    NonceResponse, SessionCode,
};

use crate::actor::{self, ActorParams, ConnectionInfo, SessionHandle, SubmissionOutcome};
use crate::broadcaster::spawn_broadcaster;
use crate::connection::accept_loop;
use crate::error::{HostError, Result};
use crate::ledger::{Ledger, LedgerEntry};
use crate::registry::SessionRegistry;
use crate::session::{SessionInfo, SessionMetadata, SessionPolicy, SessionSummary, StopReason};
use crate::storage::{DatabaseError, LedgerDatabase, PersistOp, PersistSender, spawn_writer};

struct HostInner {
    host_device_id: Uuid,
    registry: SessionRegistry,
    authority: DeviceBindingAuthority,
    config: HostConfig,
    advertiser: Arc<dyn Advertiser>,
    store: Option<(LedgerDatabase, PersistSender)>,
    current: Mutex<Option<SessionHandle>>,
}

/// The host role of one device. Cheap to clone.
#[derive(Clone)]
pub struct SessionHost {
    inner: Arc<HostInner>,
}

impl std::fmt::Debug for SessionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHost")
            .field("host_device_id", &self.inner.host_device_id)
            .field("persistent", &self.inner.store.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SessionHost`].
pub struct SessionHostBuilder {
    host_device_id: Uuid,
    authority: DeviceBindingAuthority,
    advertiser: Arc<dyn Advertiser>,
    config: HostConfig,
    registry: SessionRegistry,
    store: Option<LedgerDatabase>,
}

impl SessionHostBuilder {
    #[must_use]
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a session arena with other hosts.
    #[must_use]
    pub fn registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Persist sessions and ledger entries to `db`.
    #[must_use]
    pub fn store(mut self, db: LedgerDatabase) -> Self {
        self.store = Some(db);
        self
    }

    /// Build the host. Must be called inside a tokio runtime when a store
    /// is configured.
    pub fn build(self) -> SessionHost {
        let store = self.store.map(|db| {
            let persist = spawn_writer(db.clone());
            (db, persist)
        });
        SessionHost {
            inner: Arc::new(HostInner {
                host_device_id: self.host_device_id,
                registry: self.registry,
                authority: self.authority,
                config: self.config,
                advertiser: self.advertiser,
                store,
                current: Mutex::new(None),
            }),
        }
    }
}

impl SessionHost {
    pub fn builder(
        host_device_id: Uuid,
        authority: DeviceBindingAuthority,
        advertiser: Arc<dyn Advertiser>,
    ) -> SessionHostBuilder {
        SessionHostBuilder {
            host_device_id,
            authority,
            advertiser,
            config: HostConfig::default(),
            registry: SessionRegistry::new(),
            store: None,
        }
    }

    pub fn host_device_id(&self) -> Uuid {
        self.inner.host_device_id
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Start a session with a freshly generated code.
    pub async fn start(
        &self,
        metadata: SessionMetadata,
        policy: SessionPolicy,
    ) -> Result<SessionInfo> {
        self.start_inner(metadata, policy, None).await
    }

    /// Start a session under a chosen code. Fails with
    /// [`HostError::CodeInUse`] if an active session already holds it.
    pub async fn start_with_code(
        &self,
        metadata: SessionMetadata,
        policy: SessionPolicy,
        code: SessionCode,
    ) -> Result<SessionInfo> {
        self.start_inner(metadata, policy, Some(code)).await
    }

    #[allow(clippy::significant_drop_tightening)]
    async fn start_inner(
        &self,
        metadata: SessionMetadata,
        policy: SessionPolicy,
        preferred: Option<SessionCode>,
    ) -> Result<SessionInfo> {
        let mut current = self.inner.current.lock().await;
        if let Some(handle) = current.as_ref().filter(|h| h.is_active()) {
            return Err(HostError::AlreadyActive {
                session_id: handle.session_id().to_string(),
            });
        }

        let session_id = Uuid::new_v4().to_string();
        let code = self
            .inner
            .registry
            .allocate_code(&session_id, preferred)
            .await?;
        let session_key = DeviceKeyPair::generate();
        let info = SessionInfo {
            session_id: session_id.clone(),
            code: code.clone(),
            host_device_id: self.inner.host_device_id,
            metadata,
            policy,
            session_public_key: hex::encode(session_key.public_bytes()),
            started_at_ms: unix_timestamp_millis(),
        };

        let persist = self.inner.store.as_ref().map(|(_, tx)| tx.clone());
        if let Some(persist) = &persist {
            let _ = persist.send(PersistOp::SessionStarted(Box::new(info.clone())));
        }

        let broadcast_cancel = CancellationToken::new();
        let handle = actor::spawn(ActorParams {
            info: info.clone(),
            session_key,
            authority: self.inner.authority.clone(),
            registry: self.inner.registry.clone(),
            persist,
            broadcast_cancel: broadcast_cancel.clone(),
            nonce_ttl: self.inner.config.nonce_ttl(),
            queue_depth: self.inner.config.command_queue_depth,
        });
        self.inner.registry.insert(handle.clone()).await;

        let advertisement = Advertisement {
            session_code: code.to_string(),
            course_id: info.metadata.course_id.clone(),
            broadcast_version: BROADCAST_VERSION,
        };
        spawn_broadcaster(
            Arc::clone(&self.inner.advertiser),
            advertisement,
            self.inner.config.advertisement_interval(),
            handle.clone(),
            broadcast_cancel,
        );
        *current = Some(handle);

        info!(
            session_id = %info.session_id,
            code = %info.code,
            course_id = %info.metadata.course_id,
            liveness_threshold = %info.policy.liveness_threshold,
            rssi_floor_dbm = info.policy.rssi_floor_dbm,
            "Session started"
        );
        Ok(info)
    }

    /// The most recently started session, active or stopped.
    pub async fn current_session(&self) -> Option<SessionHandle> {
        self.inner.current.lock().await.clone()
    }

    async fn current_or_err(&self) -> Result<SessionHandle> {
        self.current_session().await.ok_or(HostError::NoSession)
    }

    /// The session a connecting client asked for by code. Only this host's
    /// own current session is served, even after it stops, so a late client
    /// is told the session ended rather than that it never existed.
    pub(crate) async fn session_for_code(&self, code: &str) -> Option<SessionHandle> {
        let code = SessionCode::parse(code).ok()?;
        self.current_session()
            .await
            .filter(|handle| handle.info().code == code)
    }

    /// Issue a nonce on the current session.
    pub async fn issue_nonce(&self, connection: ConnectionInfo) -> Result<NonceResponse> {
        self.current_or_err().await?.issue_nonce(connection).await
    }

    pub async fn submit(&self, packet: AttendancePacket) -> Result<SubmissionOutcome> {
        self.current_or_err().await?.submit(packet).await
    }

    /// Cancel an open nonce on the current session.
    pub async fn cancel(&self, nonce: &[u8]) -> Result<bool> {
        self.current_or_err().await?.cancel(nonce.to_vec()).await
    }

    /// Stop the current session. Calling it again returns the same summary.
    pub async fn stop(&self) -> Result<SessionSummary> {
        self.current_or_err()
            .await?
            .stop(StopReason::Requested)
            .await
    }

    pub async fn summary(&self) -> Result<SessionSummary> {
        self.current_or_err().await?.summary().await
    }

    /// Attendance records of any session this host's arena or store knows.
    pub async fn export_session(&self, session_id: &str) -> Result<Vec<AttendanceRecord>> {
        if let Some(handle) = self.inner.registry.get(session_id).await {
            return handle.export().await;
        }
        Ok(self.load_ledger(session_id).await?.export())
    }

    /// Full audit log of a session.
    pub async fn entries(&self, session_id: &str) -> Result<Vec<LedgerEntry>> {
        if let Some(handle) = self.inner.registry.get(session_id).await {
            return handle.entries().await;
        }
        Ok(self.load_ledger(session_id).await?.entries().to_vec())
    }

    async fn load_ledger(&self, session_id: &str) -> Result<Ledger> {
        let Some((db, _)) = &self.inner.store else {
            return Err(HostError::UnknownSession(session_id.to_string()));
        };
        db.get_session(session_id).await.map_err(|e| match e {
            DatabaseError::NotFound(_) => {
                HostError::UnknownSession(session_id.to_string())
            }
            other => other.into(),
        })?;
        let entries = db.load_verified_entries(session_id).await?;
        Ok(Ledger::from_entries(session_id, entries)?)
    }

    /// Serve inbound links from `acceptor` until it closes.
    pub fn serve<A: Acceptor + 'static>(&self, acceptor: A) -> JoinHandle<()> {
        tokio::spawn(accept_loop(acceptor, self.clone()))
    }
}
