//! Session arena.
//!
//! Every session started on any host sharing this registry is addressed by
//! its `session_id`. Stopped sessions stay in the arena so their ledgers can
//! still be exported; their codes are released for reuse.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::OsRng;
use tokio::sync::RwLock;
use tracing::debug;

use rollcall_proto::SessionCode;

use crate::actor::SessionHandle;
use crate::error::{HostError, Result};

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, SessionHandle>,
    /// Codes of active sessions, mapped to the owning session id.
    active_codes: HashMap<SessionCode, String>,
}

/// Shared session arena. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a code for `session_id`: `preferred` if it is free, otherwise
    /// a random one that no active session uses.
    pub(crate) async fn allocate_code(
        &self,
        session_id: &str,
        preferred: Option<SessionCode>,
    ) -> Result<SessionCode> {
        let mut inner = self.inner.write().await;
        let code = match preferred {
            Some(code) if inner.active_codes.contains_key(&code) => {
                return Err(HostError::CodeInUse(code));
            }
            Some(code) => code,
            None => loop {
                let candidate = SessionCode::random(&mut OsRng);
                if !inner.active_codes.contains_key(&candidate) {
                    break candidate;
                }
                debug!(code = %candidate, "Session code collision; regenerating");
            },
        };
        inner
            .active_codes
            .insert(code.clone(), session_id.to_string());
        Ok(code)
    }

    pub(crate) async fn insert(&self, handle: SessionHandle) {
        self.inner
            .write()
            .await
            .sessions
            .insert(handle.session_id().to_string(), handle);
    }

    /// Release `code` if it is still held by `session_id`.
    pub(crate) async fn release_code(&self, code: &SessionCode, session_id: &str) {
        let mut inner = self.inner.write().await;
        if inner.active_codes.get(code).is_some_and(|id| id == session_id) {
            inner.active_codes.remove(code);
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.inner.read().await.sessions.get(session_id).cloned()
    }

    /// The active session advertising `code`.
    pub async fn by_code(&self, code: &SessionCode) -> Option<SessionHandle> {
        let inner = self.inner.read().await;
        let session_id = inner.active_codes.get(code)?;
        inner.sessions.get(session_id).cloned()
    }

    pub async fn active_codes(&self) -> Vec<SessionCode> {
        self.inner.read().await.active_codes.keys().cloned().collect()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.inner.read().await.sessions.keys().cloned().collect()
    }

    /// Drop a stopped session from the arena. Active sessions are kept.
    pub async fn forget(&self, session_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get(session_id) {
            Some(handle) if !handle.is_active() => {
                inner.sessions.remove(session_id);
                true
            }
            _ => false,
        }
    }
}
