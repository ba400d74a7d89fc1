//! Device Binding Authority.
//!
//! Binds one device public key to one account and is the single place where
//! attendance signatures are checked. Verification fails closed: an unknown
//! or revoked device, a malformed signature or an unreadable binding table
//! all verify as `false`.
//!
//! Every successful bind is also reported to the identity backend. That call
//! is fire-and-forget: its failure never blocks local participation, the
//! registration is queued and retried by [`DeviceBindingAuthority::reconcile`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use rollcall_core::db::unix_timestamp_millis;

/// A device public key bound to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: Uuid,
    pub account_id: String,
    pub public_key: VerifyingKey,
    pub created_at: i64,
    /// Set once when the binding is revoked; never cleared.
    pub revoked_at: Option<i64>,
}

impl DeviceIdentity {
    pub const fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// How `bind` treats an account, or a key, that already has an active binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindMode {
    /// Fail with [`BindingError::AlreadyBound`] or [`BindingError::KeyAlreadyBound`].
    #[default]
    Fresh,
    /// Revoke the existing bindings of the account and of the key, then
    /// create the new one.
    RevokeAndRebind,
}

/// Binding errors.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("Account {account_id} already has an active device binding ({device_id})")]
    AlreadyBound { account_id: String, device_id: Uuid },

    #[error("Device key is already bound to account {account_id} ({device_id})")]
    KeyAlreadyBound { account_id: String, device_id: Uuid },

    #[error("Unknown device: {0}")]
    UnknownDevice(Uuid),

    #[error("Device {0} is already revoked")]
    AlreadyRevoked(Uuid),

    #[error("Binding table unavailable")]
    Unavailable,
}

/// Failure reported by the identity backend.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Identity backend error: {0}")]
pub struct BackendError(pub String);

/// The out-of-process identity backend of record.
#[async_trait::async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn register(&self, device_id: Uuid, account_id: &str) -> Result<(), BackendError>;
}

/// A backend registration that has not succeeded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRegistration {
    pub device_id: Uuid,
    pub account_id: String,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Default)]
struct BindingTable {
    devices: HashMap<Uuid, DeviceIdentity>,
    active_by_account: HashMap<String, Uuid>,
    active_by_key: HashMap<[u8; 32], Uuid>,
}

impl BindingTable {
    /// Mark `device_id` revoked and drop it from both active indexes.
    fn revoke(&mut self, device_id: Uuid, at: i64) -> Option<DeviceIdentity> {
        let identity = self.devices.get_mut(&device_id)?;
        identity.revoked_at = Some(at);
        let revoked = identity.clone();
        self.active_by_account.remove(&revoked.account_id);
        self.active_by_key.remove(revoked.public_key.as_bytes());
        Some(revoked)
    }
}

struct Inner {
    table: RwLock<BindingTable>,
    backend: Option<Arc<dyn IdentityBackend>>,
    pending: Mutex<Vec<PendingRegistration>>,
}

/// Issues and records device bindings. Cheap to clone.
#[derive(Clone)]
pub struct DeviceBindingAuthority {
    inner: Arc<Inner>,
}

impl Default for DeviceBindingAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeviceBindingAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBindingAuthority")
            .field("has_backend", &self.inner.backend.is_some())
            .finish_non_exhaustive()
    }
}

impl DeviceBindingAuthority {
    /// An authority with no backend (registrations are not reported).
    pub fn new() -> Self {
        Self::build(None)
    }

    /// An authority that reports every new binding to `backend`.
    pub fn with_backend(backend: Arc<dyn IdentityBackend>) -> Self {
        Self::build(Some(backend))
    }

    fn build(backend: Option<Arc<dyn IdentityBackend>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: RwLock::new(BindingTable::default()),
                backend,
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Bind `public_key` to `account_id`.
    pub fn bind(
        &self,
        account_id: &str,
        public_key: VerifyingKey,
        mode: BindMode,
    ) -> Result<DeviceIdentity, BindingError> {
        let identity = {
            let mut table = self
                .inner
                .table
                .write()
                .map_err(|_| BindingError::Unavailable)?;
            let now = unix_timestamp_millis();

            let by_account = table.active_by_account.get(account_id).copied();
            let by_key = table
                .active_by_key
                .get(public_key.as_bytes())
                .copied()
                .filter(|id| Some(*id) != by_account);
            if mode == BindMode::Fresh {
                if let Some(device_id) = by_account {
                    return Err(BindingError::AlreadyBound {
                        account_id: account_id.to_string(),
                        device_id,
                    });
                }
                if let Some(device_id) = by_key {
                    let owner = table
                        .devices
                        .get(&device_id)
                        .map(|d| d.account_id.clone())
                        .unwrap_or_default();
                    return Err(BindingError::KeyAlreadyBound {
                        account_id: owner,
                        device_id,
                    });
                }
            }
            for device_id in by_account.into_iter().chain(by_key) {
                if let Some(prior) = table.revoke(device_id, now) {
                    info!(
                        account_id = %prior.account_id,
                        device_id = %device_id,
                        "Revoked prior device binding"
                    );
                }
            }

            let identity = DeviceIdentity {
                device_id: Uuid::new_v4(),
                account_id: account_id.to_string(),
                public_key,
                created_at: now,
                revoked_at: None,
            };
            table
                .active_by_account
                .insert(account_id.to_string(), identity.device_id);
            table
                .active_by_key
                .insert(*public_key.as_bytes(), identity.device_id);
            table.devices.insert(identity.device_id, identity.clone());
            identity
        };

        info!(account_id, device_id = %identity.device_id, "Device bound");
        self.spawn_registration(identity.device_id, account_id.to_string());
        Ok(identity)
    }

    /// Revoke a device binding. Later signatures from it never verify.
    pub fn revoke(&self, device_id: Uuid) -> Result<DeviceIdentity, BindingError> {
        let mut table = self
            .inner
            .table
            .write()
            .map_err(|_| BindingError::Unavailable)?;
        let identity = table
            .devices
            .get(&device_id)
            .ok_or(BindingError::UnknownDevice(device_id))?;
        if !identity.is_active() {
            return Err(BindingError::AlreadyRevoked(device_id));
        }
        let revoked = table
            .revoke(device_id, unix_timestamp_millis())
            .ok_or(BindingError::UnknownDevice(device_id))?;
        drop(table);

        info!(account_id = %revoked.account_id, device_id = %device_id, "Device binding revoked");
        Ok(revoked)
    }

    /// Check `signature` over `message` against the device's current key.
    pub fn verify(&self, device_id: &Uuid, signature: &[u8], message: &[u8]) -> bool {
        let Ok(table) = self.inner.table.read() else {
            warn!(device_id = %device_id, "Binding table poisoned; failing verification");
            return false;
        };
        let Some(identity) = table.devices.get(device_id) else {
            debug!(device_id = %device_id, "Verification for unknown device");
            return false;
        };
        if !identity.is_active() {
            debug!(device_id = %device_id, "Verification for revoked device");
            return false;
        }
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        identity.public_key.verify_strict(message, &signature).is_ok()
    }

    /// Whether `device_id` is the active binding of `account_id`.
    pub fn is_bound_to(&self, device_id: &Uuid, account_id: &str) -> bool {
        self.inner.table.read().is_ok_and(|table| {
            table
                .devices
                .get(device_id)
                .is_some_and(|d| d.is_active() && d.account_id == account_id)
        })
    }

    pub fn identity(&self, device_id: &Uuid) -> Option<DeviceIdentity> {
        self.inner.table.read().ok()?.devices.get(device_id).cloned()
    }

    /// The account's active binding, if any.
    pub fn active_binding(&self, account_id: &str) -> Option<DeviceIdentity> {
        let table = self.inner.table.read().ok()?;
        let device_id = table.active_by_account.get(account_id)?;
        table.devices.get(device_id).cloned()
    }

    /// Registrations the backend has not acknowledged yet.
    pub fn pending_registrations(&self) -> Vec<PendingRegistration> {
        self.inner
            .pending
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Retry every queued registration once. Returns how many succeeded.
    pub async fn reconcile(&self) -> usize {
        let Some(backend) = self.inner.backend.clone() else {
            return 0;
        };
        let queued = self
            .inner
            .pending
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default();

        let mut succeeded = 0;
        for mut entry in queued {
            match backend.register(entry.device_id, &entry.account_id).await {
                Ok(()) => {
                    info!(device_id = %entry.device_id, "Backend registration reconciled");
                    succeeded += 1;
                }
                Err(e) => {
                    entry.attempts += 1;
                    entry.last_error = e.0;
                    self.inner.queue(entry);
                }
            }
        }
        succeeded
    }

    fn spawn_registration(&self, device_id: Uuid, account_id: String) {
        let Some(backend) = self.inner.backend.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.inner.queue(PendingRegistration {
                device_id,
                account_id,
                attempts: 0,
                last_error: "no async runtime".into(),
            });
            return;
        };
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            if let Err(e) = backend.register(device_id, &account_id).await {
                warn!(device_id = %device_id, account_id, error = %e, "Backend registration failed; queued for reconciliation");
                inner.queue(PendingRegistration {
                    device_id,
                    account_id,
                    attempts: 1,
                    last_error: e.0,
                });
            }
        });
    }
}

impl Inner {
    fn queue(&self, entry: PendingRegistration) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(entry);
        }
    }
}
