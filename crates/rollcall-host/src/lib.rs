//! Rollcall session broadcast host.
//!
//! - [`host`]: the per-device [`SessionHost`] (`Idle → Active → Stopped`)
//! - [`actor`]: one task per session owning its nonce table and ledger
//! - [`registry`]: the arena of sessions addressed by id, and active codes
//! - [`ledger`]: hash-chained attendance log and record index
//! - [`storage`]: `SQLite` persistence for sessions and ledger entries
//!
//! The advertisement loop and the per-connection handshake responder run as
//! their own tasks and reach the session only through its handle.

pub mod actor;
mod broadcaster;
mod connection;
pub mod error;
pub mod host;
pub mod ledger;
pub mod nonce;
pub mod registry;
pub mod session;
pub mod storage;

pub use actor::{ConnectionInfo, SessionHandle, SubmissionOutcome};
pub use error::{HostError, Result};
pub use host::{SessionHost, SessionHostBuilder};
pub use ledger::{Ledger, LedgerEntry, LedgerError, verify_entries};
pub use registry::SessionRegistry;
pub use session::{SessionInfo, SessionMetadata, SessionPolicy, SessionSummary, StopReason};
pub use storage::LedgerDatabase;
