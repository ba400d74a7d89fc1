//! `SQLite` persistence for the attendance ledger.
//!
//! Sessions and ledger entries are written by a background task so that a
//! slow disk never stalls a session actor. The stored entries keep their
//! hash chain and can be re-verified after reload.

mod db;
mod models;
mod queries;
mod writer;

pub use db::{DatabaseError, LedgerDatabase};
pub use models::{LedgerEntryRow, SessionRow};
pub(crate) use writer::{PersistOp, PersistSender, spawn_writer};
