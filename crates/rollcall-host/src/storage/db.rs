//! Ledger database handle: sessions and their hash-chained entries.

pub use rollcall_core::db::DatabaseError;

rollcall_core::define_database!(LedgerDatabase, "Ledger schema ready");
