//! Per-session nonce table.
//!
//! Every nonce the session ever issued stays in the table with its final
//! state, so a replay is reported as a replay rather than as an unknown
//! nonce. Only open nonces can change state, and only once.

use std::collections::HashMap;

use rand::RngCore;
use rand::rngs::OsRng;
use tracing::debug;

use rollcall_proto::{NONCE_LEN, NonceState, NonceView};

#[derive(Debug)]
pub struct NonceTable {
    session_id: String,
    ttl_ms: i64,
    entries: HashMap<Vec<u8>, NonceView>,
}

impl NonceTable {
    pub fn new(session_id: &str, ttl_ms: i64) -> Self {
        Self {
            session_id: session_id.to_string(),
            ttl_ms,
            entries: HashMap::new(),
        }
    }

    /// Issue a fresh 128-bit nonce.
    pub fn issue(&mut self, now_ms: i64) -> NonceView {
        let value = loop {
            let mut value = vec![0u8; NONCE_LEN];
            OsRng.fill_bytes(&mut value);
            if !self.entries.contains_key(&value) {
                break value;
            }
        };
        let view = NonceView {
            value: value.clone(),
            session_id: self.session_id.clone(),
            issued_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(self.ttl_ms),
            state: NonceState::Open,
        };
        self.entries.insert(value, view.clone());
        view
    }

    pub fn lookup(&self, value: &[u8]) -> Option<&NonceView> {
        self.entries.get(value)
    }

    /// Open → Consumed. Returns whether the nonce was open.
    pub fn consume(&mut self, value: &[u8]) -> bool {
        self.transition(value, NonceState::Consumed)
    }

    /// Open → Cancelled. A cancelled nonce never validates again.
    pub fn cancel(&mut self, value: &[u8]) -> bool {
        self.transition(value, NonceState::Cancelled)
    }

    /// Mark open nonces past their expiry as expired.
    pub fn sweep(&mut self, now_ms: i64) -> usize {
        let mut swept = 0;
        for view in self.entries.values_mut() {
            if view.state == NonceState::Open && now_ms > view.expires_at_ms {
                view.state = NonceState::Expired;
                swept += 1;
            }
        }
        if swept > 0 {
            debug!(session_id = %self.session_id, swept, "Expired stale nonces");
        }
        swept
    }

    /// Cancel every open nonce (session stop).
    pub fn invalidate_all(&mut self) -> usize {
        let mut invalidated = 0;
        for view in self.entries.values_mut() {
            if view.state == NonceState::Open {
                view.state = NonceState::Cancelled;
                invalidated += 1;
            }
        }
        invalidated
    }

    pub fn open_count(&self) -> usize {
        self.entries
            .values()
            .filter(|v| v.state == NonceState::Open)
            .count()
    }

    fn transition(&mut self, value: &[u8], to: NonceState) -> bool {
        match self.entries.get_mut(value) {
            Some(view) if view.state == NonceState::Open => {
                view.state = to;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_nonces_are_unique_and_open() {
        let mut table = NonceTable::new("s", 10_000);
        let a = table.issue(0);
        let b = table.issue(0);
        assert_ne!(a.value, b.value);
        assert_eq!(a.value.len(), NONCE_LEN);
        assert_eq!(a.expires_at_ms, 10_000);
        assert_eq!(table.open_count(), 2);
    }

    #[test]
    fn consume_is_single_use() {
        let mut table = NonceTable::new("s", 10_000);
        let n = table.issue(0);
        assert!(table.consume(&n.value));
        assert!(!table.consume(&n.value));
        assert!(!table.cancel(&n.value));
        assert_eq!(table.lookup(&n.value).map(|v| v.state), Some(NonceState::Consumed));
    }

    #[test]
    fn cancelled_nonce_cannot_be_consumed() {
        let mut table = NonceTable::new("s", 10_000);
        let n = table.issue(0);
        assert!(table.cancel(&n.value));
        assert!(!table.consume(&n.value));
    }

    #[test]
    fn sweep_only_touches_expired_open_nonces() {
        let mut table = NonceTable::new("s", 1_000);
        let early = table.issue(0);
        let used = table.issue(0);
        let late = table.issue(5_000);
        table.consume(&used.value);

        assert_eq!(table.sweep(1_001), 1);
        assert_eq!(table.lookup(&early.value).map(|v| v.state), Some(NonceState::Expired));
        assert_eq!(table.lookup(&used.value).map(|v| v.state), Some(NonceState::Consumed));
        assert_eq!(table.lookup(&late.value).map(|v| v.state), Some(NonceState::Open));
    }

    #[test]
    fn invalidate_all_closes_open_nonces() {
        let mut table = NonceTable::new("s", 1_000);
        table.issue(0);
        table.issue(0);
        assert_eq!(table.invalidate_all(), 2);
        assert_eq!(table.open_count(), 0);
        assert_eq!(table.invalidate_all(), 0);
    }

    #[test]
    fn unknown_nonce_is_not_found() {
        let table = NonceTable::new("s", 1_000);
        assert!(table.lookup(&[0; NONCE_LEN]).is_none());
    }
}
