//! Time-boxed creation locks.
//!
//! After a work note is created, a short-TTL marker keyed by entity id
//! suppresses the other save triggers that fire for the same logical save
//! before the fingerprint update is visible to them.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::host::LockProvider;

/// Prune entries older than this multiple of their own TTL.
const PRUNE_TTL_FACTOR: u32 = 10;

/// In-process TTL marker map.
///
/// Check-then-act across `held` and `acquire` is deliberately not atomic:
/// two near-simultaneous requests can both pass the check before either
/// sets the marker. That window is an accepted limitation — the cost is a
/// rare duplicate note, not corruption — and is not closed with a mutex
/// held across the engine's whole evaluation.
pub struct CreationLocks {
    held: Mutex<HashMap<String, (Instant, Duration)>>,
}

impl CreationLocks {
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Remove expired markers to bound memory over long-running processes.
    pub fn prune_stale_entries(&self) {
        if let Ok(mut held) = self.held.lock() {
            let before = held.len();
            held.retain(|_, (set_at, ttl)| set_at.elapsed() < *ttl * PRUNE_TTL_FACTOR);
            let pruned = before - held.len();
            if pruned > 0 {
                log::debug!("CreationLocks: pruned {} stale entries", pruned);
            }
        }
    }
}

impl Default for CreationLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl LockProvider for CreationLocks {
    fn acquire(&self, key: &str, ttl_secs: u64) -> bool {
        let mut held = match self.held.lock() {
            Ok(h) => h,
            Err(_) => return false,
        };
        if let Some((set_at, ttl)) = held.get(key) {
            if set_at.elapsed() < *ttl {
                return false;
            }
        }
        held.insert(key.to_string(), (Instant::now(), Duration::from_secs(ttl_secs)));
        true
    }

    fn held(&self, key: &str) -> bool {
        self.held
            .lock()
            .ok()
            .and_then(|held| {
                held.get(key)
                    .map(|(set_at, ttl)| set_at.elapsed() < *ttl)
            })
            .unwrap_or(false)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_then_held() {
        let locks = CreationLocks::new();
        assert!(!locks.held("entity-42"));
        assert!(locks.acquire("entity-42", 30));
        assert!(locks.held("entity-42"));
        assert!(locks.held("entity-42"), "held is not consuming");
    }

    #[test]
    fn test_acquire_while_active_fails() {
        let locks = CreationLocks::new();
        assert!(locks.acquire("entity-7", 30));
        assert!(!locks.acquire("entity-7", 30));
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let locks = CreationLocks::new();
        assert!(locks.acquire("entity-9", 0));
        assert!(!locks.held("entity-9"));
        assert!(locks.acquire("entity-9", 0), "expired marker can be re-acquired");
    }

    #[test]
    fn test_keys_are_independent() {
        let locks = CreationLocks::new();
        assert!(locks.acquire("entity-1", 30));
        assert!(!locks.held("entity-2"));
    }

    #[test]
    fn test_prune_keeps_fresh_entries() {
        let locks = CreationLocks::new();
        locks.acquire("fresh", 30);
        locks.prune_stale_entries();
        assert!(locks.held("fresh"), "fresh entry survives pruning");
    }

    #[test]
    fn test_prune_drops_expired_entries() {
        let locks = CreationLocks::new();
        locks.acquire("gone", 0);
        locks.prune_stale_entries();
        let held = locks.held.lock().unwrap();
        assert!(!held.contains_key("gone"));
    }
}
